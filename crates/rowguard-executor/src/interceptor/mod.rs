//! Per-row policy evaluation

use std::sync::Arc;

use tracing::trace;

use rowguard_common::error::{PolicyError, Result};
use rowguard_common::metrics;
use rowguard_common::types::{NullHandling, PolicyMode, Row, Severity, Value};

use crate::noise::NoiseGenerator;
use crate::policy::PolicyConfig;

/// Outcome of evaluating one row
#[derive(Debug, Clone, PartialEq)]
pub enum InterceptDecision {
    /// Row passes unchanged
    Pass(Row),
    /// Row passes with the target value perturbed
    PassMutated(Row),
    /// Sentinel observed; the run must stop
    Abort(Severity),
}

impl InterceptDecision {
    /// Row to forward, if any
    pub fn into_row(self) -> Option<Row> {
        match self {
            InterceptDecision::Pass(row) | InterceptDecision::PassMutated(row) => Some(row),
            InterceptDecision::Abort(_) => None,
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, InterceptDecision::Abort(_))
    }
}

/// Applies a [`PolicyConfig`] to rows
#[derive(Debug, Clone)]
pub struct RowInterceptor {
    policy: Arc<PolicyConfig>,
}

impl RowInterceptor {
    pub fn new(policy: Arc<PolicyConfig>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Evaluate one row of SELECT output.
    ///
    /// Non-matching rows are returned untouched. A field that cannot be
    /// read as the policy requires yields a `PolicyError`.
    pub fn evaluate(&self, row: Row, rng: &mut NoiseGenerator) -> Result<InterceptDecision> {
        if !self.policy.matches(&row) {
            return Ok(InterceptDecision::Pass(row));
        }

        metrics::record_row_inspected();

        match self.policy.mode() {
            PolicyMode::Perturb => self.perturb(row, rng),
            PolicyMode::Abort => self.check_sentinel(row),
        }
    }

    fn perturb(&self, mut row: Row, rng: &mut NoiseGenerator) -> Result<InterceptDecision> {
        let ordinal = self.policy.column();
        let width = row.width();
        let field = row
            .get_mut(ordinal)
            .ok_or(PolicyError::ColumnOutOfRange { ordinal, width })?;

        let current = match (&*field, self.policy.null_handling()) {
            (Value::Null, NullHandling::Skip) => None,
            (Value::Null, NullHandling::Zero) => Some(0),
            (other, _) => Some(other.as_i32().ok_or_else(|| PolicyError::TypeMismatch {
                ordinal,
                expected: "int4".to_string(),
                actual: other.type_name().to_string(),
            })?),
        };
        let Some(current) = current else {
            trace!(ordinal, "null target left unperturbed");
            return Ok(InterceptDecision::Pass(row));
        };

        // bigint targets saturate at their own bounds, not at int4's
        let perturbed = match &*field {
            Value::Int64(_) => Value::Int64(rng.perturb_wide(i64::from(current))),
            other => other.with_i32(rng.perturb(current)),
        };
        *field = perturbed;

        metrics::record_row_perturbed();
        trace!(ordinal, "target value perturbed");

        Ok(InterceptDecision::PassMutated(row))
    }

    fn check_sentinel(&self, row: Row) -> Result<InterceptDecision> {
        let ordinal = self.policy.column();
        let field = row.get(ordinal).ok_or(PolicyError::ColumnOutOfRange {
            ordinal,
            width: row.width(),
        })?;

        let detected = self
            .policy
            .sentinel()
            .is_some_and(|sentinel| field.matches_sentinel(sentinel));

        if detected {
            let severity = self.policy.severity();
            metrics::record_sentinel_detection(severity);
            return Ok(InterceptDecision::Abort(severity));
        }

        Ok(InterceptDecision::Pass(row))
    }
}
