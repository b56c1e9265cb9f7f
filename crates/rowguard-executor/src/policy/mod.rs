//! Resolved interception policy
//!
//! A `PolicyConfig` is built once from [`PolicySettings`] and shared
//! read-only by every pipeline run.

use serde::Serialize;

use rowguard_common::config::PolicySettings;
use rowguard_common::error::{ConfigError, Result};
use rowguard_common::types::{NullHandling, PolicyMode, Row, Severity, TableId, Value};

/// Largest accepted relation id or column position
pub const MAX_SETTING: i64 = i32::MAX as i64;

/// Immutable policy applied to intercepted rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyConfig {
    table_id: TableId,
    column: usize,
    mode: PolicyMode,
    severity: Severity,
    sentinel: Option<Value>,
    null_handling: NullHandling,
}

impl PolicyConfig {
    /// Validate settings and build the policy.
    ///
    /// A zero relation id yields an inactive policy regardless of the
    /// other fields.
    pub fn from_settings(settings: &PolicySettings) -> Result<Self> {
        if !(0..=MAX_SETTING).contains(&settings.relation_id) {
            return Err(ConfigError::InvalidRelationId {
                value: settings.relation_id,
                max: MAX_SETTING,
            }
            .into());
        }
        if !(0..=MAX_SETTING).contains(&settings.column_no) {
            return Err(ConfigError::InvalidColumnNo {
                value: settings.column_no,
                max: MAX_SETTING,
            }
            .into());
        }

        // Both ranges were checked above
        let table_id = TableId::try_from(settings.relation_id)
            .map_err(|_| ConfigError::InvalidRelationId {
                value: settings.relation_id,
                max: MAX_SETTING,
            })?;
        let column = usize::try_from(settings.column_no).map_err(|_| {
            ConfigError::InvalidColumnNo {
                value: settings.column_no,
                max: MAX_SETTING,
            }
        })?;

        if let Some(sentinel) = &settings.sentinel {
            if sentinel.is_null() {
                return Err(ConfigError::InvalidSentinel(sentinel.type_name().to_string()).into());
            }
        }

        if table_id != 0 {
            if column == 0 {
                return Err(ConfigError::MissingColumn(table_id).into());
            }
            if settings.mode == PolicyMode::Abort && settings.sentinel.is_none() {
                return Err(ConfigError::MissingSentinel.into());
            }
        }

        Ok(Self {
            table_id,
            column,
            mode: settings.mode,
            severity: Severity::from_statement_only(settings.abort_statement_only),
            sentinel: settings.sentinel.clone(),
            null_handling: settings.null_handling,
        })
    }

    /// Policy that never triggers
    pub fn inactive() -> Self {
        Self {
            table_id: 0,
            column: 0,
            mode: PolicyMode::default(),
            severity: Severity::Fatal,
            sentinel: None,
            null_handling: NullHandling::default(),
        }
    }

    /// Perturbation policy for one table/column
    pub fn perturb(table_id: TableId, column: usize) -> Result<Self> {
        Self::from_settings(&PolicySettings {
            relation_id: i64::from(table_id),
            column_no: i64::try_from(column).unwrap_or(i64::MAX),
            mode: PolicyMode::Perturb,
            ..PolicySettings::default()
        })
    }

    /// Sentinel-abort policy for one table/column
    pub fn abort_on(
        table_id: TableId,
        column: usize,
        sentinel: Value,
        severity: Severity,
    ) -> Result<Self> {
        Self::from_settings(&PolicySettings {
            relation_id: i64::from(table_id),
            column_no: i64::try_from(column).unwrap_or(i64::MAX),
            mode: PolicyMode::Abort,
            abort_statement_only: severity == Severity::Recoverable,
            sentinel: Some(sentinel),
            ..PolicySettings::default()
        })
    }

    #[must_use]
    pub fn with_null_handling(mut self, null_handling: NullHandling) -> Self {
        self.null_handling = null_handling;
        self
    }

    /// True iff a table is selected
    pub fn is_active(&self) -> bool {
        self.table_id != 0
    }

    /// True iff the row originates from the protected table
    pub fn matches(&self, row: &Row) -> bool {
        self.is_active() && row.table_id == self.table_id
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// 1-based target column
    pub fn column(&self) -> usize {
        self.column
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn sentinel(&self) -> Option<&Value> {
        self.sentinel.as_ref()
    }

    pub fn null_handling(&self) -> NullHandling {
        self.null_handling
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::inactive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_common::error::Error;
    use rstest::rstest;

    fn settings(relation_id: i64, column_no: i64) -> PolicySettings {
        PolicySettings {
            relation_id,
            column_no,
            mode: PolicyMode::Perturb,
            ..PolicySettings::default()
        }
    }

    #[test]
    fn test_default_settings_are_inactive() {
        let policy = PolicyConfig::from_settings(&PolicySettings::default()).unwrap();
        assert!(!policy.is_active());
        assert!(!policy.matches(&Row::new(0, vec![])));
        assert_eq!(policy, PolicyConfig::inactive());
    }

    #[test]
    fn test_matches_by_table() {
        let policy = PolicyConfig::perturb(100, 2).unwrap();
        assert!(policy.is_active());
        assert!(policy.matches(&Row::new(100, vec![Value::Int32(1)])));
        assert!(!policy.matches(&Row::new(101, vec![Value::Int32(1)])));
        assert!(!policy.matches(&Row::new(0, vec![Value::Int32(1)])));
    }

    #[rstest]
    #[case(-1, 1)]
    #[case(MAX_SETTING + 1, 1)]
    fn test_rejects_relation_out_of_range(#[case] relation: i64, #[case] column: i64) {
        let err = PolicyConfig::from_settings(&settings(relation, column)).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidRelationId { .. })
        ));
    }

    #[rstest]
    #[case(100, -1)]
    #[case(100, MAX_SETTING + 1)]
    #[case(0, -5)]
    fn test_rejects_column_out_of_range(#[case] relation: i64, #[case] column: i64) {
        let err = PolicyConfig::from_settings(&settings(relation, column)).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::InvalidColumnNo { .. })));
    }

    #[test]
    fn test_inactive_table_with_column_is_accepted() {
        let policy = PolicyConfig::from_settings(&settings(0, 3)).unwrap();
        assert!(!policy.is_active());
    }

    #[test]
    fn test_active_table_requires_column() {
        let err = PolicyConfig::from_settings(&settings(100, 0)).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingColumn(100))));
    }

    #[test]
    fn test_abort_requires_sentinel() {
        let mut s = settings(100, 2);
        s.mode = PolicyMode::Abort;
        let err = PolicyConfig::from_settings(&s).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingSentinel)));

        s.sentinel = Some(Value::Null);
        let err = PolicyConfig::from_settings(&s).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::InvalidSentinel(_))));

        s.sentinel = Some(Value::Int32(-1));
        let policy = PolicyConfig::from_settings(&s).unwrap();
        assert_eq!(policy.sentinel(), Some(&Value::Int32(-1)));
    }

    #[rstest]
    #[case(true, Severity::Recoverable)]
    #[case(false, Severity::Fatal)]
    fn test_severity_from_setting(#[case] statement_only: bool, #[case] expected: Severity) {
        let s = PolicySettings {
            relation_id: 100,
            column_no: 2,
            mode: PolicyMode::Abort,
            abort_statement_only: statement_only,
            sentinel: Some(Value::Int32(-1)),
            ..PolicySettings::default()
        };
        assert_eq!(PolicyConfig::from_settings(&s).unwrap().severity(), expected);
    }

    #[test]
    fn test_construction_is_idempotent() {
        let s = settings(100, 2);
        let a = PolicyConfig::from_settings(&s).unwrap();
        let b = PolicyConfig::from_settings(&s).unwrap();
        assert_eq!(a, b);

        let rows = [Row::new(100, vec![]), Row::new(7, vec![]), Row::new(0, vec![])];
        for row in &rows {
            assert_eq!(a.matches(row), b.matches(row));
        }
        assert_eq!(a.is_active(), b.is_active());
    }
}
