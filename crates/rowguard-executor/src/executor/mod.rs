//! Pipeline driver: pulls rows from the upstream source, applies the
//! interceptor and forwards accepted rows to the sink.

pub mod memory;

use serde::Serialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use rowguard_common::error::{Error, Result, SentinelError};
use rowguard_common::metrics;
use rowguard_common::types::{CommandKind, Row, RowShape, ScanDirection};

use crate::interceptor::{InterceptDecision, RowInterceptor};
use crate::noise::{NoiseGenerator, NoiseSeed};

pub use memory::{CollectingSink, JunkFilter, VecSource};

/// Upstream row producer
pub trait TupleSource {
    /// Next row, or `None` at end of stream
    fn next(&mut self) -> Option<Row>;

    /// Strip internal columns to get the client-visible row
    fn project(&self, row: Row) -> Row {
        row
    }

    /// Release resources. May be called at any time after the last row.
    fn shutdown(&mut self);

    fn enter_parallel_mode(&mut self) {}

    fn exit_parallel_mode(&mut self) {}
}

/// Downstream row consumer
pub trait TupleSink {
    fn startup(&mut self, command: CommandKind, shape: &RowShape) -> Result<()>;

    /// Returns false once the sink can no longer accept rows
    fn receive(&mut self, row: Row) -> bool;

    fn shutdown(&mut self);
}

/// Statement-level facts the driver needs
#[derive(Debug, Clone, Default)]
pub struct StatementContext {
    pub command: CommandKind,
    /// Statement returns rows although it is not a SELECT
    pub has_returning: bool,
    /// Planner asked for parallel execution
    pub parallel_mode_needed: bool,
    /// Rows may be re-read backwards after this run
    pub backward_scan: bool,
    pub shape: RowShape,
}

impl StatementContext {
    pub fn select(shape: RowShape) -> Self {
        Self {
            command: CommandKind::Select,
            shape,
            ..Self::default()
        }
    }

    /// Whether rows are handed to a sink at all
    pub fn send_tuples(&self) -> bool {
        self.command.is_select() || self.has_returning
    }
}

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Running,
    Drained,
    Aborted,
}

/// Why a drained run stopped pulling rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfStream,
    RowLimit,
    SinkClosed,
    /// A matching row could not be evaluated and was withheld
    RowRejected,
    /// Direction was no-movement; no rows were pulled
    NoMovement,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::EndOfStream => "end_of_stream",
            StopReason::RowLimit => "row_limit",
            StopReason::SinkClosed => "sink_closed",
            StopReason::RowRejected => "row_rejected",
            StopReason::NoMovement => "no_movement",
        }
    }
}

/// Per-run counters
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    /// SELECT rows delivered
    pub processed: u64,
    /// Rows handed onward, any statement kind
    pub emitted: u64,
    /// Rows whose target value was perturbed
    pub perturbed: u64,
    /// 0 = unbounded
    pub limit: u64,
    pub direction: ScanDirection,
}

impl StreamState {
    pub fn new(limit: u64, direction: ScanDirection) -> Self {
        Self {
            limit,
            direction,
            ..Self::default()
        }
    }

    fn limit_reached(&self) -> bool {
        self.limit != 0 && self.emitted == self.limit
    }
}

/// Summary of a drained run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub stop: StopReason,
    pub processed: u64,
    pub emitted: u64,
    pub perturbed: u64,
    pub parallel: bool,
}

impl RunReport {
    pub fn no_movement() -> Self {
        Self {
            state: RunState::Drained,
            stop: StopReason::NoMovement,
            processed: 0,
            emitted: 0,
            perturbed: 0,
            parallel: false,
        }
    }
}

/// Shuts the upstream down at most once
struct Upstream<'a> {
    source: &'a mut dyn TupleSource,
    released: bool,
}

impl Upstream<'_> {
    fn release(&mut self) {
        if !self.released {
            self.source.shutdown();
            self.released = true;
        }
    }
}

/// Executes one statement's row loop
#[derive(Debug, Clone)]
pub struct PipelineDriver {
    interceptor: RowInterceptor,
    seed: NoiseSeed,
    allow_parallel: bool,
}

impl PipelineDriver {
    pub fn new(interceptor: RowInterceptor, seed: NoiseSeed) -> Self {
        Self {
            interceptor,
            seed,
            allow_parallel: true,
        }
    }

    #[must_use]
    pub fn with_parallel(mut self, allow: bool) -> Self {
        self.allow_parallel = allow;
        self
    }

    pub fn interceptor(&self) -> &RowInterceptor {
        &self.interceptor
    }

    /// Run the loop until the stream drains or a sentinel aborts it.
    ///
    /// `sink` is `None` when the statement does not send rows. A sentinel
    /// detection is returned as `Error::Sentinel` after the upstream has
    /// been released.
    pub fn run(
        &self,
        ctx: &StatementContext,
        source: &mut dyn TupleSource,
        mut sink: Option<&mut dyn TupleSink>,
        limit: u64,
        direction: ScanDirection,
    ) -> Result<RunReport> {
        let span = tracing::debug_span!(
            "pipeline_run",
            run_id = %Uuid::new_v4(),
            command = ctx.command.as_str()
        );
        let _enter = span.enter();

        // INIT
        let mut run_state = RunState::Init;
        let mut state = StreamState::new(limit, direction);

        // An early exit cannot be reconciled with a parallel fan-out
        let parallel = self.allow_parallel && ctx.parallel_mode_needed && limit == 0;
        let mut upstream = Upstream {
            source,
            released: false,
        };
        if parallel {
            upstream.source.enter_parallel_mode();
        }

        let mut rng = NoiseGenerator::new(self.seed);
        let evaluate = ctx.command.is_select();
        debug!(limit, parallel, seed = rng.seed(), "run started");

        run_state = transition(run_state, RunState::Running);

        let outcome: Result<StopReason> = loop {
            let Some(row) = upstream.source.next() else {
                upstream.release();
                break Ok(StopReason::EndOfStream);
            };

            let row = upstream.source.project(row);

            let row = if evaluate {
                match self.interceptor.evaluate(row, &mut rng) {
                    Ok(InterceptDecision::Pass(row)) => row,
                    Ok(InterceptDecision::PassMutated(row)) => {
                        state.perturbed += 1;
                        row
                    }
                    Ok(InterceptDecision::Abort(severity)) => {
                        upstream.release();
                        let policy = self.interceptor.policy();
                        warn!(
                            table_id = policy.table_id(),
                            column = policy.column(),
                            severity = severity.as_str(),
                            rows_sent = state.processed,
                            "sentinel value detected"
                        );
                        break Err(
                            SentinelError::new(severity, policy.table_id(), policy.column())
                                .into(),
                        );
                    }
                    Err(Error::Policy(e)) => {
                        warn!(error = %e, "withholding row that cannot be evaluated");
                        metrics::record_row_dropped("type_mismatch");
                        break Ok(StopReason::RowRejected);
                    }
                    Err(e) => break Err(e),
                }
            } else {
                row
            };

            if let Some(sink) = sink.as_deref_mut() {
                if !sink.receive(row) {
                    trace!("sink closed");
                    break Ok(StopReason::SinkClosed);
                }
            }

            if evaluate {
                state.processed += 1;
            }
            state.emitted += 1;

            if state.limit_reached() {
                break Ok(StopReason::RowLimit);
            }
        };

        run_state = transition(
            run_state,
            if outcome.is_ok() {
                RunState::Drained
            } else {
                RunState::Aborted
            },
        );

        if !ctx.backward_scan {
            upstream.release();
        }
        if parallel {
            upstream.source.exit_parallel_mode();
        }

        let stop = outcome?;
        debug!(
            stop = stop.as_str(),
            processed = state.processed,
            perturbed = state.perturbed,
            "run drained"
        );

        Ok(RunReport {
            state: run_state,
            stop,
            processed: state.processed,
            emitted: state.emitted,
            perturbed: state.perturbed,
            parallel,
        })
    }
}

fn transition(from: RunState, to: RunState) -> RunState {
    trace!(?from, ?to, "run state");
    to
}
