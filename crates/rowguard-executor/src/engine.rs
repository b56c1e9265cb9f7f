//! Statement execution and module lifecycle

use std::sync::Arc;

use tracing::{debug, info, warn};

use rowguard_common::config::{ExecutorSettings, PolicySettings};
use rowguard_common::error::Result;
use rowguard_common::metrics::{self, LatencyTimer};
use rowguard_common::types::ScanDirection;

use crate::executor::{PipelineDriver, RunReport, StatementContext, TupleSink, TupleSource};
use crate::hook::{HookHandle, HookRegistry, RunStrategy};
use crate::interceptor::RowInterceptor;
use crate::noise::NoiseSeed;
use crate::policy::PolicyConfig;

/// Run one statement through `driver`, bracketing it with sink startup
/// and shutdown when the statement sends rows.
fn run_statement(
    driver: &PipelineDriver,
    ctx: &StatementContext,
    source: &mut dyn TupleSource,
    sink: &mut dyn TupleSink,
    limit: u64,
    direction: ScanDirection,
) -> Result<RunReport> {
    let timer = LatencyTimer::start();
    let send_tuples = ctx.send_tuples();

    if send_tuples {
        sink.startup(ctx.command, &ctx.shape)?;
    }

    let result = if direction == ScanDirection::NoMovement {
        debug!("no-movement run, skipping pipeline");
        Ok(RunReport::no_movement())
    } else {
        let downstream: Option<&mut dyn TupleSink> = if send_tuples { Some(&mut *sink) } else { None };
        driver.run(ctx, source, downstream, limit, direction)
    };

    if send_tuples {
        sink.shutdown();
    }

    let elapsed = timer.elapsed_ms();
    match &result {
        Ok(report) => metrics::record_run(ctx.command, "drained", report.processed, elapsed),
        Err(e) if e.is_sentinel() => metrics::record_run(ctx.command, "aborted", 0, elapsed),
        Err(_) => metrics::record_run(ctx.command, "failed", 0, elapsed),
    }

    result
}

/// Plain pipeline with no interception
#[derive(Debug, Clone, Default)]
pub struct StandardRun;

impl RunStrategy for StandardRun {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn execute(
        &self,
        ctx: &StatementContext,
        source: &mut dyn TupleSource,
        sink: &mut dyn TupleSink,
        limit: u64,
        direction: ScanDirection,
    ) -> Result<RunReport> {
        let driver = PipelineDriver::new(
            RowInterceptor::new(Arc::new(PolicyConfig::inactive())),
            NoiseSeed::WallClock,
        );
        run_statement(&driver, ctx, source, sink, limit, direction)
    }
}

/// Pipeline that applies the sentinel policy to SELECT output
#[derive(Debug, Clone)]
pub struct SentinelRun {
    driver: PipelineDriver,
}

impl SentinelRun {
    pub fn new(policy: PolicyConfig, seed: NoiseSeed, allow_parallel: bool) -> Self {
        Self {
            driver: PipelineDriver::new(RowInterceptor::new(Arc::new(policy)), seed)
                .with_parallel(allow_parallel),
        }
    }

    pub fn policy(&self) -> &PolicyConfig {
        self.driver.interceptor().policy()
    }
}

impl RunStrategy for SentinelRun {
    fn name(&self) -> &'static str {
        "sentinel"
    }

    fn execute(
        &self,
        ctx: &StatementContext,
        source: &mut dyn TupleSource,
        sink: &mut dyn TupleSink,
        limit: u64,
        direction: ScanDirection,
    ) -> Result<RunReport> {
        run_statement(&self.driver, ctx, source, sink, limit, direction)
    }
}

/// Loaded sentinel module; unloading removes its strategy from the registry
#[derive(Debug)]
pub struct SentinelModule<'r> {
    registry: &'r HookRegistry,
    handle: HookHandle,
}

impl<'r> SentinelModule<'r> {
    /// Validate settings and install the sentinel run strategy.
    ///
    /// Nothing is installed when the settings are rejected.
    pub fn load(
        policy: &PolicySettings,
        executor: &ExecutorSettings,
        registry: &'r HookRegistry,
    ) -> Result<Self> {
        let config = PolicyConfig::from_settings(policy).map_err(|e| {
            warn!(error = %e, "rejecting sentinel settings");
            e
        })?;

        info!(
            active = config.is_active(),
            table_id = config.table_id(),
            column = config.column(),
            mode = ?config.mode(),
            severity = config.severity().as_str(),
            "sentinel module loaded"
        );

        let strategy = SentinelRun::new(
            config,
            NoiseSeed::from_setting(policy.noise_seed),
            executor.allow_parallel,
        );
        let handle = registry.install(Arc::new(strategy));

        Ok(Self { registry, handle })
    }

    pub fn handle(&self) -> &HookHandle {
        &self.handle
    }

    pub fn unload(self) {
        if self.registry.uninstall(self.handle) {
            info!("sentinel module unloaded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CollectingSink, RunState, StopReason, VecSource};
    use rowguard_common::error::{ConfigError, Error};
    use rowguard_common::types::{CommandKind, PolicyMode, Row, RowShape, Severity, Value};

    fn settings() -> PolicySettings {
        PolicySettings {
            relation_id: 100,
            column_no: 2,
            mode: PolicyMode::Abort,
            sentinel: Some(Value::Int32(-1)),
            ..PolicySettings::default()
        }
    }

    fn source() -> VecSource {
        VecSource::new(vec![
            Row::new(100, vec![Value::Int32(1), Value::Int32(10)]),
            Row::new(100, vec![Value::Int32(2), Value::Int32(-1)]),
        ])
    }

    fn ctx(command: CommandKind) -> StatementContext {
        StatementContext {
            command,
            shape: RowShape::anonymous(2),
            ..StatementContext::default()
        }
    }

    #[test]
    fn test_load_and_unload() {
        let registry = HookRegistry::new();
        let module =
            SentinelModule::load(&settings(), &ExecutorSettings::default(), &registry).unwrap();
        assert_eq!(registry.current().name(), "sentinel");
        assert!(module.handle().previous().is_none());

        module.unload();
        assert_eq!(registry.current().name(), "standard");
    }

    #[test]
    fn test_unload_below_later_strategy() {
        let registry = HookRegistry::new();
        let mut perturb = settings();
        perturb.mode = PolicyMode::Perturb;
        perturb.sentinel = None;

        let module =
            SentinelModule::load(&perturb, &ExecutorSettings::default(), &registry).unwrap();
        let standard = registry.install(Arc::new(StandardRun));

        module.unload();
        assert_eq!(registry.current().name(), "standard");
        assert!(registry.is_installed());

        assert!(registry.uninstall(standard));
        assert!(!registry.is_installed());

        // The unloaded policy must not come back
        let mut source = source();
        let mut sink = CollectingSink::new();
        let report = registry
            .run(&ctx(CommandKind::Select), &mut source, &mut sink, 0, ScanDirection::Forward)
            .unwrap();
        assert_eq!(report.perturbed, 0);
        assert_eq!(sink.rows()[1].values[1], Value::Int32(-1));
    }

    #[test]
    fn test_load_fails_closed() {
        let registry = HookRegistry::new();
        let mut bad = settings();
        bad.sentinel = None;

        let err = SentinelModule::load(&bad, &ExecutorSettings::default(), &registry).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingSentinel)));
        assert!(!registry.is_installed());
    }

    #[test]
    fn test_fatal_abort_through_registry() {
        let registry = HookRegistry::new();
        let _module =
            SentinelModule::load(&settings(), &ExecutorSettings::default(), &registry).unwrap();

        let mut source = source();
        let mut sink = CollectingSink::new();
        let err = registry
            .run(&ctx(CommandKind::Select), &mut source, &mut sink, 0, ScanDirection::Forward)
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(sink.rows().len(), 1);
        assert_eq!(sink.shutdown_calls(), 1);
        assert_eq!(source.shutdown_calls(), 1);
    }

    #[test]
    fn test_recoverable_abort_severity() {
        let mut s = settings();
        s.abort_statement_only = true;
        let run = SentinelRun::new(PolicyConfig::from_settings(&s).unwrap(), NoiseSeed::Fixed(1), true);
        assert_eq!(run.policy().severity(), Severity::Recoverable);

        let err = run
            .execute(
                &ctx(CommandKind::Select),
                &mut source(),
                &mut CollectingSink::new(),
                0,
                ScanDirection::Forward,
            )
            .unwrap_err();
        assert!(err.is_sentinel());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_no_movement_skips_pipeline() {
        let run = SentinelRun::new(PolicyConfig::from_settings(&settings()).unwrap(), NoiseSeed::Fixed(1), true);
        let mut source = source();
        let mut sink = CollectingSink::new();

        let report = run
            .execute(&ctx(CommandKind::Select), &mut source, &mut sink, 0, ScanDirection::NoMovement)
            .unwrap();

        assert_eq!(report.state, RunState::Drained);
        assert_eq!(report.stop, StopReason::NoMovement);
        assert_eq!(source.remaining(), 2);
        assert!(sink.started().is_some());
        assert_eq!(sink.shutdown_calls(), 1);
    }

    #[test]
    fn test_statement_without_rows_leaves_sink_idle() {
        let run = SentinelRun::new(PolicyConfig::from_settings(&settings()).unwrap(), NoiseSeed::Fixed(1), true);
        let mut source = source();
        let mut sink = CollectingSink::new();

        let report = run
            .execute(&ctx(CommandKind::Update), &mut source, &mut sink, 0, ScanDirection::Forward)
            .unwrap();

        assert_eq!(report.emitted, 2);
        assert_eq!(report.processed, 0);
        assert!(sink.started().is_none());
        assert!(sink.rows().is_empty());
        assert_eq!(sink.shutdown_calls(), 0);
    }

    #[test]
    fn test_standard_run_passes_everything() {
        let mut source = source();
        let mut sink = CollectingSink::new();
        let report = StandardRun
            .execute(&ctx(CommandKind::Select), &mut source, &mut sink, 0, ScanDirection::Forward)
            .unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(sink.rows().len(), 2);
    }
}
