//! CLI command handlers

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use rowguard_common::config::Config;
use rowguard_common::metrics::{self, MetricsRegistry};
use rowguard_common::types::{CommandKind, Row, RowShape, ScanDirection};
use rowguard_executor::{HookRegistry, PolicyConfig, SentinelModule, StatementContext, TupleSink, VecSource};

/// Output format for replayed rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

/// Options for `replay`
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub command: CommandKind,
    pub returning: bool,
    pub parallel: bool,
    pub limit: u64,
    pub format: OutputFormat,
    pub metrics: bool,
}

#[derive(Serialize)]
struct CheckReport<'a> {
    policy: &'a PolicyConfig,
    allow_parallel: bool,
    noise_seed: Option<u64>,
}

/// Validate configuration and print the resolved policy
pub fn check(config: &Config) -> Result<()> {
    let policy = PolicyConfig::from_settings(&config.policy).context("invalid policy settings")?;

    let report = CheckReport {
        policy: &policy,
        allow_parallel: config.executor.allow_parallel,
        noise_seed: config.policy.noise_seed,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !policy.is_active() {
        info!("policy is inactive: no table selected");
    }
    Ok(())
}

/// Stream JSON-lines rows through the sentinel module
pub async fn replay(config: &Config, input: &Path, options: &ReplayOptions) -> Result<()> {
    let rows = read_rows(input).await?;
    let width = rows.iter().map(Row::width).max().unwrap_or(0);

    if options.metrics {
        MetricsRegistry::global().install_prometheus();
    }

    let registry = HookRegistry::new();
    let module = SentinelModule::load(&config.policy, &config.executor, &registry)?;

    let ctx = StatementContext {
        command: options.command,
        has_returning: options.returning,
        parallel_mode_needed: options.parallel,
        backward_scan: false,
        shape: RowShape::anonymous(width),
    };
    let mut source = VecSource::new(rows);
    let mut sink = PrintSink::new(options.format);

    let result = registry.run(&ctx, &mut source, &mut sink, options.limit, ScanDirection::Forward);
    module.unload();

    if options.metrics {
        eprintln!("{}", metrics::export_prometheus());
    }

    match result {
        Ok(report) => {
            info!(
                processed = report.processed,
                perturbed = report.perturbed,
                stop = report.stop.as_str(),
                "replay finished"
            );
            Ok(())
        }
        Err(e) if e.is_sentinel() => {
            warn!(code = e.code(), "replay aborted");
            bail!("[{}] {}", e.code(), e)
        }
        Err(e) => Err(e.into()),
    }
}

async fn read_rows(path: &Path) -> Result<Vec<Row>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading rows from {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<Row>(line).with_context(|| format!("{}:{}: invalid row", path.display(), n + 1))
        })
        .collect()
}

/// Sink that writes rows to stdout
struct PrintSink {
    format: OutputFormat,
    columns: usize,
}

impl PrintSink {
    fn new(format: OutputFormat) -> Self {
        Self { format, columns: 0 }
    }
}

impl TupleSink for PrintSink {
    fn startup(&mut self, _command: CommandKind, shape: &RowShape) -> rowguard_common::Result<()> {
        self.columns = shape.width();
        if self.format == OutputFormat::Table {
            println!("{}", shape.columns.join(" | "));
            println!("{}", "-".repeat(self.columns * 12));
        }
        Ok(())
    }

    fn receive(&mut self, row: Row) -> bool {
        match self.format {
            OutputFormat::Json => match serde_json::to_string(&row) {
                Ok(line) => println!("{line}"),
                Err(e) => {
                    warn!(error = %e, "failed to encode row");
                    return false;
                }
            },
            OutputFormat::Table => {
                let fields: Vec<String> = row.values.iter().map(ToString::to_string).collect();
                println!("{}", fields.join(" | "));
            }
        }
        true
    }

    fn shutdown(&mut self) {
        if self.format == OutputFormat::Table {
            println!();
        }
    }
}
