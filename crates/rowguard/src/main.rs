//! RowGuard - row-stream interceptor
//!
//! Single binary that provides:
//! - Configuration validation
//! - Replay of JSON-lines row streams through the sentinel pipeline

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use rowguard_common::config::LoggingConfig;
use rowguard_common::types::CommandKind;

mod cli;
mod config;

use cli::{OutputFormat, ReplayOptions};

#[derive(Parser)]
#[command(name = "rowguard")]
#[command(author, version, about = "RowGuard - sentinel detection for streamed rows", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log output format; falls back to `logging.format` from the config
    #[arg(long, value_enum, env = "ROWGUARD_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Statement kind to simulate
#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatementArg {
    Select,
    Insert,
    Update,
    Delete,
}

impl From<StatementArg> for CommandKind {
    fn from(arg: StatementArg) -> Self {
        match arg {
            StatementArg::Select => CommandKind::Select,
            StatementArg::Insert => CommandKind::Insert,
            StatementArg::Update => CommandKind::Update,
            StatementArg::Delete => CommandKind::Delete,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and print the resolved policy
    Check {
        /// Configuration file path
        #[arg(short, long, default_value = "/etc/rowguard/rowguard.toml")]
        config: String,
    },

    /// Stream JSON-lines rows through the interceptor
    Replay {
        /// Configuration file path
        #[arg(short, long, default_value = "/etc/rowguard/rowguard.toml")]
        config: String,

        /// Rows, one JSON object per line
        #[arg(short, long)]
        input: PathBuf,

        /// Statement kind
        #[arg(long, value_enum, default_value = "select")]
        command: StatementArg,

        /// Statement returns rows (non-SELECT only)
        #[arg(long)]
        returning: bool,

        /// Request parallel execution
        #[arg(long)]
        parallel: bool,

        /// Stop after this many rows (0 = unbounded)
        #[arg(short, long, default_value_t = 0)]
        limit: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Print Prometheus metrics to stderr afterwards
        #[arg(long)]
        metrics: bool,
    },

    /// Show version information
    Version,
}

fn init_tracing(flag: Option<LogFormat>, logging: &LoggingConfig) -> Result<()> {
    let format = flag.unwrap_or(if logging.format.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("rowguard={}", logging.level).parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let config = config::load(&config).await?;
            init_tracing(cli.log_format, &config.logging)?;
            cli::check(&config)?;
        }

        Commands::Replay {
            config,
            input,
            command,
            returning,
            parallel,
            limit,
            format,
            metrics,
        } => {
            let config = config::load(&config).await?;
            init_tracing(cli.log_format, &config.logging)?;
            info!(input = %input.display(), "starting replay");
            let options = ReplayOptions {
                command: command.into(),
                returning,
                parallel,
                limit,
                format,
                metrics,
            };
            cli::replay(&config, &input, &options).await?;
        }

        Commands::Version => {
            println!("RowGuard version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
