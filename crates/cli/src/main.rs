//! crm-perm - manage data permissions on CRM business objects

mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::Commands;
use crm_permission_core::Settings;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Level, debug, error};

#[derive(Parser)]
#[command(name = "crm-perm")]
#[command(about = "Grant, transfer and inspect data permissions on CRM records")]
#[command(version)]
struct Cli {
    /// Settings file (JSON, TOML or YAML)
    #[arg(short = 'c', long, global = true, env = "CRM_PERMISSION_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL, overrides the configured one
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Set logging level, overrides the configured one
    #[arg(short = 'l', long, global = true)]
    log_level: Option<LogLevel>,

    /// Timeout for operations in seconds (0 = no timeout)
    #[arg(short = 't', long, global = true, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        settings.database.url = url;
    }
    logging::init_logging(&settings.logging, cli.log_level.map(Level::from))?;

    debug!(database = %settings.database.url, "Starting crm-perm");

    // Execute command with optional timeout
    let outcome = if cli.timeout == 0 {
        cli.command.execute(settings).await
    } else {
        let timeout_duration = Duration::from_secs(cli.timeout);
        match tokio::time::timeout(timeout_duration, cli.command.execute(settings)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Command timed out after {} seconds", cli.timeout);
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = outcome {
        error!("Command failed: {e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    Ok(())
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
        }
    }
}
