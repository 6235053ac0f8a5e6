//! Configuration types.
//!
//! Process-level knobs come from the command line (with environment
//! fallbacks); collaborator credentials are read by each collaborator's own
//! `from_env()`.

use clap::Parser;

use crate::error::ConfigError;
use crate::pipeline::queue::DEFAULT_QUEUE_CAPACITY;
use crate::store::DEFAULT_HISTORY_CAPACITY;

pub const DEFAULT_DASHBOARD_PORT: u16 = 8080;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "notify-hub")]
#[command(version)]
#[command(
    about = "Aggregates chat and mail events, flags urgent ones and action items.",
    long_about = None
)]
pub struct Cli {
    /// Log notifications and calendar events instead of sending them
    #[arg(long, env = "NOTIFY_DRY_RUN")]
    pub dry_run: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long)]
    pub debug: bool,

    /// Ingestion queue capacity
    #[arg(long, env = "NOTIFY_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Number of processed records kept for the dashboard
    #[arg(long, env = "NOTIFY_HISTORY_CAPACITY", default_value_t = DEFAULT_HISTORY_CAPACITY)]
    pub history_capacity: usize,

    /// Dashboard port
    #[arg(short, long, env = "NOTIFY_DASHBOARD_PORT", default_value_t = DEFAULT_DASHBOARD_PORT)]
    pub port: u16,
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Substitute logging-only notifier and calendar creator.
    pub dry_run: bool,
    /// Ingestion queue capacity.
    pub queue_capacity: usize,
    /// Store ring buffer capacity.
    pub history_capacity: usize,
    /// Dashboard port.
    pub dashboard_port: u16,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            dashboard_port: DEFAULT_DASHBOARD_PORT,
        }
    }
}

impl PipelineConfig {
    /// Validate parsed arguments.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if cli.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue-capacity".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            dry_run: cli.dry_run,
            queue_capacity: cli.queue_capacity,
            // Zero falls back to the store's default
            history_capacity: if cli.history_capacity == 0 {
                DEFAULT_HISTORY_CAPACITY
            } else {
                cli.history_capacity
            },
            dashboard_port: cli.port,
        })
    }
}
