//! CLI argument parsing for Leakcheck

use clap::{Parser, ValueEnum};
use std::time::Duration;

use crate::config::CheckConfig;
use crate::error::Result;

/// Output format for the leak report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text on stderr (default)
    Text,
    /// JSON document on stdout
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "leakcheck")]
#[command(version)]
#[command(
    about = "Run a command and report the processes and temp files it leaves behind",
    long_about = None
)]
pub struct Cli {
    /// How long leftover tasks may keep unwinding (default: 5000, or LEAKCHECK_SETTLE_TIMEOUT_MS)
    #[arg(long = "settle-timeout-ms", value_name = "MS")]
    pub settle_timeout_ms: Option<u64>,

    /// Delay between task polls (default: 50, or LEAKCHECK_POLL_INTERVAL_MS)
    #[arg(long = "poll-interval-ms", value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Report format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Kill and reap leaked descendant processes after reporting them
    #[arg(long = "reap")]
    pub reap: bool,

    /// Enable debug logging to stderr
    #[arg(long = "debug")]
    pub debug: bool,

    /// Command to run (everything after --)
    #[arg(last = true)]
    pub command: Option<Vec<String>>,
}

impl Cli {
    /// Environment configuration with command-line overrides applied
    pub fn check_config(&self) -> Result<CheckConfig> {
        let mut config = CheckConfig::from_env()?;
        if let Some(ms) = self.settle_timeout_ms {
            config.settle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }
}
