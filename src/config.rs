//! Configuration for leak checks
//!
//! Defaults match what a test suite wants: a 5 second settle budget for tasks
//! that are still unwinding, polled every 50 ms, reading the real `/proc`.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{LeakCheckError, Result};

/// Environment variable overriding [`CheckConfig::settle_timeout`] (milliseconds)
pub const ENV_SETTLE_TIMEOUT_MS: &str = "LEAKCHECK_SETTLE_TIMEOUT_MS";
/// Environment variable overriding [`CheckConfig::poll_interval`] (milliseconds)
pub const ENV_POLL_INTERVAL_MS: &str = "LEAKCHECK_POLL_INTERVAL_MS";
/// Environment variable enabling [`CheckConfig::scan_os_threads`]
pub const ENV_OS_THREADS: &str = "LEAKCHECK_OS_THREADS";

/// Settings for a single leak check
///
/// # Example
/// ```
/// use leakcheck::CheckConfig;
/// use std::time::Duration;
///
/// let config = CheckConfig::default();
/// assert_eq!(config.settle_timeout, Duration::from_secs(5));
/// assert_eq!(config.poll_interval, Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConfig {
    /// How long leftover tasks may keep unwinding before they count as leaked
    pub settle_timeout: Duration,

    /// Delay between task re-enumerations inside the settle budget
    pub poll_interval: Duration,

    /// Mount point of procfs
    pub proc_root: PathBuf,

    /// Also treat OS threads of this process as tasks
    ///
    /// Off by default: a test harness running other tests in parallel starts
    /// worker threads at arbitrary times, which would show up as leaks.
    pub scan_os_threads: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            proc_root: PathBuf::from("/proc"),
            scan_os_threads: false,
        }
    }
}

impl CheckConfig {
    /// Defaults overridden by `LEAKCHECK_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = env_millis(ENV_SETTLE_TIMEOUT_MS)? {
            config.settle_timeout = ms;
        }
        if let Some(ms) = env_millis(ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = ms;
        }
        if let Ok(value) = std::env::var(ENV_OS_THREADS) {
            config.scan_os_threads = parse_flag(ENV_OS_THREADS, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    pub fn with_os_threads(mut self, enabled: bool) -> Self {
        self.scan_os_threads = enabled;
        self
    }

    /// Reject settings that would make the settle loop spin or never poll
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(LeakCheckError::InvalidConfig(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval > self.settle_timeout && !self.settle_timeout.is_zero() {
            return Err(LeakCheckError::InvalidConfig(format!(
                "poll interval {:?} exceeds settle timeout {:?}",
                self.poll_interval, self.settle_timeout
            )));
        }
        Ok(())
    }
}

fn env_millis(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| {
                LeakCheckError::InvalidConfig(format!("{} must be milliseconds, got {:?}", name, value))
            }),
        Err(_) => Ok(None),
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(LeakCheckError::InvalidConfig(format!(
            "{} must be a boolean, got {:?}",
            name, value
        ))),
    }
}
