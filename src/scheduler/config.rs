//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable that overrides the per-minute request budget.
pub const BUDGET_ENV_VAR: &str = "MAX_REQUESTS_PER_MINUTE";

/// Budget used when none is configured or the configured value is unusable.
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 200;

/// Largest budget accepted from configuration.
pub const MAX_BUDGET: u32 = 5000;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max completed requests per rate window
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,

    /// Total invocations of an operation, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound on any single backoff delay, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Rate window duration in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// How often the background pruner runs when nothing else wakes it
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_max_requests_per_minute() -> u32 {
    DEFAULT_MAX_REQUESTS_PER_MINUTE
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_window_secs() -> u64 {
    60
}

fn default_prune_interval_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: default_max_requests_per_minute(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            window_secs: default_window_secs(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    /// Config with the given budget and default retry policy.
    pub fn with_budget(max_requests_per_minute: u32) -> Self {
        Self {
            max_requests_per_minute,
            ..Default::default()
        }
    }

    /// Default config with the budget taken from `MAX_REQUESTS_PER_MINUTE`.
    pub fn from_env() -> Self {
        let raw = std::env::var(BUDGET_ENV_VAR).ok();
        Self::with_budget(parse_budget(raw.as_deref()))
    }

    /// Get the rate window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Get the prune interval as a Duration
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs.max(1))
    }

    /// Budget actually enforced; zero is treated as one so admission can never stall forever.
    pub fn budget(&self) -> usize {
        self.max_requests_per_minute.max(1) as usize
    }
}

/// Parse a budget setting, falling back to the default for missing,
/// non-numeric, or out-of-range input.
pub fn parse_budget(raw: Option<&str>) -> u32 {
    match raw.map(str::trim).map(str::parse::<u32>) {
        Some(Ok(value)) if (1..=MAX_BUDGET).contains(&value) => value,
        Some(_) => {
            log::warn!(
                "Ignoring invalid {} value {:?}, using {}",
                BUDGET_ENV_VAR,
                raw,
                DEFAULT_MAX_REQUESTS_PER_MINUTE
            );
            DEFAULT_MAX_REQUESTS_PER_MINUTE
        }
        None => DEFAULT_MAX_REQUESTS_PER_MINUTE,
    }
}
