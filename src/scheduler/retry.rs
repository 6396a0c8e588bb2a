//! Retry policy: error classification and exponential backoff.
//!
//! Authentication and authorization failures (401/403) are final. Anything
//! else, including timeouts and upstream rate-limit responses, is retried
//! with a doubling delay capped by the config.

use std::time::Duration;

use super::config::SchedulerConfig;

/// Errors the scheduler can classify for retry.
pub trait Retryable {
    /// HTTP-like status carried by the error, if any.
    fn status(&self) -> Option<u16>;

    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool {
        !matches!(self.status(), Some(401) | Some(403))
    }
}

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Propagate immediately without backoff
    Terminal,
    /// Eligible for another attempt
    Transient,
}

impl ErrorClass {
    pub fn of<E: Retryable + ?Sized>(err: &E) -> Self {
        if err.is_retryable() {
            ErrorClass::Transient
        } else {
            ErrorClass::Terminal
        }
    }
}

/// Delay before the attempt that follows failed attempt `attempt` (1-based).
///
/// `min(base * 2^(attempt-1), max)`: 1s, 2s, 4s, 8s, 10s, 10s... with defaults.
pub fn backoff_delay(config: &SchedulerConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let delay_ms = config
        .base_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_backoff_ms);
    Duration::from_millis(delay_ms)
}

impl Retryable for std::io::Error {
    fn status(&self) -> Option<u16> {
        None
    }
}
