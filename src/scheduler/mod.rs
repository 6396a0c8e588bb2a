//! Outbound request scheduler.
//!
//! Every GitHub API call passes through a single [`RequestScheduler`]. It
//! provides:
//! - **Admission**: a sliding one-minute budget of completed requests, shared
//!   by the whole process.
//! - **Priority**: high-priority submissions jump ahead of everything still
//!   pending (but never preempt running work).
//! - **Retry**: transient failures are retried in place with exponential
//!   backoff; 401/403 fail immediately.
//!
//! # Example
//!
//! ```ignore
//! use ghdash::scheduler::{RequestScheduler, SchedulerConfig};
//!
//! let scheduler = RequestScheduler::new(SchedulerConfig::from_env());
//! let user = scheduler.submit(move || client.authenticated_user()).await?;
//! scheduler.destroy();
//! ```

mod config;
mod core;
mod error;
mod ledger;
mod retry;
mod task;

pub use config::{BUDGET_ENV_VAR, DEFAULT_MAX_REQUESTS_PER_MINUTE, MAX_BUDGET, SchedulerConfig, parse_budget};
pub use self::core::RequestScheduler;
pub use error::SubmitError;
pub use ledger::TimestampLedger;
pub use retry::{ErrorClass, Retryable, backoff_delay};
pub use task::{Priority, SchedulerStats, TaskHandle, TaskOutcome};
