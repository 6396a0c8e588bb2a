//! ghdash - a GitHub pull request dashboard
//!
//! All GitHub traffic flows through one [`scheduler::RequestScheduler`], which
//! keeps the process inside a per-minute request budget, lets on-screen work
//! jump the queue, and retries transient failures with backoff.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod github;
pub mod scheduler;

pub use error::{GhdashError, Result};
