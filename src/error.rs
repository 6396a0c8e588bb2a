//! Error types for ghdash
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::github::ApiError;
use crate::scheduler::SubmitError;

/// All error types that can occur in ghdash
#[derive(Debug, Error)]
pub enum GhdashError {
    /// Repository argument not in `owner/name` form
    #[error("Invalid repository '{0}': expected owner/name")]
    InvalidRepo(String),

    /// Configuration could not be loaded or failed validation
    #[error("Config error: {0}")]
    Config(String),

    /// GitHub API error
    #[error("GitHub API error: {0}")]
    Api(#[from] ApiError),

    /// The scheduler shut down or a task panicked before producing a result
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl From<SubmitError<ApiError>> for GhdashError {
    fn from(err: SubmitError<ApiError>) -> Self {
        match err {
            SubmitError::Task(api) => GhdashError::Api(api),
            other => GhdashError::Scheduler(other.to_string()),
        }
    }
}

/// Result type alias for ghdash operations
pub type Result<T> = std::result::Result<T, GhdashError>;
