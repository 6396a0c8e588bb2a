//! Settlement errors for scheduled tasks

use thiserror::Error;

use super::retry::Retryable;

/// Why a submitted task did not produce a value.
#[derive(Debug, Error)]
pub enum SubmitError<E> {
    /// The operation's own error from its final attempt, unchanged
    #[error(transparent)]
    Task(E),

    /// The scheduler was destroyed before the task was admitted
    #[error("Scheduler shut down before the task ran")]
    Shutdown,

    /// The operation panicked instead of returning an error
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl<E> SubmitError<E> {
    /// The operation's error, if that is what ended the task.
    pub fn task_error(&self) -> Option<&E> {
        match self {
            SubmitError::Task(err) => Some(err),
            _ => None,
        }
    }

    /// Unwrap into the operation's error, if that is what ended the task.
    pub fn into_task_error(self) -> Option<E> {
        match self {
            SubmitError::Task(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, SubmitError::Shutdown)
    }
}

impl<E: Retryable> Retryable for SubmitError<E> {
    fn status(&self) -> Option<u16> {
        self.task_error().and_then(Retryable::status)
    }

    fn is_retryable(&self) -> bool {
        match self {
            SubmitError::Task(err) => err.is_retryable(),
            SubmitError::Shutdown | SubmitError::Panicked(_) => false,
        }
    }
}
