//! Queue types for the scheduler

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::error::SubmitError;

/// Where a submission lands in the pending list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Appended to the back of the pending list
    #[default]
    Normal,
    /// Inserted at the front of the pending list
    High,
}

impl From<bool> for Priority {
    fn from(high: bool) -> Self {
        if high { Priority::High } else { Priority::Normal }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// How an admitted task ended. Feeds the scheduler statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
    Panicked,
}

/// Type-erased body of a task: runs every attempt and settles the caller's handle.
pub(crate) type Job = Box<dyn FnOnce() -> BoxFuture<'static, TaskOutcome> + Send>;

/// A submission waiting for admission.
pub(crate) struct PendingTask {
    pub id: u64,
    pub priority: Priority,
    pub submitted_at: Instant,
    pub job: Job,
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("submitted_at", &self.submitted_at)
            .finish_non_exhaustive()
    }
}

/// Caller's side of a submission; resolves exactly once with the task's result.
///
/// Dropping the handle does not cancel the task. It still runs and still
/// consumes budget, its result is simply discarded.
#[must_use = "a TaskHandle does nothing unless awaited"]
#[derive(Debug)]
pub struct TaskHandle<T, E> {
    id: u64,
    rx: oneshot::Receiver<Result<T, SubmitError<E>>>,
}

impl<T, E> TaskHandle<T, E> {
    pub(crate) fn new(id: u64, rx: oneshot::Receiver<Result<T, SubmitError<E>>>) -> Self {
        Self { id, rx }
    }

    /// Scheduler-assigned id, matching the ids in log lines.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, SubmitError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without settling: the task was discarded by shutdown.
            Poll::Ready(Err(_)) => Poll::Ready(Err(SubmitError::Shutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Snapshot of scheduler counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub pending: usize,
    pub in_flight: usize,
    pub ledger_size: usize,
    pub total_submitted: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_retries: u64,
    pub total_panicked: u64,
    pub peak_pending: usize,
}

impl SchedulerStats {
    /// Tasks that reached a terminal outcome.
    pub fn total_settled(&self) -> u64 {
        self.total_succeeded + self.total_failed + self.total_panicked
    }
}
