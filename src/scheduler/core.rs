//! Scheduler implementation

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::TryJoinAll;
use log::{debug, error, info, warn};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::config::SchedulerConfig;
use super::error::SubmitError;
use super::ledger::TimestampLedger;
use super::retry::{ErrorClass, Retryable, backoff_delay};
use super::task::{Job, PendingTask, Priority, SchedulerStats, TaskHandle, TaskOutcome};

/// Mutable state shared by submitters, running tasks and the pruner.
struct SchedulerState {
    /// Tasks not yet admitted; high priority at the front, FIFO within each class
    pending: VecDeque<PendingTask>,

    /// Number of high-priority tasks at the front of `pending`
    high_pending: usize,

    /// Completions within the current window
    ledger: TimestampLedger,

    /// Admitted tasks that have not settled yet
    in_flight: usize,

    /// Set by `destroy`; nothing is admitted afterwards
    closed: bool,

    stats: SchedulerStats,
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    /// Wakes the pruner so it recomputes its deadline
    wake: Arc<Notify>,
    pruner: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

/// Admits submitted operations against a sliding per-minute budget and
/// retries transient failures with backoff.
///
/// Cloning is cheap and every clone shares the same budget, so one instance
/// is built at startup and handed to each call site. Must be created inside a
/// tokio runtime: construction spawns the background pruner.
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<Inner>,
}

impl RequestScheduler {
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Self {
        debug!("RequestScheduler::new: {:?}", config);
        let wake = Arc::new(Notify::new());
        let inner = Arc::new(Inner {
            state: Mutex::new(SchedulerState {
                pending: VecDeque::new(),
                high_pending: 0,
                ledger: TimestampLedger::new(config.window()),
                in_flight: 0,
                closed: false,
                stats: SchedulerStats::default(),
            }),
            wake: Arc::clone(&wake),
            pruner: Mutex::new(None),
            next_id: AtomicU64::new(1),
            config,
        });

        let pruner = tokio::spawn(run_pruner(Arc::downgrade(&inner), wake, inner.config.prune_interval()));
        *lock(&inner.pruner) = Some(pruner);

        Self { inner }
    }

    /// Submit an operation at normal priority.
    pub fn submit<T, E, F, Fut>(&self, operation: F) -> TaskHandle<T, E>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Retryable + fmt::Display + Send + 'static,
    {
        self.submit_with_priority(operation, Priority::Normal)
    }

    /// Submit an operation; it is queued before this returns.
    ///
    /// The operation is invoked once per attempt. The returned handle settles
    /// exactly once: with the value, with the final error, or with
    /// [`SubmitError::Shutdown`] if the scheduler is destroyed first.
    pub fn submit_with_priority<T, E, F, Fut>(&self, operation: F, priority: Priority) -> TaskHandle<T, E>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Retryable + fmt::Display + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let config = self.inner.config.clone();
        let job: Job = Box::new(move || run_attempts(id, operation, config, tx).boxed());
        let task = PendingTask {
            id,
            priority,
            submitted_at: Instant::now(),
            job,
        };

        let rejected = {
            let mut state = self.inner.state();
            if state.closed {
                Some(task)
            } else {
                state.stats.total_submitted += 1;
                match priority {
                    Priority::High => {
                        let at = state.high_pending;
                        state.pending.insert(at, task);
                        state.high_pending += 1;
                    }
                    Priority::Normal => state.pending.push_back(task),
                }
                state.stats.peak_pending = state.stats.peak_pending.max(state.pending.len());
                None
            }
        };

        match rejected {
            // Dropping the task drops its sender, which settles the handle with Shutdown.
            Some(task) => {
                debug!("Task {} submitted after shutdown, rejecting", task.id);
                drop(task);
            }
            None => {
                debug!("Task {} queued with {} priority", id, priority);
                self.inner.admit_and_signal();
            }
        }

        TaskHandle::new(id, rx)
    }

    /// Submit every operation at normal priority, in order, and wait for all of them.
    ///
    /// Resolves with the values in submission order, or with the first error
    /// to arrive. Tasks that are still running when an error arrives keep
    /// running; their results are discarded.
    pub fn submit_all<T, E, F, Fut, I>(&self, operations: I) -> TryJoinAll<TaskHandle<T, E>>
    where
        I: IntoIterator<Item = F>,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Retryable + fmt::Display + Send + 'static,
    {
        let handles: Vec<_> = operations.into_iter().map(|op| self.submit(op)).collect();
        futures::future::try_join_all(handles)
    }

    /// Stop the background pruner and close the scheduler.
    ///
    /// Pending tasks settle with [`SubmitError::Shutdown`]; admitted tasks run
    /// to completion. Calling it more than once is harmless.
    pub fn destroy(&self) {
        let discarded = {
            let mut state = self.inner.state();
            state.closed = true;
            state.high_pending = 0;
            std::mem::take(&mut state.pending)
        };
        self.inner.stop_pruner();
        if !discarded.is_empty() {
            info!("Scheduler destroyed with {} pending tasks", discarded.len());
        }
        drop(discarded);
    }

    /// Whether `destroy` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state().closed
    }

    /// Get the scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let mut state = self.inner.state();
        state.ledger.prune(Instant::now());
        SchedulerStats {
            pending: state.pending.len(),
            in_flight: state.in_flight,
            ledger_size: state.ledger.len(),
            ..state.stats.clone()
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }
}

impl fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        lock(&self.state)
    }

    /// Start as many pending tasks as the budget allows.
    ///
    /// Returns true when tasks are left waiting on the window.
    fn admit(self: &Arc<Self>) -> bool {
        let budget = self.config.budget();
        let mut ready = Vec::new();

        let blocked = {
            let mut state = self.state();
            if state.closed {
                return false;
            }
            let now = Instant::now();
            let pruned = state.ledger.prune(now);
            if pruned > 0 {
                debug!("Pruned {} ledger entries", pruned);
            }

            // In-flight tasks hold a unit of budget until their timestamp lands in the ledger.
            while state.ledger.len() + state.in_flight < budget {
                let Some(task) = state.pending.pop_front() else {
                    break;
                };
                if task.priority == Priority::High {
                    state.high_pending = state.high_pending.saturating_sub(1);
                }
                state.in_flight += 1;
                ready.push(task);
            }

            if !state.pending.is_empty() {
                debug!(
                    "Budget exhausted: {} pending, {} in flight, {} in window",
                    state.pending.len(),
                    state.in_flight,
                    state.ledger.len()
                );
            }
            !state.pending.is_empty()
        };

        for task in ready {
            self.start(task);
        }

        blocked
    }

    fn admit_and_signal(self: &Arc<Self>) {
        if self.admit() {
            self.wake.notify_one();
        }
    }

    fn start(self: &Arc<Self>, task: PendingTask) {
        let PendingTask {
            id,
            priority,
            submitted_at,
            job,
        } = task;
        debug!(
            "Admitting task {} ({} priority) after {:?}",
            id,
            priority,
            submitted_at.elapsed()
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = job().await;
            inner.finish(id, outcome);
        });
    }

    /// Book a settled task against the budget and admit whatever now fits.
    fn finish(self: &Arc<Self>, id: u64, outcome: TaskOutcome) {
        {
            let mut state = self.state();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.ledger.record(Instant::now());
            match outcome {
                TaskOutcome::Succeeded { attempts } => {
                    state.stats.total_succeeded += 1;
                    state.stats.total_retries += u64::from(attempts.saturating_sub(1));
                }
                TaskOutcome::Failed { attempts } => {
                    state.stats.total_failed += 1;
                    state.stats.total_retries += u64::from(attempts.saturating_sub(1));
                }
                TaskOutcome::Panicked => state.stats.total_panicked += 1,
            }
        }
        debug!("Task {} settled: {:?}", id, outcome);
        self.admit_and_signal();
    }

    /// When the pruner should next run.
    fn next_wake(&self, interval: Duration) -> Instant {
        let periodic = Instant::now() + interval;
        let state = self.state();
        if state.pending.is_empty() {
            return periodic;
        }
        match state.ledger.next_expiry() {
            Some(expiry) => expiry.min(periodic),
            None => periodic,
        }
    }

    fn stop_pruner(&self) {
        if let Some(handle) = lock(&self.pruner).take() {
            debug!("Stopping ledger pruner");
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_pruner();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock cannot leave the counters inconsistent enough to matter.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background ticker: prunes the ledger and admits tasks the window has freed.
///
/// Holds only a weak reference so it never keeps a dropped scheduler alive.
async fn run_pruner(inner: Weak<Inner>, wake: Arc<Notify>, interval: Duration) {
    loop {
        let deadline = match inner.upgrade() {
            Some(inner) => inner.next_wake(interval),
            None => break,
        };

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            // State changed; recompute the deadline.
            _ = wake.notified() => continue,
        }

        match inner.upgrade() {
            Some(inner) => {
                inner.admit();
            }
            None => break,
        }
    }
    debug!("Ledger pruner exiting");
}

/// Run the operation until it succeeds, fails terminally, or runs out of attempts,
/// then settle the caller's handle.
async fn run_attempts<T, E, F, Fut>(
    id: u64,
    mut operation: F,
    config: SchedulerConfig,
    tx: oneshot::Sender<Result<T, SubmitError<E>>>,
) -> TaskOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match invoke(&mut operation).await {
            Ok(Ok(value)) => {
                settle(id, tx, Ok(value));
                return TaskOutcome::Succeeded { attempts: attempt };
            }
            Ok(Err(err)) => err,
            Err(message) => {
                error!("Error processing task {}: operation panicked: {}", id, message);
                settle(id, tx, Err(SubmitError::Panicked(message)));
                return TaskOutcome::Panicked;
            }
        };

        match ErrorClass::of(&err) {
            ErrorClass::Terminal => {
                warn!("Task {} failed with non-retryable error: {}", id, err);
            }
            ErrorClass::Transient if attempt < max_attempts => {
                let delay = backoff_delay(&config, attempt);
                warn!(
                    "Task {} attempt {}/{} failed: {}; retrying in {:?}",
                    id, attempt, max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            ErrorClass::Transient => {
                warn!("Task {} failed after {} attempts: {}", id, attempt, err);
            }
        }

        settle(id, tx, Err(SubmitError::Task(err)));
        return TaskOutcome::Failed { attempts: attempt };
    }
}

/// Call the operation once, turning a panic (while building or polling its future) into an error message.
async fn invoke<T, E, F, Fut>(operation: &mut F) -> Result<Result<T, E>, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let future = std::panic::catch_unwind(AssertUnwindSafe(|| operation())).map_err(panic_message)?;
    AssertUnwindSafe(future).catch_unwind().await.map_err(panic_message)
}

fn settle<T, E>(id: u64, tx: oneshot::Sender<Result<T, SubmitError<E>>>, result: Result<T, SubmitError<E>>) {
    if tx.send(result).is_err() {
        debug!("Task {} settled after its handle was dropped", id);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
