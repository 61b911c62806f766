//! Task scheduler owning the process's long-running tasks.
//!
//! # Responsibilities
//! - Spawn component tasks so the runtime knows what is outstanding
//! - Hand each task a cancellation token for cooperative exit
//! - Cancel and abort everything on the emergency path
//!
//! # Design Decisions
//! - Tasks live in a `JoinSet`; aborting is best-effort and a task that has
//!   already passed its last await point may still complete normally
//! - The lock is never held across an await

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Result of cancelling every scheduled task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelReport {
    /// Tasks that acknowledged the abort.
    pub cancelled: usize,
    /// Tasks that finished on their own before the abort landed.
    pub completed: usize,
    /// Tasks still unaccounted for when the wait expired.
    pub unacknowledged: usize,
}

#[derive(Debug, Default)]
pub struct TaskScheduler {
    tasks: Mutex<JoinSet<()>>,
    cancel: CancellationToken,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task owned by the scheduler.
    ///
    /// The closure receives a child token cancelled on emergency shutdown.
    pub fn spawn<F, Fut>(&self, name: &str, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.child_token();
        let fut = f(token);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.spawn(fut);
        tracing::debug!(task = %name, outstanding = tasks.len(), "Task spawned");
    }

    /// Root token; cancelled by `cancel_all`.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tasks spawned and still running. Finished tasks are reaped first.
    pub fn active_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Cancel every task and wait up to `wait` for acknowledgements.
    pub async fn cancel_all(&self, wait: Duration) -> CancelReport {
        self.cancel.cancel();
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        let outstanding = tasks.len();
        if outstanding == 0 {
            return CancelReport::default();
        }
        tracing::warn!(count = outstanding, "Cancelling remaining tasks");
        tasks.abort_all();

        let mut report = CancelReport::default();
        let drained = timeout(wait, async {
            while let Some(result) = tasks.join_next().await {
                match result {
                    Err(e) if e.is_cancelled() => report.cancelled += 1,
                    Err(e) => {
                        tracing::warn!(error = %e, "Task panicked during cancellation");
                        report.completed += 1;
                    }
                    Ok(()) => report.completed += 1,
                }
            }
        })
        .await;

        if drained.is_err() {
            report.unacknowledged = outstanding - report.cancelled - report.completed;
            tracing::warn!(
                unacknowledged = report.unacknowledged,
                "Tasks did not acknowledge cancellation in time"
            );
        }
        // Dropping the set aborts anything still attached.
        drop(tasks);
        report
    }
}
