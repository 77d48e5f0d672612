//! `TaskRegistry` (§4.11/§5).
//!
//! Grounded on `hi-youichi-loom`'s `serve`/`run/delivery.rs` pattern of
//! pairing a `JoinHandle` with a cancellation signal and draining/aborting
//! cleanly on disconnect; generalized here into a registry that also caps
//! concurrent "heavy" (chain / autonomous-loop) tasks with a semaphore and
//! sweeps tasks that overrun their deadline.

use crate::error::ChainError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Tracks one in-flight request: its cancellation token and (for heavy
/// tasks) the semaphore permit that reserves its concurrency slot.
struct TrackedTask {
    cancel: CancellationToken,
    #[allow(dead_code)]
    permit: Option<OwnedSemaphorePermit>,
    deadline_sweeper: JoinHandle<()>,
}

/// An in-flight task's handle, returned by [`TaskRegistry::begin`]. Removes
/// itself from the registry and cancels its deadline sweeper on drop, the
/// same RAII shape as a `JoinHandle` guard.
pub struct TaskGuard {
    id: String,
    registry: TaskRegistry,
    pub cancel: CancellationToken,
}

impl TaskGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            registry.end(&id).await;
        });
    }
}

/// §5's active-task monitor: a concurrency ceiling for heavy tasks plus a
/// per-request deadline sweep.
#[derive(Clone)]
pub struct TaskRegistry {
    heavy_semaphore: Arc<Semaphore>,
    tasks: Arc<RwLock<HashMap<String, TrackedTask>>>,
}

impl TaskRegistry {
    pub fn new(max_concurrent_heavy_tasks: usize) -> Self {
        Self {
            heavy_semaphore: Arc::new(Semaphore::new(max_concurrent_heavy_tasks.max(1))),
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a new in-flight task. `heavy` tasks (chain runs,
    /// autonomous-loop requests) refuse immediately with
    /// [`ChainError::ConcurrencyLimitExceeded`] once the ceiling is already
    /// saturated (§5: "refuses new work above a configured concurrency
    /// ceiling") rather than queuing indefinitely. `deadline` cancels the
    /// returned token automatically once it elapses.
    pub async fn begin(&self, id: impl Into<String>, deadline: Duration, heavy: bool) -> Result<TaskGuard, ChainError> {
        let id = id.into();
        let cancel = CancellationToken::new();

        let permit = if heavy {
            Some(
                self.heavy_semaphore
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| ChainError::ConcurrencyLimitExceeded)?,
            )
        } else {
            None
        };

        let sweep_cancel = cancel.clone();
        let deadline_sweeper = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => sweep_cancel.cancel(),
                _ = sweep_cancel.cancelled() => {}
            }
        });

        self.tasks.write().await.insert(
            id.clone(),
            TrackedTask {
                cancel: cancel.clone(),
                permit,
                deadline_sweeper,
            },
        );

        Ok(TaskGuard {
            id,
            registry: self.clone(),
            cancel,
        })
    }

    async fn end(&self, id: &str) {
        if let Some(task) = self.tasks.write().await.remove(id) {
            task.cancel.cancel();
            task.deadline_sweeper.abort();
        }
    }

    /// Number of currently tracked in-flight tasks.
    pub async fn active_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Cancels a specific in-flight task by id, e.g. on an explicit
    /// caller-initiated abort request.
    pub async fn cancel(&self, id: &str) -> bool {
        if let Some(task) = self.tasks.read().await.get(id) {
            task.cancel.cancel();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_and_drop_removes_the_task() {
        let registry = TaskRegistry::new(2);
        let guard = registry.begin("req-1", Duration::from_secs(10), false).await.unwrap();
        assert_eq!(registry.active_count().await, 1);
        drop(guard);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn heavy_tasks_above_the_ceiling_are_refused_immediately() {
        let registry = TaskRegistry::new(1);
        let first = registry.begin("heavy-1", Duration::from_secs(10), true).await.unwrap();

        let err = registry.begin("heavy-2", Duration::from_secs(10), true).await.unwrap_err();
        assert!(matches!(err, ChainError::ConcurrencyLimitExceeded));

        drop(first);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = registry.begin("heavy-2", Duration::from_secs(10), true).await.unwrap();
        assert_eq!(second.id(), "heavy-2");
    }

    #[tokio::test]
    async fn deadline_sweep_cancels_the_task_automatically() {
        let registry = TaskRegistry::new(2);
        let guard = registry.begin("req-1", Duration::from_millis(20), false).await.unwrap();
        assert!(!guard.is_cancelled());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(guard.is_cancelled());
    }

    #[tokio::test]
    async fn explicit_cancel_marks_the_token() {
        let registry = TaskRegistry::new(2);
        let guard = registry.begin("req-1", Duration::from_secs(10), false).await.unwrap();
        assert!(registry.cancel("req-1").await);
        assert!(guard.is_cancelled());
        assert!(!registry.cancel("missing").await);
    }
}
