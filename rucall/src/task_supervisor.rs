use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};

#[derive(Debug, Default)]
struct TaskSupervisorState {
    running: AtomicU64,
    /// Cancelled when stop is requested.
    stop: CancellationToken,
    /// Cancelled once the last task has finished.
    stopped: CancellationToken,
}

impl TaskSupervisorState {
    fn finish_async_task(&self) {
        if self.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.stopped.cancel();
        }
    }
}

/// Owns the background tasks of a connection or server.
///
/// Tasks started through [`spawn`](Self::spawn) are cancelled at their next
/// await point once [`stop`](Self::stop) is called or the supervisor is
/// dropped. [`all_stopped`](Self::all_stopped) resolves when every one of
/// them has exited.
#[derive(Debug)]
pub struct TaskSupervisor(Arc<TaskSupervisorState>);

/// Keeps a supervised task counted while alive.
#[derive(Debug)]
pub struct TaskSupervisorGuard(Arc<TaskSupervisorState>);

impl TaskSupervisor {
    /// Creates a supervisor. Must be called inside a tokio runtime.
    #[must_use]
    pub fn create() -> Self {
        let supervisor = Self(Arc::default());

        // holds the count above zero until stop is requested, so that
        // `all_stopped` cannot fire before any task was spawned.
        let guard = supervisor.start_async_task();
        tokio::spawn(async move {
            guard.stopped().await;
        });

        supervisor
    }

    /// Requests every supervised task to stop. Idempotent.
    pub fn stop(&self) {
        self.0.stop.cancel();
    }

    /// Whether stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.stop.is_cancelled()
    }

    /// A guard that requests stop when dropped.
    #[must_use]
    pub fn drop_guard(&self) -> DropGuard {
        self.0.stop.clone().drop_guard()
    }

    /// Resolves once stop has been requested.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }

    /// Resolves once stop has been requested and every supervised task has
    /// exited.
    pub fn all_stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stopped.cancelled()
    }

    /// Counts a task that is driven elsewhere until the guard is dropped.
    #[must_use]
    pub fn start_async_task(&self) -> TaskSupervisorGuard {
        self.0.running.fetch_add(1, Ordering::AcqRel);
        TaskSupervisorGuard(self.0.clone())
    }

    /// Spawns `future` as a supervised task.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.start_async_task();
        tokio::spawn(async move {
            tokio::select! {
                () = guard.stopped() => {}
                () = future => {}
            }
        });
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TaskSupervisorGuard {
    /// Resolves once the supervisor has been asked to stop.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }
}

impl Drop for TaskSupervisorGuard {
    fn drop(&mut self) {
        self.0.finish_async_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_task_supervisor() {
        let task_supervisor = TaskSupervisor::create();
        assert_eq!(task_supervisor.0.running.load(Ordering::Acquire), 1);

        task_supervisor.spawn(std::future::pending());
        task_supervisor.spawn(async {});
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(task_supervisor.0.running.load(Ordering::Acquire), 2);

        task_supervisor.stop();
        assert!(task_supervisor.is_stopped());
        task_supervisor.all_stopped().await;
        assert_eq!(task_supervisor.0.running.load(Ordering::Acquire), 0);
    }
}
