//! Task management for the Vela node.
//!
//! [`TaskManager`] owns the shutdown signal and watches critical tasks;
//! [`TaskExecutor`] is the cheap, cloneable spawner handed to components.
//!
//! Three kinds of tasks exist:
//!
//! - regular tasks, dropped when shutdown fires;
//! - critical tasks, whose panic is reported through the [`TaskManager`] future;
//! - graceful tasks, which receive a [`GracefulShutdown`] future and hold its
//!   guard until their in-flight work is done. [`TaskManager::graceful_shutdown_with_timeout`]
//!   waits for those guards, bounded by a grace period.

use std::{
    any::Any,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures_util::{
    FutureExt,
    future::{Either, select},
};
use tokio::{
    runtime::Handle,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
};
use tracing::{debug, error};
use tracing_futures::Instrument;

use crate::metrics::{TaskKind, TaskLifetime, UNNAMED_TASK, record_panic};

mod metrics;
mod shutdown;

pub use shutdown::{GracefulShutdown, GracefulShutdownGuard, Shutdown, Signal, signal};
use shutdown::GracefulTasks;

/// A critical task panicked.
#[derive(Debug, Clone, thiserror::Error)]
#[error("critical task `{task_name}` panicked: `{}`", .error.as_deref().unwrap_or("unknown"))]
pub struct PanickedTaskError {
    task_name: &'static str,
    error: Option<String>,
}

impl PanickedTaskError {
    fn new(task_name: &'static str, error: Box<dyn Any + Send>) -> Self {
        let error = match error.downcast::<String>() {
            Ok(value) => Some(*value),
            Err(error) => error.downcast::<&str>().ok().map(|s| s.to_string()),
        };
        Self { task_name, error }
    }

    /// Name of the task that panicked.
    pub fn task_name(&self) -> &'static str {
        self.task_name
    }
}

/// Owns the shutdown signal for every task spawned through its executors.
///
/// Polling the manager as a future resolves with an error as soon as a critical
/// task panics.
pub struct TaskManager {
    handle: Handle,
    panicked_tasks_tx: UnboundedSender<PanickedTaskError>,
    panicked_tasks_rx: UnboundedReceiver<PanickedTaskError>,
    signal: Option<Signal>,
    on_shutdown: Shutdown,
    graceful_tasks: Arc<GracefulTasks>,
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("graceful_tasks", &self.graceful_tasks.count())
            .field("signalled", &self.signal.is_none())
            .finish()
    }
}

impl TaskManager {
    /// Create a task manager on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Create a task manager spawning onto the given runtime.
    pub fn new(handle: Handle) -> Self {
        let (panicked_tasks_tx, panicked_tasks_rx) = unbounded_channel();
        let (signal, on_shutdown) = signal();
        Self {
            handle,
            panicked_tasks_tx,
            panicked_tasks_rx,
            signal: Some(signal),
            on_shutdown,
            graceful_tasks: Arc::new(GracefulTasks::default()),
        }
    }

    /// Returns a new executor spawning onto this manager's runtime.
    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor {
            handle: self.handle.clone(),
            on_shutdown: self.on_shutdown.clone(),
            panicked_tasks_tx: self.panicked_tasks_tx.clone(),
            graceful_tasks: Arc::clone(&self.graceful_tasks),
        }
    }

    /// Fire the shutdown signal. Idempotent.
    pub fn fire_shutdown_signal(&mut self) {
        if let Some(signal) = self.signal.take() {
            debug!("firing task shutdown signal");
            signal.fire();
        }
    }

    /// Fire the shutdown signal and wait for graceful tasks to release their
    /// guards, at most `timeout`.
    ///
    /// Returns `true` if every graceful task finished within the grace period.
    pub async fn graceful_shutdown_with_timeout(mut self, timeout: Duration) -> bool {
        self.fire_shutdown_signal();
        let finished = self.graceful_tasks.wait_idle(timeout).await;
        if finished {
            debug!("all graceful tasks finished");
        } else {
            error!(
                remaining = self.graceful_tasks.count(),
                ?timeout,
                "graceful tasks did not finish within grace period"
            );
        }
        finished
    }
}

impl Future for TaskManager {
    type Output = Result<(), PanickedTaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.panicked_tasks_rx.poll_recv(cx) {
            Poll::Ready(Some(err)) => Poll::Ready(Err(err)),
            // The manager holds a sender itself, so the channel never closes.
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Cloneable spawner tied to a [`TaskManager`]'s shutdown signal.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    handle: Handle,
    on_shutdown: Shutdown,
    panicked_tasks_tx: UnboundedSender<PanickedTaskError>,
    graceful_tasks: Arc<GracefulTasks>,
}

impl TaskExecutor {
    /// The runtime handle tasks are spawned on.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The shutdown future shared by every task of this executor.
    pub fn on_shutdown_signal(&self) -> &Shutdown {
        &self.on_shutdown
    }

    /// Spawn a regular task. It is dropped when shutdown fires.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let on_shutdown = self.on_shutdown.clone();
        let finished = TaskLifetime::start(TaskKind::Regular, UNNAMED_TASK);

        let task = async move {
            let _finished = finished;
            let fut = std::pin::pin!(fut);
            let _ = select(on_shutdown, fut).await;
        };
        self.handle.spawn(task.in_current_span())
    }

    /// Spawn a critical task. A panic is reported to the [`TaskManager`].
    pub fn spawn_critical<F>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let panicked_tasks_tx = self.panicked_tasks_tx.clone();
        let on_shutdown = self.on_shutdown.clone();
        let finished = TaskLifetime::start(TaskKind::Critical, name);

        let task = async move {
            let _finished = finished;
            let fut = AssertUnwindSafe(fut).catch_unwind().map(move |result| {
                if let Err(panic) = result {
                    record_panic(name);
                    let err = PanickedTaskError::new(name, panic);
                    error!(task = name, error = %err, "critical task panicked");
                    let _ = panicked_tasks_tx.send(err);
                }
            });
            let fut = std::pin::pin!(fut);
            let _ = select(on_shutdown, fut).await;
        };
        self.handle
            .spawn(task.instrument(tracing::info_span!("task", name)))
    }

    /// Spawn a task that receives a [`GracefulShutdown`] future.
    ///
    /// The task should await the future alongside its work and hold the
    /// returned guard until cleanup is done; shutdown waits for the guard.
    pub fn spawn_with_graceful_shutdown_signal<F, Fut>(
        &self,
        name: &'static str,
        f: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(GracefulShutdown) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let guard = shutdown::GracefulShutdownGuard::new(Arc::clone(&self.graceful_tasks));
        let shutdown = GracefulShutdown::new(self.on_shutdown.clone(), guard);
        let finished = TaskLifetime::start(TaskKind::Graceful, name);

        let fut = f(shutdown);
        let task = async move {
            let _finished = finished;
            fut.await;
            debug!(task = name, "graceful task finished");
        };
        self.handle
            .spawn(task.instrument(tracing::info_span!("task", name)))
    }

    /// Run `fut` until shutdown fires; returns `None` if it was cut short.
    pub async fn until_shutdown<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        let fut = std::pin::pin!(fut);
        match select(self.on_shutdown.clone(), fut).await {
            Either::Left(_) => None,
            Either::Right((output, _)) => Some(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_regular_task_cancelled_on_shutdown() {
        let mut manager = TaskManager::current();
        let executor = manager.executor();

        let handle = executor.spawn(std::future::pending());
        manager.fire_shutdown_signal();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_critical_panic_resolves_manager() {
        let manager = TaskManager::current();
        let executor = manager.executor();

        executor.spawn_critical("boom", async { panic!("intentional") });

        let err = manager.await.unwrap_err();
        assert_eq!(err.task_name(), "boom");
        assert!(err.to_string().contains("intentional"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown_waits_for_guard() {
        let manager = TaskManager::current();
        let executor = manager.executor();
        let cleaned_up = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cleaned_up);
        executor.spawn_with_graceful_shutdown_signal("cleanup", |shutdown| async move {
            let guard = shutdown.await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            drop(guard);
        });

        assert!(manager.graceful_shutdown_with_timeout(Duration::from_secs(1)).await);
        assert!(cleaned_up.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_shutdown_times_out() {
        let manager = TaskManager::current();
        let executor = manager.executor();

        executor.spawn_with_graceful_shutdown_signal("stuck", |shutdown| async move {
            let _guard = shutdown.await;
            std::future::pending::<()>().await;
        });

        assert!(!manager.graceful_shutdown_with_timeout(Duration::from_millis(200)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_shutdown() {
        let mut manager = TaskManager::current();
        let executor = manager.executor();

        assert_eq!(executor.until_shutdown(async { 7 }).await, Some(7));

        manager.fire_shutdown_signal();
        let result = executor.until_shutdown(std::future::pending::<()>()).await;
        assert!(result.is_none());
    }
}
