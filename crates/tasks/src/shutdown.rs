//! Shutdown signals shared between the task manager and spawned tasks.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll, ready},
    time::Duration,
};

use futures_util::{
    FutureExt,
    future::{FusedFuture, Shared},
};
use tokio::sync::{Notify, oneshot};

/// A future that resolves when the shutdown signal has been fired.
#[derive(Debug, Clone)]
pub struct Shutdown(Shared<oneshot::Receiver<()>>);

impl Future for Shutdown {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pin = self.get_mut();
        if pin.0.is_terminated() || pin.0.poll_unpin(cx).is_ready() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Fires the shutdown signal when consumed or dropped.
#[derive(Debug)]
pub struct Signal(oneshot::Sender<()>);

impl Signal {
    /// Fire the signal manually.
    pub fn fire(self) {
        let _ = self.0.send(());
    }
}

/// Create a connected signal/shutdown pair.
pub fn signal() -> (Signal, Shutdown) {
    let (sender, receiver) = oneshot::channel();
    (Signal(sender), Shutdown(receiver.shared()))
}

/// Number of tasks still holding a [`GracefulShutdownGuard`].
#[derive(Debug, Default)]
pub(crate) struct GracefulTasks {
    count: AtomicUsize,
    idle: Notify,
}

impl GracefulTasks {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until every guard is dropped, or `timeout` elapses.
    ///
    /// Returns `true` if all graceful tasks finished in time.
    pub(crate) async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return self.count() == 0;
            }
        }
    }
}

/// Held by a task until its shutdown cleanup is complete.
#[derive(Debug)]
#[must_use = "the guard must be held until cleanup has finished"]
pub struct GracefulShutdownGuard(Arc<GracefulTasks>);

impl GracefulShutdownGuard {
    pub(crate) fn new(tasks: Arc<GracefulTasks>) -> Self {
        tasks.count.fetch_add(1, Ordering::SeqCst);
        Self(tasks)
    }
}

impl Drop for GracefulShutdownGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// A shutdown future that hands out a [`GracefulShutdownGuard`] when it fires.
///
/// The task keeps the guard alive while it finishes in-flight work; the task
/// manager waits for all guards to drop (bounded by the grace period).
#[derive(Debug)]
pub struct GracefulShutdown {
    shutdown: Shutdown,
    guard: Option<GracefulShutdownGuard>,
}

impl GracefulShutdown {
    pub(crate) const fn new(shutdown: Shutdown, guard: GracefulShutdownGuard) -> Self {
        Self {
            shutdown,
            guard: Some(guard),
        }
    }
}

impl Future for GracefulShutdown {
    type Output = GracefulShutdownGuard;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        ready!(self.shutdown.poll_unpin(cx));
        // A completed future stays pending; the guard is handed out once.
        match self.get_mut().guard.take() {
            Some(guard) => Poll::Ready(guard),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_fires() {
        let (signal, shutdown) = signal();
        let waiter = tokio::spawn(shutdown.clone());
        signal.fire();
        waiter.await.unwrap();
        // already fired shutdowns resolve immediately
        shutdown.await;
    }

    #[tokio::test]
    async fn test_dropped_signal_fires() {
        let (signal, shutdown) = signal();
        drop(signal);
        shutdown.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_tracks_guards() {
        let tasks = Arc::new(GracefulTasks::default());
        let guard = GracefulShutdownGuard::new(Arc::clone(&tasks));
        assert_eq!(tasks.count(), 1);

        assert!(!tasks.wait_idle(Duration::from_millis(50)).await);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(guard);
        });
        assert!(tasks.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(tasks.count(), 0);
    }
}
