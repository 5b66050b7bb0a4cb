//! Supervised background work.
//!
//! Request handlers hand fire-and-forget work (sending a notification,
//! writing an audit record) to a [`TaskSupervisor`]. The supervisor counts
//! every unit of work from the moment it is submitted until it finishes, so
//! shutdown can wait for all of it via [`TaskSupervisor::drain`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Notify;

use crate::observability::metrics;

const DEFAULT_TASK_NAME: &str = "background";

#[derive(Debug, Default)]
struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Tracks background tasks and isolates their panics.
///
/// Cheap to clone; all clones share the same in-flight count.
#[derive(Debug, Clone, Default)]
pub struct TaskSupervisor {
    inner: Arc<Inner>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an async unit of work.
    ///
    /// The in-flight count is incremented before this returns, so a
    /// [`drain`](Self::drain) started afterwards always waits for `task`.
    pub fn run<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.run_named(DEFAULT_TASK_NAME, task);
    }

    /// Like [`run`](Self::run), with a label used when logging a panic.
    pub fn run_named<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.track(name);
        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                report_panic(name, panic);
            }
            drop(guard);
        });
    }

    /// Schedule a synchronous closure on the blocking thread pool.
    pub fn run_blocking<F>(&self, name: &'static str, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.track(name);
        tokio::task::spawn_blocking(move || {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
                report_panic(name, panic);
            }
            drop(guard);
        });
    }

    /// Number of tasks submitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Wait until no task is in flight.
    ///
    /// Returns immediately when nothing was ever submitted.
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            // Register before checking the count so a wakeup between the
            // check and the await is not lost.
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn track(&self, name: &'static str) -> TaskGuard {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        metrics::record_task_started();
        tracing::trace!(task = name, in_flight = self.in_flight(), "Background task submitted");
        TaskGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Decrements the in-flight count exactly once, when dropped.
///
/// Dropping also covers a task that is cancelled by the runtime shutting down.
struct TaskGuard {
    inner: Arc<Inner>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        metrics::record_task_finished();
        if self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

fn report_panic(name: &'static str, panic: Box<dyn Any + Send>) {
    let message = panic_message(panic.as_ref());
    metrics::record_task_panic(name);
    tracing::error!(task = name, panic = %message, "Background task panicked");
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
