//! Shutdown coordination for the server.
//!
//! # Phases
//! ```text
//! Running → StopSignalReceived → ListenerClosing → DrainingTasks → Stopped
//! ```
//! Transitions only move forward. The first error hit while closing the
//! listener or draining is kept and reported once the coordinator stops.

use std::fmt;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::ShutdownConfig;
use crate::lifecycle::tasks::{panic_message, TaskSupervisor};

/// How long the listener gets to tear down connections after a forced
/// close before its task is aborted outright.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Broadcast used to tell long-running loops to stop.
///
/// All long-running tasks subscribe before the server starts serving.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown broadcast.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle phase of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    /// Accepting and serving connections.
    Running,
    /// A stop was requested; no further requests change anything.
    StopSignalReceived,
    /// Listener no longer accepts; open connections are finishing.
    ListenerClosing,
    /// Waiting for background tasks.
    DrainingTasks,
    /// Terminal.
    Stopped,
}

impl ShutdownPhase {
    /// The only phase this one may advance to.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Running => Some(Self::StopSignalReceived),
            Self::StopSignalReceived => Some(Self::ListenerClosing),
            Self::ListenerClosing => Some(Self::DrainingTasks),
            Self::DrainingTasks => Some(Self::Stopped),
            Self::Stopped => None,
        }
    }
}

/// What started the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Programmatic request from embedding code.
    Requested,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Requested => write!(f, "requested"),
        }
    }
}

/// Failures recorded while shutting down.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("listener did not finish open connections within {0:?}; forced closed")]
    ListenerTimeout(Duration),

    #[error("listener failed while shutting down: {0}")]
    Listener(#[from] io::Error),

    #[error("listener task aborted: {0}")]
    ListenerAborted(String),

    #[error("{in_flight} background task(s) still running after {timeout:?}")]
    DrainTimeout { timeout: Duration, in_flight: usize },
}

/// Timing bounds for the shutdown sequence.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownSettings {
    pub listener_timeout: Duration,
    pub drain_timeout: Option<Duration>,
}

impl From<&ShutdownConfig> for ShutdownSettings {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            listener_timeout: config.listener_timeout(),
            drain_timeout: config.drain_timeout(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self::from(&ShutdownConfig::default())
    }
}

/// Drives the server from a stop request to a single terminal outcome.
pub struct ShutdownCoordinator {
    settings: ShutdownSettings,
    phase: watch::Sender<ShutdownPhase>,
    trigger: Mutex<Option<ShutdownTrigger>>,
    error: Mutex<Option<ShutdownError>>,
    notify: Shutdown,
    force_close: Shutdown,
}

impl ShutdownCoordinator {
    pub fn new(settings: ShutdownSettings) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            settings,
            phase,
            trigger: Mutex::new(None),
            error: Mutex::new(None),
            notify: Shutdown::new(),
            force_close: Shutdown::new(),
        }
    }

    pub fn settings(&self) -> ShutdownSettings {
        self.settings
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Watch phase transitions.
    pub fn watch_phase(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    /// The trigger that started the shutdown, once one has.
    pub fn trigger(&self) -> Option<ShutdownTrigger> {
        *self.trigger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to the broadcast fired when the listener starts closing.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.notify.subscribe()
    }

    /// Subscribe to the broadcast fired when open connections outlive the
    /// listener timeout and must be cut off.
    pub fn subscribe_force_close(&self) -> broadcast::Receiver<()> {
        self.force_close.subscribe()
    }

    /// Ask the server to stop.
    ///
    /// Only the first request moves the coordinator out of `Running`;
    /// later ones are logged and ignored. Returns whether this call started
    /// the shutdown.
    pub fn request_stop(&self, trigger: ShutdownTrigger) -> bool {
        let started = self.phase.send_if_modified(|phase| {
            if *phase != ShutdownPhase::Running {
                return false;
            }
            *self.trigger.lock().unwrap_or_else(PoisonError::into_inner) = Some(trigger);
            *phase = ShutdownPhase::StopSignalReceived;
            true
        });

        if started {
            tracing::info!(signal = %trigger, "Shutting down server");
        } else {
            tracing::warn!(
                signal = %trigger,
                phase = ?self.phase(),
                "Shutdown already in progress, ignoring signal"
            );
        }
        started
    }

    /// Wait until a stop has been requested and return its trigger.
    pub async fn stop_requested(&self) -> ShutdownTrigger {
        let mut phase = self.phase.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = phase.wait_for(|p| *p != ShutdownPhase::Running).await;
        self.trigger().unwrap_or(ShutdownTrigger::Requested)
    }

    /// Run the shutdown sequence after a stop has been requested.
    ///
    /// `listener` is the task serving HTTP; it must finish gracefully once the
    /// broadcast from [`subscribe`](Self::subscribe) fires. On timeout the
    /// force-close broadcast fires and the listener task is gone before
    /// draining starts, so no handler can submit work after the drain.
    /// Background tasks are drained even when closing the listener failed.
    pub async fn shutdown(
        &self,
        mut listener: JoinHandle<io::Result<()>>,
        tasks: &TaskSupervisor,
    ) -> Result<(), ShutdownError> {
        self.stop_requested().await;

        self.advance(ShutdownPhase::ListenerClosing);
        tracing::debug!(
            subscribers = self.notify.receiver_count(),
            "Notifying listener and background loops"
        );
        self.notify.trigger();
        let timeout = self.settings.listener_timeout;
        match tokio::time::timeout(timeout, &mut listener).await {
            Ok(Ok(Ok(()))) => tracing::info!("Listener closed"),
            Ok(Ok(Err(e))) => self.record_error(ShutdownError::Listener(e)),
            Ok(Err(join)) => {
                let reason = if join.is_panic() {
                    panic_message(join.into_panic().as_ref())
                } else {
                    join.to_string()
                };
                self.record_error(ShutdownError::ListenerAborted(reason));
            }
            Err(_) => {
                self.record_error(ShutdownError::ListenerTimeout(timeout));
                self.force_close(&mut listener).await;
            }
        }

        self.advance(ShutdownPhase::DrainingTasks);
        tracing::info!(in_flight = tasks.in_flight(), "Completing background tasks");
        match self.settings.drain_timeout {
            None => tasks.drain().await,
            Some(limit) => {
                if tokio::time::timeout(limit, tasks.drain()).await.is_err() {
                    self.record_error(ShutdownError::DrainTimeout {
                        timeout: limit,
                        in_flight: tasks.in_flight(),
                    });
                }
            }
        }

        self.advance(ShutdownPhase::Stopped);
        match self.error.lock().unwrap_or_else(PoisonError::into_inner).take() {
            None => {
                tracing::info!("Shutdown sequence complete");
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    async fn force_close(&self, listener: &mut JoinHandle<io::Result<()>>) {
        self.force_close.trigger();
        if tokio::time::timeout(FORCE_CLOSE_GRACE, &mut *listener).await.is_err() {
            tracing::warn!("Listener ignored forced close, aborting it");
            listener.abort();
            let _ = listener.await;
        }
    }

    fn advance(&self, to: ShutdownPhase) {
        let moved = self.phase.send_if_modified(|phase| {
            if phase.next() == Some(to) {
                *phase = to;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::info!(phase = ?to, "Shutdown phase changed");
        } else {
            tracing::error!(from = ?self.phase(), to = ?to, "Out-of-order shutdown transition");
        }
    }

    /// Keep the first error; later ones are only logged.
    fn record_error(&self, error: ShutdownError) {
        tracing::error!(error = %error, phase = ?self.phase(), "Shutdown step failed");
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(ShutdownSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn settings(listener_ms: u64, drain_ms: Option<u64>) -> ShutdownSettings {
        ShutdownSettings {
            listener_timeout: Duration::from_millis(listener_ms),
            drain_timeout: drain_ms.map(Duration::from_millis),
        }
    }

    /// A listener task that exits as soon as the coordinator broadcasts.
    fn graceful_listener(coordinator: &ShutdownCoordinator) -> JoinHandle<io::Result<()>> {
        let mut rx = coordinator.subscribe();
        tokio::spawn(async move {
            let _ = rx.recv().await;
            Ok(())
        })
    }

    #[test]
    fn phases_only_move_forward() {
        let order = [
            ShutdownPhase::Running,
            ShutdownPhase::StopSignalReceived,
            ShutdownPhase::ListenerClosing,
            ShutdownPhase::DrainingTasks,
            ShutdownPhase::Stopped,
        ];
        for pair in order.windows(2) {
            assert_eq!(pair[0].next(), Some(pair[1]));
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(ShutdownPhase::Stopped.next(), None);
    }

    #[test]
    fn first_stop_request_wins() {
        let coordinator = ShutdownCoordinator::default();
        assert_eq!(coordinator.phase(), ShutdownPhase::Running);

        assert!(coordinator.request_stop(ShutdownTrigger::Terminate));
        assert!(!coordinator.request_stop(ShutdownTrigger::Interrupt));

        assert_eq!(coordinator.phase(), ShutdownPhase::StopSignalReceived);
        assert_eq!(coordinator.trigger(), Some(ShutdownTrigger::Terminate));
    }

    #[tokio::test]
    async fn clean_shutdown_reaches_stopped() {
        let coordinator = ShutdownCoordinator::new(settings(1_000, None));
        let tasks = TaskSupervisor::new();
        let listener = graceful_listener(&coordinator);

        coordinator.request_stop(ShutdownTrigger::Requested);
        coordinator.shutdown(listener, &tasks).await.unwrap();

        assert_eq!(coordinator.phase(), ShutdownPhase::Stopped);
    }

    #[tokio::test]
    async fn phases_are_observed_in_order() {
        let coordinator = Arc::new(ShutdownCoordinator::new(settings(1_000, None)));
        let tasks = TaskSupervisor::new();
        let listener = graceful_listener(&coordinator);

        let mut watch = coordinator.watch_phase();
        let seen = tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                let phase = *watch.borrow_and_update();
                seen.push(phase);
                if phase == ShutdownPhase::Stopped || watch.changed().await.is_err() {
                    break;
                }
            }
            seen
        });

        coordinator.request_stop(ShutdownTrigger::Requested);
        coordinator.shutdown(listener, &tasks).await.unwrap();

        let seen = seen.await.unwrap();
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&ShutdownPhase::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn listener_timeout_is_recorded_and_tasks_still_drain() {
        let coordinator = ShutdownCoordinator::new(settings(100, None));
        let tasks = TaskSupervisor::new();
        let listener: JoinHandle<io::Result<()>> = tokio::spawn(async {
            // A slow client that never finishes.
            std::future::pending::<()>().await;
            Ok(())
        });

        let drained = Arc::new(AtomicBool::new(false));
        let flag = drained.clone();
        tasks.run(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            flag.store(true, Ordering::SeqCst);
        });

        coordinator.request_stop(ShutdownTrigger::Interrupt);
        let err = coordinator.shutdown(listener, &tasks).await.unwrap_err();

        assert!(matches!(
            err,
            ShutdownError::ListenerTimeout(d) if d == Duration::from_millis(100)
        ));
        assert!(drained.load(Ordering::SeqCst));
        assert_eq!(tasks.in_flight(), 0);
        assert_eq!(coordinator.phase(), ShutdownPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_timeout_forces_close_before_draining() {
        let coordinator = Arc::new(ShutdownCoordinator::new(settings(100, None)));
        let tasks = TaskSupervisor::new();

        // Ignores the graceful broadcast, like a connection stuck in a handler.
        let mut force = coordinator.subscribe_force_close();
        let watch = coordinator.watch_phase();
        let forced_during = Arc::new(Mutex::new(None));
        let seen = forced_during.clone();
        let listener: JoinHandle<io::Result<()>> = tokio::spawn(async move {
            let _ = force.recv().await;
            *seen.lock().unwrap() = Some(*watch.borrow());
            Ok(())
        });

        coordinator.request_stop(ShutdownTrigger::Terminate);
        let err = coordinator.shutdown(listener, &tasks).await.unwrap_err();

        assert!(matches!(err, ShutdownError::ListenerTimeout(_)));
        assert_eq!(
            *forced_during.lock().unwrap(),
            Some(ShutdownPhase::ListenerClosing)
        );
        assert_eq!(coordinator.phase(), ShutdownPhase::Stopped);
    }

    #[tokio::test]
    async fn listener_error_is_recorded() {
        let coordinator = ShutdownCoordinator::new(settings(1_000, None));
        let tasks = TaskSupervisor::new();
        let listener: JoinHandle<io::Result<()>> =
            tokio::spawn(async { Err(io::Error::new(io::ErrorKind::Other, "accept failed")) });

        coordinator.request_stop(ShutdownTrigger::Requested);
        let err = coordinator.shutdown(listener, &tasks).await.unwrap_err();
        assert!(matches!(err, ShutdownError::Listener(_)));
    }

    #[tokio::test]
    async fn duplicate_signal_while_draining_changes_nothing() {
        let coordinator = Arc::new(ShutdownCoordinator::new(settings(1_000, None)));
        let tasks = TaskSupervisor::new();
        let listener = graceful_listener(&coordinator);

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        tasks.run(async move {
            let _ = release_rx.await;
        });

        coordinator.request_stop(ShutdownTrigger::Interrupt);
        let runner = {
            let coordinator = coordinator.clone();
            let tasks = tasks.clone();
            tokio::spawn(async move { coordinator.shutdown(listener, &tasks).await })
        };

        let mut watch = coordinator.watch_phase();
        watch
            .wait_for(|p| *p == ShutdownPhase::DrainingTasks)
            .await
            .unwrap();

        assert!(!coordinator.request_stop(ShutdownTrigger::Terminate));
        assert_eq!(coordinator.phase(), ShutdownPhase::DrainingTasks);
        assert_eq!(coordinator.trigger(), Some(ShutdownTrigger::Interrupt));

        release_tx.send(()).unwrap();
        runner.await.unwrap().unwrap();
        assert_eq!(coordinator.phase(), ShutdownPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_drain_reports_stuck_tasks() {
        let coordinator = ShutdownCoordinator::new(settings(1_000, Some(500)));
        let tasks = TaskSupervisor::new();
        let listener = graceful_listener(&coordinator);

        tasks.run(std::future::pending());

        coordinator.request_stop(ShutdownTrigger::Requested);
        let err = coordinator.shutdown(listener, &tasks).await.unwrap_err();

        assert!(matches!(err, ShutdownError::DrainTimeout { in_flight: 1, .. }));
        assert_eq!(coordinator.phase(), ShutdownPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn first_error_is_kept() {
        let coordinator = ShutdownCoordinator::new(settings(100, Some(100)));
        let tasks = TaskSupervisor::new();
        let listener: JoinHandle<io::Result<()>> = tokio::spawn(std::future::pending());
        tasks.run(std::future::pending());

        coordinator.request_stop(ShutdownTrigger::Requested);
        let err = coordinator.shutdown(listener, &tasks).await.unwrap_err();
        assert!(matches!(err, ShutdownError::ListenerTimeout(_)));
    }

    #[test]
    fn trigger_display() {
        assert_eq!(ShutdownTrigger::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownTrigger::Terminate.to_string(), "SIGTERM");
        assert_eq!(ShutdownTrigger::Requested.to_string(), "requested");
    }
}
