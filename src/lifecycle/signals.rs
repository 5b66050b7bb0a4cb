//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGINT and SIGTERM handlers
//! - Forward every received signal to the [`ShutdownCoordinator`]
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Keeps listening after the first signal so duplicates are logged and
//!   ignored instead of falling back to the default (immediate exit)
//! - Other signals keep their default platform behavior

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::{ShutdownCoordinator, ShutdownTrigger};

/// Spawn the signal listener for the life of the process.
pub fn spawn_signal_listener(
    coordinator: Arc<ShutdownCoordinator>,
) -> std::io::Result<JoinHandle<()>> {
    let mut signals = Signals::register()?;
    Ok(tokio::spawn(async move {
        while let Some(trigger) = signals.recv().await {
            coordinator.request_stop(trigger);
        }
    }))
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> Option<ShutdownTrigger> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|()| ShutdownTrigger::Interrupt),
            received = self.terminate.recv() => received.map(|()| ShutdownTrigger::Terminate),
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<ShutdownTrigger> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|()| ShutdownTrigger::Interrupt)
    }
}
