//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Background work (tasks.rs):
//!     Handler → TaskSupervisor::run → counted until finished (panics caught)
//!
//! Shutdown (shutdown.rs):
//!     Stop requested → Close listener (bounded) → Drain tasks → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → ShutdownCoordinator::request_stop
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, finish connections, drain tasks, exit
//! - Listener shutdown has a timeout: forced close after the deadline
//! - Draining is unbounded unless configured otherwise
//! - A failed listener shutdown never skips the drain

pub mod shutdown;
pub mod signals;
pub mod tasks;

pub use shutdown::{
    Shutdown, ShutdownCoordinator, ShutdownError, ShutdownPhase, ShutdownSettings,
    ShutdownTrigger,
};
pub use signals::spawn_signal_listener;
pub use tasks::TaskSupervisor;
