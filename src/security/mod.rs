//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (resolve client identity from peer/forwarded address)
//!     → rate_limit.rs (per-client token bucket admission)
//!     → Pass to handler chain
//! ```
//!
//! # Design Decisions
//! - A rejected request never reaches the handler chain
//! - An unresolvable identity is a server fault, not a throttling decision
//! - Disabled limiting bypasses all bookkeeping

pub mod identity;
pub mod rate_limit;

pub use identity::{client_identity, IdentityError};
pub use rate_limit::{rate_limit_middleware, ClientLimiterRegistry, LimiterSettings};
