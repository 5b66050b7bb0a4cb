//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (with peer address)
//!     → listener.rs (accept loop, owns connection tasks)
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID)
//!     → middleware/ (metrics, panic recovery)
//!     → security::rate_limit (admission)
//!     → hosted handler chain (+ health.rs)
//!     → error.rs (JSON error envelope for rejections and faults)
//! ```

pub mod error;
pub mod health;
pub mod listener;
pub mod middleware;
pub mod request;
pub mod server;

pub use error::ApiError;
pub use request::{MakeRequestUuidV4, X_REQUEST_ID};
pub use server::{HttpServer, ServerError};
