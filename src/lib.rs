//! Admission control and lifecycle coordination for HTTP services.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::ServerConfig;
pub use http::{HttpServer, ServerError};
pub use lifecycle::{ShutdownCoordinator, TaskSupervisor};
pub use security::ClientLimiterRegistry;
