//! Cross-cutting request middleware.

pub mod metrics;
pub mod recover;

pub use metrics::track_metrics;
pub use recover::recover_panic;
