//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, timeouts > 0)
//! - Enforce the eviction invariant: idle threshold > sweep interval
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::HeaderValue;

use crate::config::schema::ServerConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("listener.request_timeout_secs must be greater than zero")]
    RequestTimeout,

    #[error("rate_limit.requests_per_second must be a positive number, got {0}")]
    RequestsPerSecond(f64),

    #[error("rate_limit.burst_size must be at least 1")]
    BurstSize,

    #[error("rate_limit.sweep_interval_secs must be greater than zero")]
    SweepInterval,

    #[error("rate_limit.idle_eviction_secs ({idle}) must exceed sweep_interval_secs ({sweep})")]
    IdleEviction { idle: u64, sweep: u64 },

    #[error("shutdown.listener_timeout_secs must be greater than zero")]
    ListenerTimeout,

    #[error("shutdown.drain_timeout_secs must be greater than zero when set")]
    DrainTimeout,

    #[error("cors.trusted_origins entry `{0}` is not a valid header value")]
    TrustedOrigin(String),
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::RequestTimeout);
    }

    let limits = &config.rate_limit;
    if !limits.requests_per_second.is_finite() || limits.requests_per_second <= 0.0 {
        errors.push(ValidationError::RequestsPerSecond(limits.requests_per_second));
    }
    if limits.burst_size == 0 {
        errors.push(ValidationError::BurstSize);
    }
    if limits.sweep_interval_secs == 0 {
        errors.push(ValidationError::SweepInterval);
    }
    if limits.idle_eviction_secs <= limits.sweep_interval_secs {
        errors.push(ValidationError::IdleEviction {
            idle: limits.idle_eviction_secs,
            sweep: limits.sweep_interval_secs,
        });
    }

    if config.shutdown.listener_timeout_secs == 0 {
        errors.push(ValidationError::ListenerTimeout);
    }
    if config.shutdown.drain_timeout_secs == Some(0) {
        errors.push(ValidationError::DrainTimeout);
    }

    for origin in &config.cors.trusted_origins {
        if HeaderValue::from_str(origin).is_err() {
            errors.push(ValidationError::TrustedOrigin(origin.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
