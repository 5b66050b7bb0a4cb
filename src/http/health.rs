//! Healthcheck endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub environment: String,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub system_info: SystemInfo,
}

/// `GET /v1/healthcheck`.
pub fn routes(environment: &str) -> Router {
    let info = SystemInfo {
        environment: environment.to_string(),
        version: VERSION,
    };
    Router::new()
        .route("/v1/healthcheck", get(healthcheck))
        .with_state(info)
}

async fn healthcheck(State(info): State<SystemInfo>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "available",
        system_info: info,
    })
}
