//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap the hosted handler chain with the middleware stack
//! - Expose the [`TaskSupervisor`] to handlers
//! - Serve until a stop is requested, then hand over to the
//!   [`ShutdownCoordinator`]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request},
    middleware, Extension, Router,
};
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{CorsConfig, ServerConfig};
use crate::http::health;
use crate::http::listener::serve;
use crate::http::middleware::{recover_panic, track_metrics};
use crate::http::request::{request_id, MakeRequestUuidV4, X_REQUEST_ID};
use crate::lifecycle::{ShutdownCoordinator, ShutdownError, ShutdownSettings, TaskSupervisor};
use crate::security::rate_limit::{rate_limit_middleware, ClientLimiterRegistry, LimiterSettings};

/// Error type for running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener failed before any stop was requested.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    /// Shutdown completed, but a step failed along the way.
    #[error("shutdown error: {0}")]
    Shutdown(#[from] ShutdownError),
}

/// HTTP server hosting an application router.
pub struct HttpServer {
    router: Router,
    config: ServerConfig,
    limiter: Arc<ClientLimiterRegistry>,
    tasks: TaskSupervisor,
    coordinator: Arc<ShutdownCoordinator>,
}

impl HttpServer {
    /// Create a server for `routes`, the application's handler chain.
    ///
    /// `/v1/healthcheck` is added to `routes`.
    pub fn new(config: ServerConfig, routes: Router) -> Self {
        let limiter = Arc::new(ClientLimiterRegistry::new(LimiterSettings::from(
            &config.rate_limit,
        )));
        let tasks = TaskSupervisor::new();
        let coordinator = Arc::new(ShutdownCoordinator::new(ShutdownSettings::from(
            &config.shutdown,
        )));

        let router = Self::build_router(&config, routes, limiter.clone(), tasks.clone());
        Self {
            router,
            config,
            limiter,
            tasks,
            coordinator,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(
        config: &ServerConfig,
        routes: Router,
        limiter: Arc<ClientLimiterRegistry>,
        tasks: TaskSupervisor,
    ) -> Router {
        let router = routes
            .merge(health::routes(&config.listener.environment))
            .layer(Extension(tasks))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.listener.request_timeout_secs,
            )))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

        let router = match cors_layer(&config.cors) {
            Some(cors) => router.layer(cors),
            None => router,
        };

        router
            .layer(CatchPanicLayer::custom(recover_panic))
            .layer(middleware::from_fn(track_metrics))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id(request),
                )
            }))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuidV4))
    }

    /// The fully layered router, without connect info.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Handle for submitting background work.
    pub fn tasks(&self) -> TaskSupervisor {
        self.tasks.clone()
    }

    pub fn limiter(&self) -> Arc<ClientLimiterRegistry> {
        Arc::clone(&self.limiter)
    }

    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Serve on `listener` until a stop is requested and shutdown completes.
    ///
    /// Returns only after the listener has closed and every background task
    /// has finished.
    pub async fn run(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            env = %self.config.listener.environment,
            "Starting server"
        );

        if self.limiter.enabled() {
            self.limiter.spawn_sweeper(self.coordinator.subscribe());
        }

        let mut serving = tokio::spawn(serve(
            listener,
            self.router,
            self.coordinator.subscribe(),
            self.coordinator.subscribe_force_close(),
        ));

        tokio::select! {
            result = &mut serving => {
                // The listener stopped on its own before any stop request.
                let error = match result {
                    Ok(Ok(())) => std::io::Error::other("listener exited unexpectedly"),
                    Ok(Err(e)) => e,
                    Err(join) => std::io::Error::other(join),
                };
                tracing::error!(error = %error, "HTTP server failed");
                return Err(ServerError::Serve(error));
            }
            _ = self.coordinator.stop_requested() => {}
        }

        self.coordinator.shutdown(serving, &self.tasks).await?;
        tracing::info!(address = %addr, "Stopped server");
        Ok(())
    }
}

/// CORS for the trusted origins; `None` when there are none.
fn cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    if config.trusted_origins.is_empty() {
        return None;
    }

    let origins: Vec<HeaderValue> = config
        .trusted_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::OPTIONS, Method::PUT, Method::PATCH, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
    )
}
