//! drawbridge server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!     Client Request      │  ┌─────────┐   ┌───────────┐   ┌──────────┐  │
//!     ────────────────────┼─▶│  http   │──▶│ admission │──▶│ handlers │  │
//!                         │  │ server  │   │ (limiter) │   │          │  │
//!                         │  └─────────┘   └───────────┘   └────┬─────┘  │
//!                         │                                     │ run()  │
//!                         │                                     ▼        │
//!                         │                              ┌────────────┐  │
//!     SIGINT/SIGTERM      │  ┌──────────────────────┐    │   task     │  │
//!     ────────────────────┼─▶│ shutdown coordinator │───▶│ supervisor │  │
//!                         │  │ close → drain → exit │    └────────────┘  │
//!                         │  └──────────────────────┘                    │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;

use drawbridge::config::{read_config, validate_config, ConfigError, ServerConfig};
use drawbridge::http::HttpServer;
use drawbridge::lifecycle::spawn_signal_listener;
use drawbridge::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "drawbridge", version, about = "Rate-limited HTTP server with graceful shutdown")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API server port (binds 0.0.0.0).
    #[arg(long)]
    port: Option<u16>,

    /// Environment (development|staging|production).
    #[arg(long)]
    env: Option<String>,

    /// Enable rate limiting.
    #[arg(long)]
    limiter_enabled: Option<bool>,

    /// Rate limiter maximum requests per second.
    #[arg(long)]
    limiter_rps: Option<f64>,

    /// Rate limiter maximum burst.
    #[arg(long)]
    limiter_burst: Option<u32>,

    /// Trusted CORS origins (space separated).
    #[arg(long)]
    cors_trusted_origins: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.listener.bind_address = SocketAddr::from(([0, 0, 0, 0], port)).to_string();
        }
        if let Some(env) = &self.env {
            config.listener.environment = env.clone();
        }
        if let Some(enabled) = self.limiter_enabled {
            config.rate_limit.enabled = enabled;
        }
        if let Some(rps) = self.limiter_rps {
            config.rate_limit.requests_per_second = rps;
        }
        if let Some(burst) = self.limiter_burst {
            config.rate_limit.burst_size = burst;
        }
        if let Some(origins) = &self.cors_trusted_origins {
            config.cors.trusted_origins = origins.split_whitespace().map(String::from).collect();
        }
    }

    fn load(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => ServerConfig::default(),
        };
        self.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("drawbridge: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&config.observability);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        bind_address = %config.listener.bind_address,
        env = %config.listener.environment,
        limiter_enabled = config.rate_limit.enabled,
        limiter_rps = config.rate_limit.requests_per_second,
        limiter_burst = config.rate_limit.burst_size,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config, Router::new());
    spawn_signal_listener(server.coordinator())?;

    server.run(listener).await?;
    Ok(())
}
