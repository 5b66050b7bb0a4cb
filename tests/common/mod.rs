//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::{body::Body, extract::ConnectInfo, http::Request, response::Response};
use drawbridge::config::ServerConfig;
use drawbridge::http::{HttpServer, ServerError};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Defaults with a loopback bind address.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config
}

/// Attach a peer address the way `into_make_service_with_connect_info` does.
pub fn from_peer(peer: &str, mut request: Request<Body>) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Bind an ephemeral port and run the server on it.
pub async fn start(server: HttpServer) -> (SocketAddr, JoinHandle<Result<(), ServerError>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(server.run(listener));
    (addr, handle)
}
