//! Connection acceptor.
//!
//! # Responsibilities
//! - Accept TCP connections and serve each one over HTTP/1.1
//! - Attach the peer address to every request as `ConnectInfo`
//! - Own every connection task, so shutdown can close them gracefully or
//!   cut them off
//!
//! # Shutdown
//! ```text
//! graceful broadcast → stop accepting → idle connections close,
//!                      busy ones finish their current request
//! force-close broadcast → abort every connection task, wait until gone
//! ```

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{extract::ConnectInfo, http::Request, Router};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tower::ServiceExt;

/// Pause after an accept error that is not specific to one connection
/// (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Serve `router` on `listener` until `graceful` fires.
///
/// After `graceful`, no new connections are accepted and open ones are asked
/// to close once their in-flight request completes. The future resolves when
/// all of them are gone, or as soon as `force_close` fires, after aborting
/// whatever is still open. No handler code runs after it resolves.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut graceful: broadcast::Receiver<()>,
    mut force_close: broadcast::Receiver<()>,
) -> io::Result<()> {
    let (closing_tx, closing_rx) = watch::channel(false);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::trace!(peer_addr = %peer, "Connection accepted");
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        router.clone(),
                        closing_rx.clone(),
                    ));
                }
                Err(e) if is_connection_error(&e) => {
                    tracing::debug!(error = %e, "Connection failed during accept");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(joined) = connections.join_next() => log_join(joined),
            _ = graceful.recv() => break,
        }
    }

    drop(listener);
    closing_tx.send_replace(true);
    tracing::debug!(open = connections.len(), "Stopped accepting connections");

    let forced = loop {
        tokio::select! {
            joined = connections.join_next() => match joined {
                Some(joined) => log_join(joined),
                None => break false,
            },
            _ = force_close.recv() => break true,
        }
    };

    if forced {
        tracing::warn!(open = connections.len(), "Force closing open connections");
        connections.shutdown().await;
    }
    Ok(())
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    mut closing: watch::Receiver<bool>,
) {
    let service = service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        router.clone().oneshot(request)
    });

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(peer_addr = %peer, error = %e, "Connection closed with error");
            }
            return;
        }
        _ = closing.wait_for(|closing| *closing) => conn.as_mut().graceful_shutdown(),
    }

    if let Err(e) = conn.await {
        tracing::debug!(peer_addr = %peer, error = %e, "Connection closed with error");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Connection task panicked");
        }
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
