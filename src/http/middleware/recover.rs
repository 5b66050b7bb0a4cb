//! Panic recovery for request handlers.

use std::any::Any;

use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};

use crate::http::error::ApiError;
use crate::lifecycle::tasks::panic_message;

/// Turn a handler panic into a server fault and close the connection.
///
/// Used with `tower_http::catch_panic::CatchPanicLayer::custom`.
pub fn recover_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!(panic = %panic_message(panic.as_ref()), "Request handler panicked");

    let mut response = ApiError::ServerFault.into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn panics_become_server_faults() {
        let response = recover_panic(Box::new("handler exploded"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }
}
