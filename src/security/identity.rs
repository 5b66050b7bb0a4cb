//! Client identity extraction.
//!
//! The identity is the key the rate limiter buckets by: the client's IP
//! address. It comes from the peer socket address, or from the first
//! `X-Forwarded-For` entry / `X-Real-IP` when forwarded headers are trusted.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// The request carries no usable client address.
///
/// This is an infrastructure fault, never a throttling decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("peer address missing from request (server not built with connect info)")]
    MissingPeerAddress,

    #[error("malformed {header} header: {value:?}")]
    MalformedHeader { header: &'static str, value: String },
}

/// Derive the identity key for a request.
pub fn client_identity<B>(
    request: &Request<B>,
    trust_forwarded_headers: bool,
) -> Result<String, IdentityError> {
    if trust_forwarded_headers {
        if let Some(ip) = forwarded_ip(request, X_FORWARDED_FOR)? {
            return Ok(ip.to_string());
        }
        if let Some(ip) = forwarded_ip(request, X_REAL_IP)? {
            return Ok(ip.to_string());
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .ok_or(IdentityError::MissingPeerAddress)
}

/// First address in a forwarding header. `Ok(None)` when the header is absent.
fn forwarded_ip<B>(
    request: &Request<B>,
    header: &'static str,
) -> Result<Option<IpAddr>, IdentityError> {
    let Some(value) = request.headers().get(header) else {
        return Ok(None);
    };

    let malformed = || IdentityError::MalformedHeader {
        header,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    };

    let raw = value.to_str().map_err(|_| malformed())?;
    let first = raw.split(',').next().unwrap_or_default().trim();
    first.parse::<IpAddr>().map(Some).map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(peer: Option<&str>, headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::builder().uri("/v1/healthcheck");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[test]
    fn uses_peer_ip_without_port() {
        let req = request(Some("203.0.113.7:51234"), &[]);
        assert_eq!(client_identity(&req, false).unwrap(), "203.0.113.7");

        let req = request(Some("[2001:db8::1]:443"), &[]);
        assert_eq!(client_identity(&req, false).unwrap(), "2001:db8::1");
    }

    #[test]
    fn ignores_forwarded_headers_unless_trusted() {
        let req = request(
            Some("10.0.0.2:4000"),
            &[(X_FORWARDED_FOR, "198.51.100.1, 10.0.0.1")],
        );
        assert_eq!(client_identity(&req, false).unwrap(), "10.0.0.2");
        assert_eq!(client_identity(&req, true).unwrap(), "198.51.100.1");
    }

    #[test]
    fn falls_back_to_real_ip_header() {
        let req = request(Some("10.0.0.2:4000"), &[(X_REAL_IP, "198.51.100.9")]);
        assert_eq!(client_identity(&req, true).unwrap(), "198.51.100.9");
    }

    #[test]
    fn malformed_forwarded_header_is_a_fault() {
        let req = request(Some("10.0.0.2:4000"), &[(X_FORWARDED_FOR, "not-an-ip")]);
        assert_eq!(
            client_identity(&req, true),
            Err(IdentityError::MalformedHeader {
                header: X_FORWARDED_FOR,
                value: "not-an-ip".into(),
            })
        );
    }

    #[test]
    fn missing_peer_address_is_a_fault() {
        let req = request(None, &[]);
        assert_eq!(
            client_identity(&req, false),
            Err(IdentityError::MissingPeerAddress)
        );
    }
}
