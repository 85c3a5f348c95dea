//! Transport abstraction.
//!
//! One trait covers every channel family the fabric's engines run over, so
//! the RPC and bridge layers above never need to know which one they're
//! talking to. A single [`Frame`] (envelope + any transferables riding
//! alongside it) is the common unit every provider moves; `Transport::send`
//! is the uniform send operation, and the `mpsc` receiver each provider
//! hands back on connect plays the role of a subscription — dropping it
//! unsubscribes without the caller needing to remember a handler reference.

pub mod in_process;
pub mod loopback;
pub mod stream;

use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::rpc::transferable::Transferable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A validated peer identity. For the in-process and stream providers this
/// is an opaque label; for a hypothetical document-frame provider it would
/// be a normalized origin. Handshake responders compare the identity on an
/// inbound message against an expected value before acting on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity(pub String);

impl PeerIdentity {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize a URL-like origin string to `scheme://host[:port]`, omitting
/// the port when it equals the scheme default (80 for http, 443 for https),
/// and rendering `file://` with no host.
pub fn normalize_origin(raw: &str) -> String {
    let raw = raw.trim();
    let Some((scheme, rest)) = raw.split_once("://") else {
        return raw.to_string();
    };
    if scheme.eq_ignore_ascii_case("file") {
        return "file://".to_string();
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) => (h, Some(p)),
        _ => (authority, None),
    };
    let default_port = match scheme.to_ascii_lowercase().as_str() {
        "http" => Some("80"),
        "https" => Some("443"),
        _ => None,
    };
    match port {
        Some(p) if Some(p) != default_port => format!("{scheme}://{host}:{p}"),
        _ => format!("{scheme}://{host}"),
    }
}

/// An envelope plus any transferables riding alongside it. Providers must
/// transmit `transfers` unchanged; only the RPC engine interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub envelope: Envelope,
    #[serde(default)]
    pub transfers: Vec<Transferable>,
}

impl Frame {
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            transfers: Vec::new(),
        }
    }

    pub fn with_transfers(envelope: Envelope, transfers: Vec<Transferable>) -> Self {
        Self { envelope, transfers }
    }
}

/// Uniform send/peer-identity interface over the three concrete channel
/// families. Receiving is modeled as an owned `mpsc::Receiver<Frame>`
/// returned alongside the transport by each provider's connect/accept
/// function, rather than as a trait method, since Rust's ownership rules
/// make an owned stream a more natural "subscription" than a
/// register/unregister handler pair.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Identity of the peer this transport talks to, used by the handshake
    /// responder to validate the originating endpoint.
    fn peer(&self) -> PeerIdentity;

    /// Tear down the underlying connection. After this returns, further
    /// `send` calls are expected to fail and the peer's own read loop is
    /// expected to observe the connection ending. Idempotent: closing an
    /// already-closed transport is a no-op, not an error.
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_default_ports_away() {
        assert_eq!(normalize_origin("https://a.example:443/path"), "https://a.example");
        assert_eq!(normalize_origin("http://a.example:80"), "http://a.example");
        assert_eq!(normalize_origin("https://a.example:8443"), "https://a.example:8443");
        assert_eq!(normalize_origin("file:///home/user/index.html"), "file://");
    }
}
