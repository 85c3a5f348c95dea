//! Error taxonomy for the fabric.
//!
//! Splits errors into typed leaf enums (derived with `thiserror`, one enum
//! per concern) that callers can match on, and `anyhow::Result` at call
//! sites that just need to propagate and log.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors raised by a `Transport` implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("peer {0:?} is unknown to this transport")]
    UnknownPeer(String),

    #[error("send timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encoding(#[from] bincode::Error),
}

/// Errors raised while negotiating or maintaining an RPC connection.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake message arrived from an unvalidated peer and was dropped")]
    InvalidPeer,

    #[error("received a handshake reply for unknown connection {0:?}")]
    UnknownConnection(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors surfaced from bridge channel operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("tab id {0:?} is already connected to channel {1:?}")]
    DuplicateTabId(String, String),

    #[error("payload rejected by relay: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("bridge connection closed")]
    Closed,
}

/// A remote exception, marshalled by enumerating the thrown error's own
/// properties (name, message, stack, and any other attached fields) rather
/// than transmitting a live exception object across the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            stack: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

impl From<anyhow::Error> for RemoteError {
    fn from(err: anyhow::Error) -> Self {
        RemoteError::new(err.to_string())
    }
}

/// Converts any call-site error into the wire-level [`RemoteError`] shape,
/// the Rust analogue of "enumerate own properties" from an arbitrary thrown
/// value.
pub trait ToRemoteError {
    fn to_remote_error(&self) -> RemoteError;
}

impl<E: std::error::Error> ToRemoteError for E {
    fn to_remote_error(&self) -> RemoteError {
        RemoteError::new(self.to_string())
    }
}
