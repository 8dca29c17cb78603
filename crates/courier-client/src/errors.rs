//! Client-side errors.

use std::time::Duration;

use courier_core::errors::{INTERNAL_ERROR, INVALID_PARAMS};
use courier_core::{CodecError, TransportError};
use serde_json::Value;

/// Message used when a pattern or payload is missing.
pub const INVALID_MESSAGE: &str = "The invalid data or message pattern (undefined/null)";

/// Errors surfaced by [`ClientProxy`](crate::ClientProxy).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Pattern or data was null.
    #[error("{}", INVALID_MESSAGE)]
    InvalidMessage,

    /// The transport failed to connect, publish or dispatch.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A packet could not be serialized or deserialized.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The remote handler failed; carries the `err` payload as sent.
    #[error("remote error: {0}")]
    Remote(Value),

    /// The transport dropped the response sink before the sequence finished.
    #[error("response stream closed before completion")]
    Disconnected,

    /// No response arrived within the deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    /// Machine-readable code. Remote errors report the code they carry.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidMessage => INVALID_PARAMS,
            Self::Transport(err) => err.code(),
            Self::Remote(body) => body
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or(INTERNAL_ERROR),
            Self::Codec(_) | Self::Disconnected | Self::Timeout(_) => INTERNAL_ERROR,
        }
    }

    /// The remote `err` payload, if this is a remote failure.
    pub fn remote_body(&self) -> Option<&Value> {
        match self {
            Self::Remote(body) => Some(body),
            _ => None,
        }
    }
}
