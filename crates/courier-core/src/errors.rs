//! Error codes and error types shared across Courier crates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Error code constants ────────────────────────────────────────────

/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Generic not-found.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// No request handler is registered for the pattern.
pub const NO_MESSAGE_HANDLER: &str = "NO_MESSAGE_HANDLER";
/// Capability not implemented by the transport.
pub const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";

/// Message sent back when a request pattern has no handler.
pub const NO_MESSAGE_HANDLER_MESSAGE: &str =
    "There is no matching message handler defined in the remote service.";

/// Diagnostic for an event pattern with no handler.
pub fn no_event_handler(pattern: &str) -> String {
    format!(
        "There is no matching event handler defined in the remote service. Event pattern: {pattern}"
    )
}

/// Structured error carried in [`WritePacket::err`](crate::packet::WritePacket::err).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    /// Build an error body without details.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// JSON form used on the wire.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        let _ = map.insert("code".into(), Value::String(self.code.clone()));
        let _ = map.insert("message".into(), Value::String(self.message.clone()));
        if let Some(details) = &self.details {
            let _ = map.insert("details".into(), details.clone());
        }
        Value::Object(map)
    }
}

/// Error returned by a message or event handler.
#[derive(Clone, Debug, thiserror::Error)]
pub enum HandlerError {
    /// Required parameter missing or wrong type.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// Requested resource not found.
    #[error("{message}")]
    NotFound {
        /// Human-readable message.
        message: String,
    },

    /// Internal handler failure.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Domain-specific error with arbitrary code.
    #[error("{message}")]
    Custom {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<Value>,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::NotFound { .. } => NOT_FOUND,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::Custom { code, .. } => code,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
            details: match self {
                Self::Custom { details, .. } => details.clone(),
                _ => None,
            },
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidParams {
            message: err.to_string(),
        }
    }
}

/// Serializer / deserializer failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON conversion failed.
    #[error("codec JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The value could not be decoded into the expected packet shape.
    #[error("invalid packet shape: {0}")]
    InvalidShape(String),
}

/// Failures reported by a transport.
///
/// `Clone` so a single connection outcome can be handed to every caller
/// waiting on it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport does not offer this capability.
    #[error("Method not implemented: {capability}")]
    NotImplemented {
        /// Name of the missing capability (`on`, `unwrap`, ...).
        capability: String,
    },

    /// Establishing the connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Sending a request failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Sending an event failed.
    #[error("event dispatch failed: {0}")]
    Dispatch(String),

    /// Writing a response back failed.
    #[error("respond failed: {0}")]
    Respond(String),

    /// The transport is closed.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Shorthand for [`TransportError::NotImplemented`].
    pub fn not_implemented(capability: impl Into<String>) -> Self {
        Self::NotImplemented {
            capability: capability.into(),
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &str {
        match self {
            Self::NotImplemented { .. } => NOT_IMPLEMENTED,
            _ => INTERNAL_ERROR,
        }
    }
}
