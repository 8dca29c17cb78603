//! Transport strategy contract.
//!
//! A concrete transport (TCP, Redis, NATS, an in-process channel, ...) owns
//! the I/O. It decodes inbound frames and hands them to
//! [`Server::handle_inbound`](crate::Server::handle_inbound), and publishes
//! whatever the server passes to its responder.

use std::any::Any;

use async_trait::async_trait;
use courier_core::TransportError;
use serde_json::Value;

/// Callback invoked once a transport is accepting traffic.
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Callback for transport-specific events.
pub type EventCallback = Box<dyn Fn(Value) + Send + Sync>;

/// Lifecycle contract every server transport implements.
#[async_trait]
pub trait TransportStrategy: Send + Sync {
    /// Start accepting traffic and invoke `ready` once listening.
    async fn listen(&self, ready: ReadyCallback) -> Result<(), TransportError>;

    /// Stop accepting traffic. Calling it twice is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Subscribe to a transport-specific event.
    fn on(&self, event: &str, callback: EventCallback) -> Result<(), TransportError> {
        let _ = (event, callback);
        Err(TransportError::not_implemented("on"))
    }

    /// Borrow the underlying native client or server.
    fn unwrap_native(&self) -> Result<&(dyn Any + Send + Sync), TransportError> {
        Err(TransportError::not_implemented("unwrap"))
    }
}
