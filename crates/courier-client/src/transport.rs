//! Client transport contract.

use std::any::Any;

use async_trait::async_trait;
use courier_core::{Event, Request, TransportError};
use serde_json::Value;

use crate::sink::{ResponseSink, Teardown};

/// A packet on its way out, alongside its serialized wire form.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundPacket<P> {
    /// The canonical packet.
    pub packet: P,
    /// What the serializer produced for the wire.
    pub wire: Value,
}

/// Callback for transport-specific events.
pub type EventCallback = Box<dyn Fn(Value) + Send + Sync>;

/// The I/O half of a [`ClientProxy`](crate::ClientProxy).
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Establish the connection. The proxy never calls this concurrently.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear the connection down.
    async fn close(&self) -> Result<(), TransportError>;

    /// Send a request and route every response frame carrying its id into
    /// `sink`. The returned teardown releases whatever was registered.
    ///
    /// Runs on its own task. If the caller gave up while this was pending,
    /// the proxy runs the returned teardown as soon as it arrives.
    async fn publish(
        &self,
        request: OutboundPacket<Request>,
        sink: ResponseSink,
    ) -> Result<Teardown, TransportError>;

    /// Send a fire-and-forget event.
    async fn dispatch_event(&self, event: OutboundPacket<Event>) -> Result<(), TransportError>;

    /// Subscribe to a transport-specific event.
    fn on(&self, event: &str, callback: EventCallback) -> Result<(), TransportError> {
        let _ = (event, callback);
        Err(TransportError::not_implemented("on"))
    }

    /// Borrow the underlying native client.
    fn unwrap_native(&self) -> Result<&(dyn Any + Send + Sync), TransportError> {
        Err(TransportError::not_implemented("unwrap"))
    }
}
