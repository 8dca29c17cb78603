//! Response delivery from the transport back to a waiting request.

use std::sync::Arc;

use courier_core::{
    CodecError, DeserializeOptions, Deserializer, IncomingResponse, WritePacket,
};
use serde_json::Value;
use tokio::sync::mpsc;

/// Cleanup a transport registers for one published request.
///
/// Runs exactly once, when the response stream completes, fails or is
/// dropped by the caller.
pub type Teardown = Box<dyn FnOnce() + Send>;

/// A teardown that does nothing.
pub fn noop_teardown() -> Teardown {
    Box::new(|| {})
}

/// Where a transport pushes response frames for one request.
///
/// Cheap to clone. Delivery after the caller has gone away is silently
/// dropped.
#[derive(Clone)]
pub struct ResponseSink {
    tx: mpsc::UnboundedSender<WritePacket>,
    deserializer: Arc<dyn Deserializer<Output = IncomingResponse>>,
}

impl ResponseSink {
    pub(crate) fn channel(
        deserializer: Arc<dyn Deserializer<Output = IncomingResponse>>,
    ) -> (Self, mpsc::UnboundedReceiver<WritePacket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, deserializer }, rx)
    }

    /// Deliver a decoded frame. Returns `false` if nobody is listening.
    pub fn deliver(&self, packet: WritePacket) -> bool {
        self.tx.send(packet).is_ok()
    }

    /// Decode a raw wire value and deliver it.
    ///
    /// Values without response markers are treated as a single terminal
    /// response.
    pub fn deliver_raw(&self, raw: Value) -> Result<bool, CodecError> {
        let incoming = self
            .deserializer
            .deserialize(raw, &DeserializeOptions::default())?;
        Ok(self.deliver(incoming.packet))
    }

    /// Whether the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Runs a [`Teardown`] on drop.
pub(crate) struct TeardownGuard(Option<Teardown>);

impl TeardownGuard {
    pub(crate) fn new(teardown: Teardown) -> Self {
        Self(Some(teardown))
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Some(teardown) = self.0.take() {
            teardown();
        }
    }
}
