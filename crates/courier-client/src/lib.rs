//! # courier-client
//!
//! Client half of Courier's message-pattern dispatch layer.
//!
//! - [`ClientProxy`]: lazy request streams, fire-and-forget events and a
//!   single shared connection attempt
//! - [`ClientTransport`]: what a concrete transport implements
//! - [`ResponseSink`] / [`Teardown`]: how a transport hands responses back
//!   and releases per-request resources

#![deny(unsafe_code)]

pub mod errors;
pub mod options;
pub mod proxy;
pub mod sink;
pub mod transport;

pub use errors::{ClientError, INVALID_MESSAGE};
pub use options::ClientOptions;
pub use proxy::{ClientProxy, ResponseStream};
pub use sink::{ResponseSink, Teardown, noop_teardown};
pub use transport::{ClientTransport, EventCallback, OutboundPacket};
