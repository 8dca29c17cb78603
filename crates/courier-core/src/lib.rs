//! # courier-core
//!
//! Foundation types shared by the Courier server and client.
//!
//! - **Packets**: `Request`, `Event`, `WritePacket` and their wire names
//! - **Patterns**: `Pattern` values and the canonical `Route` they normalize to
//! - **Codecs**: consumer/producer deserializers over a single `WireShape` decode step
//! - **Context**: the immutable argument list handed to every handler
//! - **Status**: duplicate-suppressing, replay-latest connectivity stream
//! - **Errors**: handler, codec and transport error types via `thiserror`
//! - **Logging**: `tracing` subscriber bootstrap and log capture for tests

#![deny(unsafe_code)]

pub mod codec;
pub mod context;
pub mod errors;
pub mod logging;
pub mod packet;
pub mod pattern;
pub mod status;

pub use codec::{
    DeserializeOptions, Deserializer, IdentitySerializer, IncomingPacket,
    IncomingRequestDeserializer, IncomingResponseDeserializer, Serializer, Side, WireShape,
};
pub use context::RpcContext;
pub use errors::{CodecError, ErrorBody, HandlerError, TransportError};
pub use packet::{Event, IncomingResponse, ReadPacket, Request, WritePacket};
pub use pattern::{Pattern, Route, normalize, route_from_str};
pub use status::StatusReporter;
