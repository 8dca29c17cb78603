//! # courier-server
//!
//! Server half of Courier's message-pattern dispatch layer.
//!
//! - [`Server`]: handler registry, processing hooks and the request/event
//!   dispatch engine
//! - [`HandlerRegistry`]: route-keyed handler chains
//! - [`HandlerOutput`]: immediate, deferred and streaming handler results,
//!   normalized into one stream shape
//! - [`outbound`]: per-request ordered response queue with backpressure
//! - [`TransportStrategy`]: lifecycle contract concrete transports implement

#![deny(unsafe_code)]

pub mod handler;
pub mod hooks;
pub mod options;
pub mod outbound;
pub mod registry;
pub mod server;
pub mod transport;

pub use handler::{
    Extras, HandlerChain, HandlerOutput, HandlerRef, HandlerResult, MessageHandler,
    RegisteredHandler, ResultStream, async_handler,
};
pub use hooks::{EndHook, ProcessingDone, StartHook, TransportId};
pub use options::{ServerOptions, options_prop};
pub use outbound::{OutboundQueue, Responder, ResponseSubscription};
pub use registry::HandlerRegistry;
pub use server::{DispatchState, Server};
pub use transport::{EventCallback, ReadyCallback, TransportStrategy};
