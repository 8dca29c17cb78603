//! Dispatch engine.
//!
//! [`Server`] owns the handler registry, the processing hooks and the codec
//! pair. Transports feed it raw inbound values through
//! [`Server::handle_inbound`] (or the typed [`Server::handle_message`] /
//! [`Server::handle_event`]) and receive serialized response frames through
//! the [`Responder`] they pass in.
//!
//! Each dispatch moves through [`DispatchState`]; transitions are traced at
//! `trace` level under the `courier_server::server` target.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use courier_core::errors::{self, ErrorBody};
use courier_core::status::StatusStream;
use courier_core::{
    CodecError, DeserializeOptions, Deserializer, HandlerError, IdentitySerializer, IncomingPacket,
    IncomingRequestDeserializer, IncomingResponse, Pattern, ReadPacket, Request, Route,
    RpcContext, Serializer, StatusReporter, TransportError, WritePacket, normalize,
};
use futures::{FutureExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, trace, warn};

use crate::handler::{
    Extras, HandlerChain, HandlerOutput, HandlerRef, HandlerResult, MessageHandler,
    RegisteredHandler, ResultStream,
};
use crate::hooks::{Hooks, ProcessingDone, TransportId};
use crate::options::ServerOptions;
use crate::outbound::{Responder, ResponseSubscription, spawn_delivery};
use crate::registry::HandlerRegistry;

/// Stages a single dispatch passes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchState {
    /// Inbound packet accepted.
    Received,
    /// Start hook entered.
    HookStart,
    /// Handler called.
    Invoking,
    /// Handler output is a stream being consumed.
    Streaming,
    /// Handler output fully consumed.
    Completed,
    /// End hook fired.
    HookEnd,
}

/// Transport-agnostic dispatch engine.
///
/// `S` is the status type published on [`Server::status`].
pub struct Server<S = String> {
    registry: HandlerRegistry,
    hooks: RwLock<Hooks>,
    transport_id: RwLock<TransportId>,
    status: StatusReporter<S>,
    serializer: Arc<dyn Serializer<IncomingResponse>>,
    deserializer: Arc<dyn Deserializer<Output = IncomingPacket>>,
    options: ServerOptions,
}

impl<S> Server<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a server with default options and the identity codecs.
    pub fn new() -> Self {
        Self::with_options(ServerOptions::default())
    }

    /// Create a server with explicit options.
    pub fn with_options(options: ServerOptions) -> Self {
        Self {
            registry: HandlerRegistry::new(),
            hooks: RwLock::new(Hooks::default()),
            transport_id: RwLock::new(Arc::from(options.transport_id.as_str())),
            status: StatusReporter::new(),
            serializer: Arc::new(IdentitySerializer),
            deserializer: Arc::new(IncomingRequestDeserializer),
            options,
        }
    }

    /// Replace the outbound serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: impl Serializer<IncomingResponse> + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Replace the inbound deserializer.
    #[must_use]
    pub fn with_deserializer(
        mut self,
        deserializer: impl Deserializer<Output = IncomingPacket> + 'static,
    ) -> Self {
        self.deserializer = Arc::new(deserializer);
        self
    }

    /// Options this server was built with.
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    // ── Registry ────────────────────────────────────────────────────

    /// Register a handler. Returns the route it was stored under.
    pub fn add_handler(
        &self,
        pattern: impl Into<Pattern>,
        handler: impl MessageHandler + 'static,
        is_event_handler: bool,
        extras: Extras,
    ) -> Route {
        let registered = RegisteredHandler::new(Arc::new(handler), is_event_handler, extras);
        self.registry.add(&pattern.into(), registered)
    }

    /// Register a request handler with no extras.
    pub fn add_message_handler(
        &self,
        pattern: impl Into<Pattern>,
        handler: impl MessageHandler + 'static,
    ) -> Route {
        self.add_handler(pattern, handler, false, Extras::new())
    }

    /// Register an event handler with no extras.
    pub fn add_event_handler(
        &self,
        pattern: impl Into<Pattern>,
        handler: impl MessageHandler + 'static,
    ) -> Route {
        self.add_handler(pattern, handler, true, Extras::new())
    }

    /// Snapshot of every route and its handler chain.
    pub fn get_handlers(&self) -> BTreeMap<Route, Arc<HandlerChain>> {
        self.registry.snapshot()
    }

    /// Head handler for a pattern given as text (JSON or plain).
    pub fn get_handler_by_pattern(&self, pattern: &str) -> Option<HandlerRef> {
        self.registry.get_by_str(pattern)
    }

    /// The underlying registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Canonical route for a pattern.
    pub fn normalize_pattern(&self, pattern: &Pattern) -> Route {
        normalize(pattern)
    }

    // ── Hooks and identity ──────────────────────────────────────────

    /// Replace the start hook.
    pub fn set_on_processing_start_hook<F, Fut>(&self, hook: F)
    where
        F: Fn(TransportId, RpcContext, ProcessingDone) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.hooks.write().set_start(hook);
    }

    /// Replace the end hook.
    pub fn set_on_processing_end_hook<F>(&self, hook: F)
    where
        F: Fn(&str, &RpcContext) + Send + Sync + 'static,
    {
        self.hooks.write().set_end(hook);
    }

    /// Set the identifier passed to hooks.
    pub fn set_transport_id(&self, id: impl AsRef<str>) {
        *self.transport_id.write() = Arc::from(id.as_ref());
    }

    /// Current transport identifier.
    pub fn transport_id(&self) -> TransportId {
        self.transport_id.read().clone()
    }

    // ── Status ──────────────────────────────────────────────────────

    /// Subscribe to status changes; the latest status is replayed first.
    pub fn status(&self) -> StatusStream<S> {
        self.status.subscribe()
    }

    /// Publish a status. Returns `false` when it equals the current one.
    pub fn set_status(&self, status: S) -> bool {
        self.status.set(status)
    }

    /// Latest published status.
    pub fn current_status(&self) -> Option<S> {
        self.status.current()
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Normalize any handler output into a single lazy stream.
    pub fn transform_to_stream(&self, output: HandlerOutput) -> ResultStream {
        output.into_stream()
    }

    /// Deliver `stream` to `responder` through a fresh outbound queue.
    pub fn send(&self, stream: ResultStream, responder: Arc<dyn Responder>) -> ResponseSubscription {
        let subscription = ResponseSubscription::new();
        spawn_delivery(
            stream,
            responder,
            self.options.max_pending_responses,
            &subscription,
        );
        subscription
    }

    /// Decode a raw inbound value and dispatch it.
    ///
    /// Requests return the subscription for their response delivery; events
    /// return `None` once the handler has been run.
    pub async fn handle_inbound(
        &self,
        raw: Value,
        options: &DeserializeOptions,
        ctx: RpcContext,
        responder: Arc<dyn Responder<Value>>,
    ) -> Result<Option<ResponseSubscription>, CodecError> {
        match self.deserializer.deserialize(raw, options)? {
            IncomingPacket::Request(request) => {
                Ok(Some(self.handle_message(request, ctx, responder).await))
            }
            IncomingPacket::Event(event) => {
                let route = normalize(&event.pattern);
                self.handle_event(route.as_str(), ReadPacket::from(event), ctx)
                    .await;
                Ok(None)
            }
        }
    }

    /// Dispatch a request and stream its responses to `responder`.
    ///
    /// Each frame is tagged with the request id and passed through the
    /// serializer before reaching the transport. A missing handler yields a
    /// single `NO_MESSAGE_HANDLER` error frame.
    pub async fn handle_message(
        &self,
        request: Request,
        ctx: RpcContext,
        responder: Arc<dyn Responder<Value>>,
    ) -> ResponseSubscription {
        let route = normalize(&request.pattern);
        let subscription = ResponseSubscription::new();
        trace!(state = ?DispatchState::Received, %route, id = %request.id, "dispatch");

        let correlated: Arc<dyn Responder> = Arc::new(Correlated {
            id: request.id.clone(),
            serializer: Arc::clone(&self.serializer),
            wire: responder,
        });

        let Some(handler) = self.get_handler_by_pattern(route.as_str()) else {
            warn!(%route, id = %request.id, "no message handler");
            let body = ErrorBody::new(errors::NO_MESSAGE_HANDLER, errors::NO_MESSAGE_HANDLER_MESSAGE);
            if let Err(error) = correlated.respond(WritePacket::error(&body)).await {
                warn!(%route, %error, "failed to deliver response packet");
            }
            subscription.mark_completed();
            return subscription;
        };

        let Hooks { start, end } = self.hooks.read().clone();
        let transport_id = self.transport_id();
        let capacity = self.options.max_pending_responses;
        let slow_after = self.options.slow_handler_warn;
        let delivery = subscription.clone();
        let end_id = Arc::clone(&transport_id);
        let handler_ctx = ctx.clone();

        let done: ProcessingDone = Box::pin(async move {
            trace!(state = ?DispatchState::Invoking, %route, "dispatch");
            let started = Instant::now();
            let output = invoke(&handler, request.data, handler_ctx.clone());
            let slow_route = route.clone();
            let stream = finalize(output.into_stream(), move || {
                trace!(state = ?DispatchState::Completed, "dispatch");
                warn_if_slow(slow_route.as_str(), started, slow_after);
                end(&end_id, &handler_ctx);
                trace!(state = ?DispatchState::HookEnd, "dispatch");
            });
            trace!(state = ?DispatchState::Streaming, %route, "dispatch");
            spawn_delivery(stream, correlated, capacity, &delivery);
        });

        trace!(state = ?DispatchState::HookStart, "dispatch");
        start(transport_id, ctx, done).await;
        subscription
    }

    /// Dispatch a fire-and-forget event.
    ///
    /// Only the head of the route's chain is invoked. A missing handler is
    /// logged at `error` and otherwise ignored. Streaming results are driven
    /// to completion on a background task.
    pub async fn handle_event(&self, pattern: &str, packet: ReadPacket, ctx: RpcContext) {
        trace!(state = ?DispatchState::Received, pattern, "dispatch");
        let Some(handler) = self.get_handler_by_pattern(pattern) else {
            error!(pattern, "{}", errors::no_event_handler(pattern));
            return;
        };

        let Hooks { start, end } = self.hooks.read().clone();
        let transport_id = self.transport_id();
        let slow_after = self.options.slow_handler_warn;
        let route = pattern.to_owned();
        let end_id = Arc::clone(&transport_id);
        let handler_ctx = ctx.clone();

        let done: ProcessingDone = Box::pin(async move {
            trace!(state = ?DispatchState::Invoking, %route, "dispatch");
            let started = Instant::now();
            let end_ctx = handler_ctx.clone();
            let on_end = move || {
                end(&end_id, &end_ctx);
                trace!(state = ?DispatchState::HookEnd, "dispatch");
            };

            match settle(invoke(&handler, packet.data, handler_ctx)).await {
                Settled::Stream(stream) => {
                    trace!(state = ?DispatchState::Streaming, %route, "dispatch");
                    let stream = finalize(stream, on_end);
                    let _ = tokio::spawn(drive_event_stream(stream, route, started, slow_after));
                }
                Settled::Value(result) => {
                    if let Err(err) = result {
                        warn!(%route, code = err.code(), error = %err, "event handler failed");
                    }
                    trace!(state = ?DispatchState::Completed, %route, "dispatch");
                    warn_if_slow(&route, started, slow_after);
                    on_end();
                }
            }
        });

        trace!(state = ?DispatchState::HookStart, "dispatch");
        start(transport_id, ctx, done).await;
    }
}

impl<S> Default for Server<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Tags frames with the request id and serializes them for the wire.
struct Correlated {
    id: String,
    serializer: Arc<dyn Serializer<IncomingResponse>>,
    wire: Arc<dyn Responder<Value>>,
}

#[async_trait]
impl Responder for Correlated {
    async fn respond(&self, packet: WritePacket) -> Result<(), TransportError> {
        let framed = packet.with_id(self.id.clone());
        let value = self
            .serializer
            .serialize(&framed)
            .map_err(|e| TransportError::Respond(e.to_string()))?;
        self.wire.respond(value).await
    }
}

/// Call a handler, turning a panic into an internal error.
fn invoke(handler: &HandlerRef, data: Value, ctx: RpcContext) -> HandlerOutput {
    std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(data, ctx))).unwrap_or_else(|_| {
        warn!("handler panicked");
        HandlerOutput::error(HandlerError::internal("handler panicked"))
    })
}

enum Settled {
    Value(HandlerResult),
    Stream(ResultStream),
}

/// Await deferred outputs until a value or a stream is left.
async fn settle(mut output: HandlerOutput) -> Settled {
    loop {
        match output {
            HandlerOutput::Immediate(result) => return Settled::Value(result),
            HandlerOutput::Streaming(stream) => return Settled::Stream(stream),
            HandlerOutput::Deferred(future) => match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(next)) => output = next,
                Ok(Err(err)) => return Settled::Value(Err(err)),
                Err(_panic) => {
                    warn!("handler panicked");
                    return Settled::Value(Err(HandlerError::internal("handler panicked")));
                }
            },
        }
    }
}

async fn drive_event_stream(
    mut stream: ResultStream,
    route: String,
    started: Instant,
    slow_after: Duration,
) {
    while let Some(item) = stream.next().await {
        if let Err(err) = item {
            warn!(%route, code = err.code(), error = %err, "event handler stream failed");
            break;
        }
    }
    drop(stream);
    trace!(state = ?DispatchState::Completed, %route, "dispatch");
    warn_if_slow(&route, started, slow_after);
}

fn warn_if_slow(route: &str, started: Instant, slow_after: Duration) {
    let elapsed = started.elapsed();
    if elapsed >= slow_after {
        warn!(
            route,
            duration_secs = elapsed.as_secs_f64(),
            "slow handler"
        );
    }
}

/// Runs a callback exactly once when dropped.
struct OnDrop<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Wrap `stream` so `on_end` runs once it completes, fails or is dropped.
fn finalize<F>(stream: ResultStream, on_end: F) -> ResultStream
where
    F: FnOnce() + Send + 'static,
{
    let guard = OnDrop(Some(on_end));
    Box::pin(async_stream::stream! {
        let _guard = guard;
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            yield item;
        }
    })
}
