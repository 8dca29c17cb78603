//! Client proxy: the caller-facing half of a transport.
//!
//! [`ClientProxy::send`] returns a lazy [`ResponseStream`]. Nothing touches
//! the transport until the stream is first polled; then the proxy makes sure
//! the transport is connected, serializes a fresh [`Request`], publishes it
//! and yields each correlated response until the remote side signals
//! disposal. Dropping the stream early runs the transport's teardown.
//!
//! Connection is shared: however many requests race on a cold proxy, the
//! transport's `connect` runs once and every caller waits on the same
//! attempt. A failed attempt is not cached.

use std::any::Any;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use courier_core::status::StatusStream;
use courier_core::{
    Deserializer, Event, IdentitySerializer, IncomingResponse, IncomingResponseDeserializer,
    Pattern, Request, Route, Serializer, StatusReporter, TransportError, normalize,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::options::ClientOptions;
use crate::sink::{ResponseSink, Teardown, TeardownGuard};
use crate::transport::{ClientTransport, EventCallback, OutboundPacket};

/// Responses to one request, in the order the remote handler produced them.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<Value, ClientError>> + Send>>;

type ConnectAttempt = Shared<BoxFuture<'static, Result<(), TransportError>>>;

enum ConnectState {
    Idle,
    Connecting(ConnectAttempt),
    Connected,
}

/// Serializes connection attempts for one transport.
struct Connector<T> {
    transport: Arc<T>,
    state: Mutex<ConnectState>,
    timeout: Duration,
}

impl<T: ClientTransport + 'static> Connector<T> {
    async fn ensure(&self) -> Result<(), TransportError> {
        let attempt = {
            let mut state = self.state.lock();
            match &*state {
                ConnectState::Connected => return Ok(()),
                ConnectState::Connecting(attempt) => attempt.clone(),
                ConnectState::Idle => {
                    let attempt = self.attempt();
                    *state = ConnectState::Connecting(attempt.clone());
                    attempt
                }
            }
        };

        let outcome = attempt.await;
        {
            let mut state = self.state.lock();
            if matches!(*state, ConnectState::Connecting(_)) {
                *state = if outcome.is_ok() {
                    ConnectState::Connected
                } else {
                    ConnectState::Idle
                };
            }
        }
        if let Err(error) = &outcome {
            warn!(%error, "transport connect failed");
        }
        outcome
    }

    fn attempt(&self) -> ConnectAttempt {
        let transport = Arc::clone(&self.transport);
        let limit = self.timeout;
        let attempt: BoxFuture<'static, Result<(), TransportError>> = Box::pin(async move {
            debug!("connecting transport");
            match tokio::time::timeout(limit, transport.connect()).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(TransportError::Connect(format!("timed out after {limit:?}"))),
            }
        });
        attempt.shared()
    }

    fn reset(&self) {
        *self.state.lock() = ConnectState::Idle;
    }

    fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), ConnectState::Connected)
    }
}

/// Caller-facing request/event API over a [`ClientTransport`].
///
/// `S` is the status type published on [`ClientProxy::status`].
pub struct ClientProxy<T, S = String> {
    connector: Arc<Connector<T>>,
    request_serializer: Arc<dyn Serializer<Request>>,
    event_serializer: Arc<dyn Serializer<Event>>,
    deserializer: Arc<dyn Deserializer<Output = IncomingResponse>>,
    status: Arc<StatusReporter<S>>,
    options: ClientOptions,
}

impl<T, S> Clone for ClientProxy<T, S> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            request_serializer: Arc::clone(&self.request_serializer),
            event_serializer: Arc::clone(&self.event_serializer),
            deserializer: Arc::clone(&self.deserializer),
            status: Arc::clone(&self.status),
            options: self.options,
        }
    }
}

impl<T, S> ClientProxy<T, S>
where
    T: ClientTransport + 'static,
    S: Clone + PartialEq + Send + Sync + 'static,
{
    /// Wrap a transport with default options and identity codecs.
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, ClientOptions::default())
    }

    /// Wrap a transport with explicit options.
    pub fn with_options(transport: T, options: ClientOptions) -> Self {
        Self {
            connector: Arc::new(Connector {
                transport: Arc::new(transport),
                state: Mutex::new(ConnectState::Idle),
                timeout: options.connect_timeout,
            }),
            request_serializer: Arc::new(IdentitySerializer),
            event_serializer: Arc::new(IdentitySerializer),
            deserializer: Arc::new(IncomingResponseDeserializer),
            status: Arc::new(StatusReporter::new()),
            options,
        }
    }

    /// Replace the outbound serializer for both requests and events.
    #[must_use]
    pub fn with_serializer<Z>(mut self, serializer: Z) -> Self
    where
        Z: Serializer<Request> + Serializer<Event> + 'static,
    {
        let serializer = Arc::new(serializer);
        self.request_serializer = Arc::clone(&serializer) as Arc<dyn Serializer<Request>>;
        self.event_serializer = serializer;
        self
    }

    /// Replace the inbound response deserializer.
    #[must_use]
    pub fn with_deserializer(
        mut self,
        deserializer: impl Deserializer<Output = IncomingResponse> + 'static,
    ) -> Self {
        self.deserializer = Arc::new(deserializer);
        self
    }

    /// Share a status reporter with the transport that drives it.
    #[must_use]
    pub fn with_status_reporter(mut self, status: Arc<StatusReporter<S>>) -> Self {
        self.status = status;
        self
    }

    /// Options this proxy was built with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        &self.connector.transport
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Connect now instead of on first use. Concurrent calls share one attempt.
    pub async fn connect(&self) -> Result<(), ClientError> {
        Ok(self.connector.ensure().await?)
    }

    /// Close the transport. The next request reconnects.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.connector.reset();
        self.connector.transport.close().await?;
        debug!("client closed");
        Ok(())
    }

    /// Whether a connection has been established and not closed.
    pub fn is_connected(&self) -> bool {
        self.connector.is_connected()
    }

    // ── Requests and events ─────────────────────────────────────────

    /// Send a request and stream its responses.
    ///
    /// Fails immediately with [`ClientError::InvalidMessage`] when `pattern`
    /// or `data` is null. Everything else happens when the stream is polled.
    /// The configured request timeout, if any, applies per item.
    pub fn send(
        &self,
        pattern: impl Into<Pattern>,
        data: Value,
    ) -> Result<ResponseStream, ClientError> {
        let stream = self.request_stream(pattern.into(), data)?;
        Ok(match self.options.request_timeout {
            Some(limit) => with_deadline(stream, limit),
            None => stream,
        })
    }

    /// [`send`](Self::send) with an explicit per-item deadline.
    ///
    /// On expiry the stream yields [`ClientError::Timeout`], ends, and the
    /// transport's teardown runs.
    pub fn send_with_timeout(
        &self,
        pattern: impl Into<Pattern>,
        data: Value,
        limit: Duration,
    ) -> Result<ResponseStream, ClientError> {
        Ok(with_deadline(self.request_stream(pattern.into(), data)?, limit))
    }

    /// Send a fire-and-forget event. Resolves once the transport accepted it.
    pub async fn emit(&self, pattern: impl Into<Pattern>, data: Value) -> Result<(), ClientError> {
        let pattern = pattern.into();
        validate(&pattern, &data)?;
        self.connector.ensure().await?;

        let event = Event::new(pattern, data);
        let wire = self.event_serializer.serialize(&event)?;
        self.connector
            .transport
            .dispatch_event(OutboundPacket {
                packet: event,
                wire,
            })
            .await?;
        Ok(())
    }

    fn request_stream(&self, pattern: Pattern, data: Value) -> Result<ResponseStream, ClientError> {
        validate(&pattern, &data)?;
        let connector = Arc::clone(&self.connector);
        let serializer = Arc::clone(&self.request_serializer);
        let deserializer = Arc::clone(&self.deserializer);

        Ok(Box::pin(async_stream::stream! {
            let published = async move {
                connector.ensure().await?;
                let request = Request::new(pattern, data);
                let wire = serializer.serialize(&request)?;
                let id = request.id.clone();
                let (sink, responses) = ResponseSink::channel(deserializer);
                let teardown = publish(connector, OutboundPacket { packet: request, wire }, sink).await?;
                debug!(%id, "request published");
                Ok::<_, ClientError>((id, responses, TeardownGuard::new(teardown)))
            }
            .await;

            match published {
                Err(err) => {
                    yield Err(err);
                }
                Ok((id, mut responses, _teardown)) => loop {
                    let Some(packet) = responses.recv().await else {
                        debug!(%id, "response sink dropped before disposal");
                        yield Err(ClientError::Disconnected);
                        break;
                    };
                    if let Some(err) = packet.err {
                        yield Err(ClientError::Remote(err));
                        break;
                    }
                    if packet.is_disposed {
                        if let Some(response) = packet.response {
                            yield Ok(response);
                        }
                        break;
                    }
                    yield Ok(packet.response.unwrap_or(Value::Null));
                },
            }
        }))
    }

    // ── Misc ────────────────────────────────────────────────────────

    /// Canonical route for a pattern.
    pub fn normalize_pattern(&self, pattern: &Pattern) -> Route {
        normalize(pattern)
    }

    /// Subscribe to status changes; the latest status is replayed first.
    pub fn status(&self) -> StatusStream<S> {
        self.status.subscribe()
    }

    /// The reporter behind [`status`](Self::status).
    pub fn status_reporter(&self) -> Arc<StatusReporter<S>> {
        Arc::clone(&self.status)
    }

    /// Subscribe to a transport-specific event.
    pub fn on(&self, event: &str, callback: EventCallback) -> Result<(), ClientError> {
        Ok(self.connector.transport.on(event, callback)?)
    }

    /// Borrow the transport's native client.
    pub fn unwrap_native(&self) -> Result<&(dyn Any + Send + Sync), ClientError> {
        Ok(self.connector.transport.unwrap_native()?)
    }
}

/// Run `publish` on its own task so an abandoned caller cannot strand a
/// half-registered request. If the caller is gone by the time the transport
/// hands back its teardown, the teardown runs right away.
async fn publish<T: ClientTransport + 'static>(
    connector: Arc<Connector<T>>,
    request: OutboundPacket<Request>,
    sink: ResponseSink,
) -> Result<Teardown, ClientError> {
    let (tx, rx) = oneshot::channel();
    let id = request.packet.id.clone();
    let _ = tokio::spawn(async move {
        let outcome = connector.transport.publish(request, sink).await;
        if let Err(Ok(teardown)) = tx.send(outcome) {
            debug!(%id, "request abandoned during publish");
            teardown();
        }
    });
    let mut pending = PendingPublish(rx);
    let outcome = (&mut pending.0).await.map_err(|_| ClientError::Disconnected)?;
    outcome.map_err(ClientError::from)
}

/// Runs a teardown that was delivered but never picked up.
struct PendingPublish(oneshot::Receiver<Result<Teardown, TransportError>>);

impl Drop for PendingPublish {
    fn drop(&mut self) {
        self.0.close();
        if let Ok(Ok(teardown)) = self.0.try_recv() {
            teardown();
        }
    }
}

fn validate(pattern: &Pattern, data: &Value) -> Result<(), ClientError> {
    if pattern.is_nil() || data.is_null() {
        return Err(ClientError::InvalidMessage);
    }
    Ok(())
}

/// Fail with [`ClientError::Timeout`] if any single item takes longer than
/// `limit`. `inner` is dropped on expiry, before the error is yielded, so the
/// request is released even if the caller keeps the stream around.
fn with_deadline(inner: ResponseStream, limit: Duration) -> ResponseStream {
    Box::pin(async_stream::stream! {
        let mut inner = inner;
        loop {
            let next = tokio::time::timeout(limit, inner.next()).await;
            match next {
                Ok(Some(item)) => {
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    warn!(?limit, "request timed out");
                    drop(inner);
                    yield Err(ClientError::Timeout(limit));
                    break;
                }
            }
        }
    })
}
