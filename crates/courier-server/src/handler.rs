//! Message handlers and their normalized output.
//!
//! A handler may answer immediately, after some asynchronous work, or with a
//! stream of values. [`HandlerOutput`] names those three cases and
//! [`HandlerOutput::into_stream`] folds them into one lazy stream so the
//! dispatch engine and the outbound queue only ever deal with streams.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use courier_core::{HandlerError, RpcContext};
use futures::future::BoxFuture;
use futures::{Stream, StreamExt, stream};
use serde_json::Value;

/// One value (or failure) produced by a handler.
pub type HandlerResult = Result<Value, HandlerError>;

/// Boxed stream of handler results.
pub type ResultStream = Pin<Box<dyn Stream<Item = HandlerResult> + Send>>;

/// Free-form metadata attached to a handler at registration.
pub type Extras = HashMap<String, Value>;

/// What a handler returns.
pub enum HandlerOutput {
    /// A value that is already available.
    Immediate(HandlerResult),
    /// Asynchronous work whose result is itself re-normalized.
    Deferred(BoxFuture<'static, Result<HandlerOutput, HandlerError>>),
    /// A lazy stream of values.
    Streaming(ResultStream),
}

impl HandlerOutput {
    /// Immediate success.
    pub fn value(value: Value) -> Self {
        Self::Immediate(Ok(value))
    }

    /// Immediate failure.
    pub fn error(err: HandlerError) -> Self {
        Self::Immediate(Err(err))
    }

    /// A future resolving to a single value.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Deferred(Box::pin(async move { future.await.map(Self::value) }))
    }

    /// A future resolving to another output (for example a stream).
    pub fn deferred_output<F>(future: F) -> Self
    where
        F: Future<Output = Result<HandlerOutput, HandlerError>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }

    /// A stream of values.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = HandlerResult> + Send + 'static,
    {
        Self::Streaming(Box::pin(stream))
    }

    /// Normalize into a single lazy stream.
    ///
    /// Immediate values become one-element streams, deferred work becomes a
    /// stream of whatever it resolves to, and streams pass through.
    pub fn into_stream(self) -> ResultStream {
        match self {
            Self::Immediate(result) => Box::pin(stream::iter(std::iter::once(result))),
            Self::Streaming(inner) => inner,
            Self::Deferred(future) => Box::pin(stream::once(future).flat_map(|resolved| {
                match resolved {
                    Ok(output) => output.into_stream(),
                    Err(err) => HandlerOutput::error(err).into_stream(),
                }
            })),
        }
    }

    /// Whether this output is already a stream.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }
}

impl std::fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immediate(result) => f.debug_tuple("Immediate").field(result).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// Trait implemented by every message and event handler.
///
/// Closures `Fn(Value, RpcContext) -> HandlerOutput` implement it directly;
/// use [`async_handler`] for `async` closures.
pub trait MessageHandler: Send + Sync {
    /// Invoke the handler with the packet data and dispatch context.
    fn handle(&self, data: Value, ctx: RpcContext) -> HandlerOutput;
}

impl<F> MessageHandler for F
where
    F: Fn(Value, RpcContext) -> HandlerOutput + Send + Sync,
{
    fn handle(&self, data: Value, ctx: RpcContext) -> HandlerOutput {
        self(data, ctx)
    }
}

/// Adapt an async closure into a [`MessageHandler`] with a deferred result.
pub fn async_handler<F, Fut>(f: F) -> impl MessageHandler
where
    F: Fn(Value, RpcContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    move |data: Value, ctx: RpcContext| HandlerOutput::deferred(f(data, ctx))
}

/// A handler together with its registration metadata.
#[derive(Clone)]
pub struct RegisteredHandler {
    handler: Arc<dyn MessageHandler>,
    is_event_handler: bool,
    extras: Arc<Extras>,
}

impl RegisteredHandler {
    /// Wrap a handler with its metadata.
    pub fn new(handler: Arc<dyn MessageHandler>, is_event_handler: bool, extras: Extras) -> Self {
        Self {
            handler,
            is_event_handler,
            extras: Arc::new(extras),
        }
    }

    /// Whether this handler was registered for events.
    pub fn is_event_handler(&self) -> bool {
        self.is_event_handler
    }

    /// Registration metadata.
    pub fn extras(&self) -> &Extras {
        &self.extras
    }

    /// Invoke the handler.
    pub fn call(&self, data: Value, ctx: RpcContext) -> HandlerOutput {
        self.handler.handle(data, ctx)
    }
}

impl std::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("is_event_handler", &self.is_event_handler)
            .field("extras", &self.extras)
            .finish_non_exhaustive()
    }
}

/// Ordered handlers registered under one route. The first is the head.
#[derive(Clone, Debug)]
pub struct HandlerChain {
    handlers: Vec<RegisteredHandler>,
}

impl HandlerChain {
    pub(crate) fn single(handler: RegisteredHandler) -> Self {
        Self {
            handlers: vec![handler],
        }
    }

    pub(crate) fn push(&mut self, handler: RegisteredHandler) {
        self.handlers.push(handler);
    }

    /// The handler dispatch invokes.
    pub fn head(&self) -> &RegisteredHandler {
        &self.handlers[0]
    }

    /// Number of handlers in the chain.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Always `false`; a chain holds at least its head.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredHandler> {
        self.handlers.iter()
    }
}

/// A handle to one position in a route's chain.
#[derive(Clone, Debug)]
pub struct HandlerRef {
    chain: Arc<HandlerChain>,
    index: usize,
}

impl HandlerRef {
    pub(crate) fn head(chain: Arc<HandlerChain>) -> Self {
        Self { chain, index: 0 }
    }

    fn current(&self) -> &RegisteredHandler {
        &self.chain.handlers[self.index]
    }

    /// Position in the chain (0 for the head).
    pub fn position(&self) -> usize {
        self.index
    }

    /// Whether this handler was registered for events.
    pub fn is_event_handler(&self) -> bool {
        self.current().is_event_handler()
    }

    /// Registration metadata.
    pub fn extras(&self) -> &Extras {
        self.current().extras()
    }

    /// The next handler in the chain, if any.
    pub fn next(&self) -> Option<HandlerRef> {
        let index = self.index + 1;
        (index < self.chain.len()).then(|| Self {
            chain: Arc::clone(&self.chain),
            index,
        })
    }

    /// Invoke only this handler.
    pub fn call(&self, data: Value, ctx: RpcContext) -> HandlerOutput {
        self.current().call(data, ctx)
    }

    /// Invoke this handler and every one after it, in registration order.
    ///
    /// Each handler runs lazily once the previous one's output is exhausted;
    /// their outputs are concatenated into one stream.
    pub fn fan_out(&self, data: Value, ctx: RpcContext) -> HandlerOutput {
        let chain = Arc::clone(&self.chain);
        let outputs = stream::iter(self.index..chain.len()).flat_map(move |index| {
            chain.handlers[index]
                .call(data.clone(), ctx.clone())
                .into_stream()
        });
        HandlerOutput::stream(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn collect(output: HandlerOutput) -> Vec<HandlerResult> {
        output.into_stream().collect().await
    }

    #[tokio::test]
    async fn immediate_becomes_single_element_stream() {
        let items: Vec<Value> = HandlerOutput::value(json!(42))
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items, vec![json!(42)]);
    }

    #[tokio::test]
    async fn deferred_resolves_to_its_value() {
        let output = HandlerOutput::deferred(async { Ok::<_, HandlerError>(json!(7)) });
        let items = collect(output).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), &json!(7));
    }

    #[tokio::test]
    async fn deferred_stream_is_flattened() {
        let output = HandlerOutput::deferred_output(async {
            Ok::<_, HandlerError>(HandlerOutput::stream(stream::iter(vec![
                Ok(json!(1)),
                Ok(json!(2)),
            ])))
        });
        let items: Vec<Value> = output.into_stream().try_collect().await.unwrap();
        assert_eq!(items, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn deferred_failure_is_a_single_error() {
        let output = HandlerOutput::deferred(async { Err(HandlerError::internal("boom")) });
        let items = collect(output).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap_err().code(), "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn stream_passes_through() {
        let s = async_stream::stream! {
            yield Ok::<_, HandlerError>(json!("a"));
            yield Ok(json!("b"));
        };
        let items: Vec<Value> = HandlerOutput::stream(s).into_stream().try_collect().await.unwrap();
        assert_eq!(items, vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn async_handler_adapts_closures() {
        let handler = async_handler(|data: Value, _ctx| async move {
            Ok::<_, HandlerError>(json!({"echo": data}))
        });
        let output = handler.handle(json!("hi"), RpcContext::default());
        assert!(!output.is_streaming());
        let items: Vec<Value> = output.into_stream().try_collect().await.unwrap();
        assert_eq!(items, vec![json!({"echo": "hi"})]);
    }

    fn counting(counter: Arc<AtomicUsize>, tag: &'static str) -> RegisteredHandler {
        let handler = move |_data: Value, _ctx: RpcContext| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            HandlerOutput::value(json!(tag))
        };
        RegisteredHandler::new(Arc::new(handler), true, Extras::new())
    }

    #[tokio::test]
    async fn next_walks_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut chain = HandlerChain::single(counting(calls.clone(), "first"));
        chain.push(counting(calls.clone(), "second"));
        let head = HandlerRef::head(Arc::new(chain));

        let second = head.next().expect("second handler");
        assert_eq!(second.position(), 1);
        assert!(second.next().is_none());

        let items: Vec<Value> = second
            .call(Value::Null, RpcContext::default())
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items, vec![json!("second")]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fan_out_runs_from_here_to_tail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut chain = HandlerChain::single(counting(calls.clone(), "a"));
        chain.push(counting(calls.clone(), "b"));
        chain.push(counting(calls.clone(), "c"));
        let head = HandlerRef::head(Arc::new(chain));

        let items: Vec<Value> = head
            .fan_out(Value::Null, RpcContext::default())
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items, vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let from_second: Vec<Value> = head
            .next()
            .unwrap()
            .fan_out(Value::Null, RpcContext::default())
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(from_second, vec![json!("b"), json!("c")]);
    }
}
