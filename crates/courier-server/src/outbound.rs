//! Ordered response delivery.
//!
//! Every request gets its own [`OutboundQueue`] and a single drain worker, so
//! packets reach the [`Responder`] strictly in the order the handler produced
//! them and the next `respond` call starts only after the previous one
//! finished.
//!
//! The producer side pulls from the handler stream and pushes
//! `{response}` frames. When the stream ends (or the subscription is
//! cancelled) it pushes the `{isDisposed}` marker; if frames are still waiting
//! the marker is folded into the last one instead of being sent separately.
//! A failing stream pushes one `{err}` frame and nothing after it.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{HandlerError, TransportError, WritePacket};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::handler::ResultStream;

/// Sink that delivers one packet to the remote peer.
///
/// Closures `Fn(P) -> impl Future<Output = Result<(), TransportError>>`
/// implement it directly.
#[async_trait]
pub trait Responder<P: Send + 'static = WritePacket>: Send + Sync {
    /// Deliver `packet`. Resolves once the transport accepted it.
    async fn respond(&self, packet: P) -> Result<(), TransportError>;
}

#[async_trait]
impl<P, F, Fut> Responder<P> for F
where
    P: Send + 'static,
    F: Fn(P) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TransportError>> + Send,
{
    async fn respond(&self, packet: P) -> Result<(), TransportError> {
        (self)(packet).await
    }
}

// ── Queue ───────────────────────────────────────────────────────────

/// FIFO of pending response frames for one request.
#[derive(Debug)]
pub struct OutboundQueue {
    pending: Mutex<VecDeque<WritePacket>>,
    capacity: usize,
    ready: Notify,
    space: Notify,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` frames (`0` = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity,
            ready: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Enqueue a frame.
    ///
    /// A disposal marker arriving while frames are pending marks the last
    /// pending frame disposed instead of adding a new one.
    pub fn push(&self, packet: WritePacket) {
        {
            let mut pending = self.pending.lock();
            match pending.back_mut() {
                Some(last) if packet.is_disposed => last.is_disposed = true,
                _ => pending.push_back(packet),
            }
        }
        self.ready.notify_one();
    }

    /// Take the oldest frame, waiting until one is available.
    pub async fn pop(&self) -> WritePacket {
        loop {
            let next = self.pending.lock().pop_front();
            if let Some(packet) = next {
                self.space.notify_one();
                return packet;
            }
            self.ready.notified().await;
        }
    }

    /// Wait until the queue has room for another frame.
    pub async fn reserve(&self) {
        if self.capacity == 0 {
            return;
        }
        loop {
            if self.pending.lock().len() < self.capacity {
                return;
            }
            self.space.notified().await;
        }
    }

    /// Frames currently waiting.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no frames are waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

// ── Subscription ────────────────────────────────────────────────────

/// Handle to one request's in-flight response delivery.
///
/// Dropping the handle does not cancel delivery; call
/// [`unsubscribe`](Self::unsubscribe).
#[derive(Clone, Debug)]
pub struct ResponseSubscription {
    cancel: CancellationToken,
    completed: CancellationToken,
}

impl ResponseSubscription {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            completed: CancellationToken::new(),
        }
    }

    pub(crate) fn mark_completed(&self) {
        self.completed.cancel();
    }

    /// Stop pulling from the handler stream.
    ///
    /// Frames already queued are still delivered, followed by the disposal
    /// marker.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    /// Whether [`unsubscribe`](Self::unsubscribe) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the terminal frame has been handed to the responder.
    pub fn is_completed(&self) -> bool {
        self.completed.is_cancelled()
    }

    /// Resolve once the terminal frame has been handed to the responder.
    pub async fn completed(&self) {
        self.completed.cancelled().await;
    }
}

// ── Delivery ────────────────────────────────────────────────────────

/// Pump `stream` into `responder` on background tasks.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn spawn_delivery(
    stream: ResultStream,
    responder: Arc<dyn Responder>,
    capacity: usize,
    subscription: &ResponseSubscription,
) {
    let queue = Arc::new(OutboundQueue::new(capacity));
    let _ = tokio::spawn(drain(
        Arc::clone(&queue),
        responder,
        subscription.completed.clone(),
    ));
    let _ = tokio::spawn(produce(stream, queue, subscription.cancel.clone()));
}

async fn produce(mut stream: ResultStream, queue: Arc<OutboundQueue>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = queue.reserve() => {}
        }
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = AssertUnwindSafe(stream.next()).catch_unwind() => next,
        };
        match next {
            Ok(Some(Ok(value))) => queue.push(WritePacket::response(value)),
            Ok(Some(Err(err))) => {
                debug!(code = err.code(), "handler stream failed");
                queue.push(WritePacket::error(&err.to_error_body()));
                return;
            }
            Ok(None) => break,
            Err(_panic) => {
                warn!("handler stream panicked");
                let err = HandlerError::internal("handler panicked");
                queue.push(WritePacket::error(&err.to_error_body()));
                return;
            }
        }
    }
    if cancel.is_cancelled() {
        debug!("response subscription cancelled");
    }
    drop(stream);
    queue.push(WritePacket::disposed());
}

async fn drain(queue: Arc<OutboundQueue>, responder: Arc<dyn Responder>, completed: CancellationToken) {
    loop {
        let packet = queue.pop().await;
        let terminal = packet.is_terminal();
        if let Err(error) = responder.respond(packet).await {
            warn!(%error, "failed to deliver response packet");
        }
        if terminal {
            break;
        }
    }
    completed.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerResult;
    use courier_core::ErrorBody;
    use futures::stream;
    use serde_json::{Value, json};
    use std::time::Duration;

    type Sent = Arc<Mutex<Vec<WritePacket>>>;

    fn recorder() -> (Sent, Arc<dyn Responder>) {
        let sent: Sent = Arc::default();
        let sink = Arc::clone(&sent);
        let responder = move |packet: WritePacket| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(packet);
                Ok::<(), TransportError>(())
            }
        };
        (sent, Arc::new(responder))
    }

    fn values(items: Vec<Value>) -> ResultStream {
        Box::pin(stream::iter(items.into_iter().map(Ok::<Value, HandlerError>)))
    }

    fn responses(sent: &[WritePacket]) -> Vec<Value> {
        sent.iter().filter_map(|p| p.response.clone()).collect()
    }

    #[test]
    fn disposal_folds_into_last_pending() {
        let queue = OutboundQueue::new(0);
        queue.push(WritePacket::response(json!(1)));
        queue.push(WritePacket::disposed());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn disposal_on_empty_queue_is_separate() {
        let queue = OutboundQueue::new(0);
        queue.push(WritePacket::disposed());
        let packet = queue.pop().await;
        assert!(packet.is_disposed);
        assert!(packet.response.is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn reserve_waits_for_room() {
        let queue = Arc::new(OutboundQueue::new(1));
        queue.push(WritePacket::response(json!(1)));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.reserve().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let _ = queue.pop().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("reserve resolved")
            .unwrap();
    }

    #[tokio::test]
    async fn delivers_in_order_and_ends_disposed() {
        let (sent, responder) = recorder();
        let subscription = ResponseSubscription::new();
        spawn_delivery(
            values(vec![json!(1), json!(2), json!(3)]),
            responder,
            0,
            &subscription,
        );
        subscription.completed().await;

        let sent = sent.lock().clone();
        assert_eq!(responses(&sent), vec![json!(1), json!(2), json!(3)]);
        assert!(sent.last().unwrap().is_disposed);
        assert_eq!(sent.iter().filter(|p| p.is_disposed).count(), 1);
        assert!(sent.iter().all(|p| p.err.is_none()));
    }

    #[tokio::test]
    async fn empty_stream_sends_only_disposal() {
        let (sent, responder) = recorder();
        let subscription = ResponseSubscription::new();
        spawn_delivery(values(vec![]), responder, 0, &subscription);
        subscription.completed().await;

        assert_eq!(sent.lock().clone(), vec![WritePacket::disposed()]);
    }

    #[tokio::test]
    async fn failure_sends_one_error_and_stops() {
        let (sent, responder) = recorder();
        let subscription = ResponseSubscription::new();
        let failing: ResultStream = Box::pin(stream::iter(vec![
            Ok(json!("partial")),
            Err(HandlerError::internal("boom")),
            Ok(json!("never")),
        ]));
        spawn_delivery(failing, responder, 0, &subscription);
        subscription.completed().await;

        let sent = sent.lock().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].response, Some(json!("partial")));
        assert!(!sent[0].is_disposed);
        let expected = ErrorBody::new("INTERNAL_ERROR", "boom").to_value();
        assert_eq!(sent[1].err.as_ref(), Some(&expected));
        assert!(!sent[1].is_disposed);
    }

    #[tokio::test]
    async fn panicking_stream_becomes_an_error() {
        let (sent, responder) = recorder();
        let subscription = ResponseSubscription::new();
        let panicking: ResultStream = Box::pin(stream::poll_fn(|_| -> std::task::Poll<Option<HandlerResult>> {
            panic!("handler bug")
        }));
        spawn_delivery(panicking, responder, 0, &subscription);
        subscription.completed().await;

        let sent = sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].err.is_some());
    }

    #[tokio::test]
    async fn respond_failures_do_not_stop_delivery() {
        let attempts = Arc::new(Mutex::new(0_usize));
        let counter = Arc::clone(&attempts);
        let responder = move |_packet: WritePacket| {
            let counter = Arc::clone(&counter);
            async move {
                *counter.lock() += 1;
                Err::<(), _>(TransportError::Respond("peer gone".into()))
            }
        };
        let subscription = ResponseSubscription::new();
        spawn_delivery(
            values(vec![json!(1), json!(2)]),
            Arc::new(responder),
            1,
            &subscription,
        );
        subscription.completed().await;
        assert!(*attempts.lock() >= 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_pulling_and_disposes() {
        let (sent, responder) = recorder();
        let subscription = ResponseSubscription::new();
        let endless: ResultStream = Box::pin(stream::unfold(0_u64, |n| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Some((Ok::<_, HandlerError>(json!(n)), n + 1))
        }));
        spawn_delivery(endless, responder, 0, &subscription);

        tokio::time::sleep(Duration::from_millis(20)).await;
        subscription.unsubscribe();
        assert!(subscription.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), subscription.completed())
            .await
            .expect("delivery finished after unsubscribe");

        let sent = sent.lock().clone();
        assert!(sent.last().unwrap().is_disposed);
        assert!(subscription.is_completed());
    }

    #[tokio::test]
    async fn unsubscribe_keeps_frames_already_queued() {
        let (sent, responder) = recorder();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let gated = {
            let gate = Arc::clone(&gate);
            move |packet: WritePacket| {
                let gate = Arc::clone(&gate);
                let inner = Arc::clone(&responder);
                async move {
                    gate.acquire().await.unwrap().forget();
                    inner.respond(packet).await
                }
            }
        };
        let items: Vec<Value> = (0..5).map(|n| json!(n)).collect();
        let stalled: ResultStream = Box::pin(values(items.clone()).chain(stream::pending()));
        let subscription = ResponseSubscription::new();
        spawn_delivery(stalled, Arc::new(gated), 0, &subscription);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sent.lock().is_empty());
        subscription.unsubscribe();
        gate.add_permits(items.len() + 1);
        tokio::time::timeout(Duration::from_secs(1), subscription.completed())
            .await
            .expect("delivery finished after unsubscribe");

        let sent = sent.lock().clone();
        assert_eq!(responses(&sent), items);
        assert_eq!(sent.iter().filter(|p| p.is_disposed).count(), 1);
        assert!(sent.last().unwrap().is_disposed);
    }

    #[tokio::test]
    async fn bounded_queue_keeps_every_item() {
        let (sent, responder) = recorder();
        let slow = {
            let inner = Arc::clone(&responder);
            move |packet: WritePacket| {
                let inner = Arc::clone(&inner);
                async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    inner.respond(packet).await
                }
            }
        };
        let subscription = ResponseSubscription::new();
        let items: Vec<Value> = (0..20).map(|n| json!(n)).collect();
        spawn_delivery(values(items.clone()), Arc::new(slow), 2, &subscription);
        subscription.completed().await;

        assert_eq!(responses(&sent.lock()), items);
    }
}
