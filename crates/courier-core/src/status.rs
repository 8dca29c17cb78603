//! Connectivity status stream.
//!
//! Servers and clients publish an application-defined status (usually an
//! enum such as `Connected` / `Disconnected`). Observers get the latest value
//! on subscribe and then every change; re-publishing the current value is a
//! no-op.

use std::pin::Pin;

use futures::Stream;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;

/// Boxed stream of status values.
pub type StatusStream<S> = Pin<Box<dyn Stream<Item = S> + Send>>;

/// Publishes status changes to any number of observers.
#[derive(Debug)]
pub struct StatusReporter<S> {
    tx: watch::Sender<Option<S>>,
}

impl<S> StatusReporter<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a reporter with no status yet.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish a status. Returns `false` when it equals the current one.
    pub fn set(&self, status: S) -> bool {
        self.tx.send_if_modified(|current| {
            if current.as_ref() == Some(&status) {
                false
            } else {
                *current = Some(status);
                true
            }
        })
    }

    /// The latest status, if any was published.
    pub fn current(&self) -> Option<S> {
        self.tx.borrow().clone()
    }

    /// Subscribe: replays the latest status (if any), then each change.
    ///
    /// Observers that fall behind see only the most recent value.
    pub fn subscribe(&self) -> StatusStream<S> {
        Box::pin(WatchStream::new(self.tx.subscribe()).filter_map(|status| status))
    }
}

impl<S> Default for StatusReporter<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    enum Conn {
        Connected,
        Disconnected,
    }

    #[test]
    fn no_status_initially() {
        let reporter: StatusReporter<Conn> = StatusReporter::new();
        assert!(reporter.current().is_none());
    }

    #[test]
    fn duplicate_is_suppressed() {
        let reporter = StatusReporter::new();
        assert!(reporter.set(Conn::Connected));
        assert!(!reporter.set(Conn::Connected));
        assert!(reporter.set(Conn::Disconnected));
        assert_eq!(reporter.current(), Some(Conn::Disconnected));
    }

    #[tokio::test]
    async fn late_subscriber_gets_latest() {
        let reporter = StatusReporter::new();
        let _ = reporter.set(Conn::Disconnected);
        let _ = reporter.set(Conn::Connected);

        let mut stream = reporter.subscribe();
        assert_eq!(stream.next().await, Some(Conn::Connected));
    }

    #[tokio::test]
    async fn subscriber_sees_changes_only() {
        let reporter = StatusReporter::new();
        let mut stream = reporter.subscribe();

        let _ = reporter.set(Conn::Connected);
        assert_eq!(stream.next().await, Some(Conn::Connected));

        let _ = reporter.set(Conn::Connected);
        let pending = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(pending.is_err(), "duplicate status must not be delivered");

        let _ = reporter.set(Conn::Disconnected);
        assert_eq!(stream.next().await, Some(Conn::Disconnected));
    }

    #[tokio::test]
    async fn nothing_replayed_before_first_status() {
        let reporter: StatusReporter<Conn> = StatusReporter::new();
        let mut stream = reporter.subscribe();
        let pending = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(pending.is_err());
    }
}
