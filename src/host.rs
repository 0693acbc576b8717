//! Host environment notifications.
//!
//! The cache does not watch the host (page, window, terminal) itself. The
//! host emits [`HostEvent`]s into a [`HostEvents`] source, and a
//! [`QueryClient`](crate::client::QueryClient) listening on it refetches the
//! queries that opted into the matching trigger.
//!
//! # Example
//!
//! ```
//! use tears_query::host::{HostEvent, HostEvents};
//!
//! let events = HostEvents::new();
//! let _listener = events.stream();
//!
//! // Returns an error only when nobody is listening.
//! events.emit(HostEvent::Visible).expect("stream is listening");
//! ```

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A change in the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEvent {
    /// The page became visible (window regained focus).
    Visible,
    /// The page was hidden.
    Hidden,
    /// The host navigated to another view.
    Navigated,
}

/// A cloneable source of [`HostEvent`]s.
///
/// Uses a broadcast channel internally, so the host and any number of
/// listeners can share it.
#[derive(Debug, Clone)]
pub struct HostEvents {
    sender: broadcast::Sender<HostEvent>,
}

impl HostEvents {
    /// Creates a source buffering up to `capacity` unread events per listener.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _rx) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a source with default capacity (100).
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// Emits an event to every listener.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no active listeners.
    pub fn emit(&self, event: HostEvent) -> Result<usize, broadcast::error::SendError<HostEvent>> {
        self.sender.send(event)
    }

    /// Returns the number of active listeners.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// A stream of events emitted after this call.
    ///
    /// A listener that falls behind skips the events it missed.
    pub fn stream(&self) -> BoxStream<'static, HostEvent> {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|result| async move {
                match result {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "host event listener lagged");
                        None
                    }
                }
            })
            .boxed()
    }
}

impl Default for HostEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a running host-event listener task.
#[derive(Debug)]
pub struct ListenerHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl ListenerHandle {
    pub(crate) const fn new(token: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { token, join }
    }

    /// Returns `true` if the listener task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stops the listener and waits for the task to finish.
    ///
    /// A listener task that panicked is logged, not propagated.
    pub async fn cancel(self) {
        self.token.cancel();
        if let Err(err) = self.join.await {
            if err.is_panic() {
                warn!(error = %err, "host event listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_events_creation() {
        let events = HostEvents::new();
        assert_eq!(events.receiver_count(), 0);
    }

    #[test]
    fn test_emit_without_listeners_fails() {
        let events = HostEvents::new();
        assert!(events.emit(HostEvent::Visible).is_err());

        let _stream = events.stream();
        assert_eq!(events.receiver_count(), 1);
        assert_eq!(
            events
                .emit(HostEvent::Visible)
                .expect("should emit to listener"),
            1
        );
    }

    #[test]
    fn test_clone_shares_channel() {
        let events = HostEvents::new();
        let clone = events.clone();

        let _stream = events.stream();
        assert_eq!(clone.receiver_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_receives_events_in_order() {
        let events = HostEvents::new();
        let mut stream = events.stream();

        events.emit(HostEvent::Hidden).expect("should emit to stream");
        events.emit(HostEvent::Visible).expect("should emit to stream");
        events.emit(HostEvent::Navigated).expect("should emit to stream");

        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event);
            }
        }

        assert_eq!(
            received,
            vec![HostEvent::Hidden, HostEvent::Visible, HostEvent::Navigated]
        );
    }

    #[tokio::test]
    async fn test_cancel_after_listener_panicked() {
        let token = CancellationToken::new();
        let join = tokio::spawn(async {
            panic!("listener bug");
        });
        let handle = ListenerHandle::new(token.clone(), join);

        tokio::task::yield_now().await;
        handle.cancel().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_lagging_stream_skips_missed_events() {
        let events = HostEvents::with_capacity(1);
        let mut stream = events.stream();

        events.emit(HostEvent::Hidden).expect("should emit to stream");
        events.emit(HostEvent::Visible).expect("should emit to stream");

        assert_eq!(stream.next().await, Some(HostEvent::Visible));
    }
}
