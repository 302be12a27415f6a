//! Event system for asynchronous notifications.
//!
//! Messages that no command is waiting for (roster-sync acknowledgements,
//! unsolicited bulk payloads, malformed-message reports) and connection
//! state changes are delivered to subscribers through a broadcast channel.
//! Any number of subscribers may listen; a subscription created after an
//! event was dispatched does not see it.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::protocol::LogicalMessage;
use crate::transport::ChannelId;

/// Event types that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// Session established.
    Connected,
    /// Session ended, intentionally or by link loss.
    Disconnected,
    /// A classified message arrived that no pending command claimed.
    DataReceived {
        /// Channel the message was reassembled on.
        channel: ChannelId,
        /// The classified message.
        message: LogicalMessage,
    },
    /// An asynchronous failure: parse/classification errors, reassembly
    /// truncation. These occur outside any caller's direct invocation, so
    /// they are reported here instead of being thrown.
    Error {
        /// Bounded description of the failure.
        message: String,
    },
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the dispatcher is gone. A lagged subscriber skips
    /// missed events rather than erroring.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers. Having no subscribers is not
    /// an error.
    pub fn dispatch(&self, event: Event) {
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_dispatch() {
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();

        dispatcher.dispatch(Event::Connected);

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), sub.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(Event::Connected)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_see_the_same_event() {
        let dispatcher = EventDispatcher::new(16);
        let mut first = dispatcher.subscribe();
        let mut second = dispatcher.subscribe();

        dispatcher.dispatch(Event::Error {
            message: "oops".into(),
        });

        for sub in [&mut first, &mut second] {
            let event = sub.recv().await.unwrap();
            assert!(matches!(event, Event::Error { .. }));
        }
    }

    #[tokio::test]
    async fn test_dispatch_without_subscribers_is_fine() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher.dispatch(Event::Disconnected);
    }
}
