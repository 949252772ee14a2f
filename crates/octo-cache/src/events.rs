//! Change notifications emitted after committed writes.
//!
//! The store and the feed index share one broadcast channel; observers
//! subscribe to the whole stream or to a filtered per-id / per-feed view,
//! so the UI can re-render without polling.

use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{ContentId, FeedId};

/// Default broadcast capacity. Sized for feed-resync bursts; a lagging
/// subscriber drops the oldest events, never blocks a writer.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// An event describing a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A content record was inserted or merged.
    ContentUpserted { id: ContentId },
    /// A content record was deleted (explicitly or by GC).
    ContentDeleted { id: ContentId },
    /// A feed page was replaced with freshly fetched rows.
    FeedPageReplaced { feed_id: FeedId },
    /// A feed and all its membership rows were discarded.
    FeedRemoved { feed_id: FeedId },
    /// Every record's interactions and aggregates were cleared (logout).
    InteractionsReset,
    /// Every record was forced stale (display language change).
    AllMarkedStale,
}

impl CacheEvent {
    /// Whether this event concerns the given content id.
    pub fn concerns_content(&self, id: &ContentId) -> bool {
        match self {
            CacheEvent::ContentUpserted { id: event_id }
            | CacheEvent::ContentDeleted { id: event_id } => event_id == id,
            CacheEvent::InteractionsReset | CacheEvent::AllMarkedStale => true,
            _ => false,
        }
    }

    /// Whether this event concerns the given feed.
    pub fn concerns_feed(&self, feed_id: &FeedId) -> bool {
        match self {
            CacheEvent::FeedPageReplaced { feed_id: event_feed }
            | CacheEvent::FeedRemoved { feed_id: event_feed } => event_feed == feed_id,
            _ => false,
        }
    }
}

/// Shared sender side of the change-notification stream.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<CacheEvent>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    /// Emit an event for a committed write. Having no subscribers is normal.
    pub fn send(&self, event: CacheEvent) {
        if self.tx.send(event).is_err() {
            trace!("no subscribers for cache event");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_subscribers_is_fine() {
        let notifier = Notifier::new();
        notifier.send(CacheEvent::InteractionsReset);
    }

    #[tokio::test]
    async fn subscriber_sees_events_in_order() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.send(CacheEvent::ContentUpserted {
            id: ContentId::from("a"),
        });
        notifier.send(CacheEvent::ContentDeleted {
            id: ContentId::from("a"),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            CacheEvent::ContentUpserted {
                id: ContentId::from("a")
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            CacheEvent::ContentDeleted {
                id: ContentId::from("a")
            }
        );
    }

    #[test]
    fn concerns_filters() {
        let event = CacheEvent::ContentUpserted {
            id: ContentId::from("x"),
        };
        assert!(event.concerns_content(&ContentId::from("x")));
        assert!(!event.concerns_content(&ContentId::from("y")));
        assert!(!event.concerns_feed(&FeedId::from("f")));

        let event = CacheEvent::FeedPageReplaced {
            feed_id: FeedId::from("f"),
        };
        assert!(event.concerns_feed(&FeedId::from("f")));
        assert!(!event.concerns_feed(&FeedId::from("g")));
    }
}
