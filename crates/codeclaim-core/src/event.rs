// ABOUTME: Defines ledger events and the EventSink boundary used to hand them to outside consumers.
// ABOUTME: Publishing is fire-and-forget: sinks never block and never fail the originating operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

/// Facts emitted after a ledger mutation has been durably committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerEvent {
    DiscountCreated {
        discount_id: Ulid,
        brand_id: String,
        name: String,
        count: usize,
        at: DateTime<Utc>,
    },
    CodeClaimed {
        discount_id: Ulid,
        code_id: Ulid,
        user_id: String,
        store_id: String,
        at: DateTime<Utc>,
    },
}

/// Receives ledger events for delivery to external systems (brand
/// notification, store webhooks, ...). Implementations must return promptly.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: LedgerEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: LedgerEvent) {}
}

/// Fans events out over a tokio broadcast channel. Having no subscribers,
/// or subscribers that lag behind, is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LedgerEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: LedgerEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("ledger event dropped: no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claimed_event() -> LedgerEvent {
        LedgerEvent::CodeClaimed {
            discount_id: Ulid::new(),
            code_id: Ulid::new(),
            user_id: "user-1".to_string(),
            store_id: "store-1".to_string(),
            at: Utc::now(),
        }
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let json = serde_json::to_value(claimed_event()).expect("serialize event");
        assert_eq!(json["type"], "CodeClaimed");
        assert_eq!(json["user_id"], "user-1");

        let back: LedgerEvent = serde_json::from_value(json).expect("deserialize event");
        assert!(matches!(back, LedgerEvent::CodeClaimed { .. }));
    }

    #[test]
    fn broadcast_sink_without_subscribers_does_not_fail() {
        let sink = BroadcastSink::new(4);
        sink.publish(claimed_event());
    }

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(4);
        let mut rx = sink.subscribe();
        let event = claimed_event();

        sink.publish(event.clone());

        let received = rx.recv().await.expect("should receive event");
        assert_eq!(received, event);
    }
}
