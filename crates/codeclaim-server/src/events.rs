// ABOUTME: Background consumer of ledger events published on the broadcast sink.
// ABOUTME: Logs each event; this is where brand notification or webhook dispatch would hook in.

use codeclaim_core::{BroadcastSink, LedgerEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Spawn a task that logs every ledger event until the sink is dropped.
pub fn spawn_event_logger(sink: &BroadcastSink) -> JoinHandle<()> {
    let mut rx = sink.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("event logger lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &LedgerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => tracing::info!(target: "codeclaim::events", "{}", json),
        Err(e) => tracing::warn!("failed to serialize ledger event: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use codeclaim_core::EventSink;
    use ulid::Ulid;

    #[tokio::test]
    async fn logger_exits_when_sink_is_dropped() {
        let sink = BroadcastSink::new(8);
        let task = spawn_event_logger(&sink);

        sink.publish(LedgerEvent::DiscountCreated {
            discount_id: Ulid::new(),
            brand_id: "brand-1".to_string(),
            name: "Logged".to_string(),
            count: 1,
            at: Utc::now(),
        });
        drop(sink);

        task.await.expect("logger task should finish cleanly");
    }
}
