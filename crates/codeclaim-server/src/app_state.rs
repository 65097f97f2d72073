// ABOUTME: Shared application state for the codeclaim HTTP server.
// ABOUTME: Holds the discount ledger and the broadcast sink its events are published to.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use codeclaim_core::BroadcastSink;
use codeclaim_store::DiscountLedger;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared application state accessible by all Axum handlers.
pub struct AppState {
    pub ledger: DiscountLedger,
    pub events: BroadcastSink,
}

/// Type alias for the Arc-wrapped state used with Axum's State extractor.
pub type SharedState = Arc<AppState>;

impl AppState {
    /// Create a new AppState whose ledger persists to `db_path` and publishes
    /// its events on a fresh broadcast channel.
    pub fn new(db_path: PathBuf, lock_timeout: Duration) -> Self {
        let events = BroadcastSink::new(EVENT_CHANNEL_CAPACITY);
        let ledger = DiscountLedger::new(db_path)
            .with_lock_timeout(lock_timeout)
            .with_sink(Arc::new(events.clone()));
        Self { ledger, events }
    }
}
