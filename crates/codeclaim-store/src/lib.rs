// ABOUTME: Persistence layer for codeclaim, handling snapshot storage and claim transactions.
// ABOUTME: Provides the generic atomic SnapshotStore, path-scoped writer locks, and the DiscountLedger.

pub mod ledger;
pub mod lock;
pub mod snapshot;

pub use ledger::{DiscountLedger, ErrorKind, LedgerError, MAX_CODES_PER_DISCOUNT};
pub use lock::{DEFAULT_LOCK_TIMEOUT, LockError, WriterLock};
pub use snapshot::{OpenMode, PersistError, SnapshotStore, StoreError};
