// ABOUTME: DiscountLedger, the domain layer over SnapshotStore: create, list, and claim discount codes.
// ABOUTME: Claims run inside one locked load-check-commit session, so each user wins at most one code per discount.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use codeclaim_core::{Code, Discount, DiscountSummary, EventSink, LedgerEvent, NullSink};
use thiserror::Error;
use ulid::Ulid;

use crate::lock::{DEFAULT_LOCK_TIMEOUT, LockError};
use crate::snapshot::{OpenMode, SnapshotStore, StoreError};

/// Upper bound on the number of codes a single discount may hold.
pub const MAX_CODES_PER_DISCOUNT: usize = 100_000;

type DiscountStore = SnapshotStore<Ulid, Discount>;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("discount not found: {0}")]
    DiscountNotFound(Ulid),

    #[error("user {user_id} has already claimed discount {discount_id}")]
    AlreadyClaimed { discount_id: Ulid, user_id: String },

    #[error("no codes left for discount {0}")]
    Exhausted(Ulid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse failure categories, for callers that translate ledger failures
/// into transport responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyClaimed,
    Exhausted,
    PersistFailure,
    LockTimeout,
    Corrupt,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LedgerError::DiscountNotFound(_) => ErrorKind::NotFound,
            LedgerError::AlreadyClaimed { .. } => ErrorKind::AlreadyClaimed,
            LedgerError::Exhausted(_) => ErrorKind::Exhausted,
            LedgerError::Store(e) => match e {
                StoreError::NotFound { .. } => ErrorKind::NotFound,
                StoreError::Corrupt { .. } => ErrorKind::Corrupt,
                StoreError::Lock(LockError::Timeout { .. }) => ErrorKind::LockTimeout,
                StoreError::Lock(LockError::Io { .. })
                | StoreError::ReadOnly { .. }
                | StoreError::Closed { .. }
                | StoreError::PersistFailure { .. }
                | StoreError::Io { .. } => ErrorKind::PersistFailure,
            },
        }
    }
}

/// Discounts and their codes, persisted in one snapshot file.
///
/// Each operation runs in its own store session. Mutations open the
/// snapshot for writing, which takes the file's writer lock for the whole
/// load-check-commit sequence. Reads open it read-only and never wait on
/// writers.
#[derive(Clone)]
pub struct DiscountLedger {
    path: PathBuf,
    lock_timeout: Duration,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for DiscountLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscountLedger")
            .field("path", &self.path)
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

impl DiscountLedger {
    /// Bind a ledger to a snapshot file. The file is created on the first
    /// mutation if it does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_writer(&self) -> Result<DiscountStore, LedgerError> {
        Ok(SnapshotStore::open_with_timeout(
            &self.path,
            OpenMode::CreateOrOpen,
            self.lock_timeout,
        )?)
    }

    /// A read-only session, or None if nothing has been written yet.
    fn open_reader(&self) -> Result<Option<DiscountStore>, LedgerError> {
        match SnapshotStore::open(&self.path, OpenMode::Read) {
            Ok(store) => Ok(Some(store)),
            Err(StoreError::NotFound { .. }) if !self.path.exists() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Issue a new discount with `count` unclaimed codes.
    pub fn create(&self, name: &str, brand_id: &str, count: i64) -> Result<Discount, LedgerError> {
        if name.trim().is_empty() {
            return Err(LedgerError::InvalidArgument(
                "name must not be empty".to_string(),
            ));
        }
        if brand_id.trim().is_empty() {
            return Err(LedgerError::InvalidArgument(
                "brand must not be empty".to_string(),
            ));
        }
        let count = usize::try_from(count)
            .ok()
            .filter(|c| (1..=MAX_CODES_PER_DISCOUNT).contains(c))
            .ok_or_else(|| {
                LedgerError::InvalidArgument(format!(
                    "count must be between 1 and {}, got {}",
                    MAX_CODES_PER_DISCOUNT, count
                ))
            })?;

        let discount = Discount::new(name.to_string(), brand_id.to_string(), count);

        let mut store = self.open_writer()?;
        store.put(discount.id, discount.clone())?;
        store.close()?;

        tracing::info!(
            discount_id = %discount.id,
            brand_id = %discount.brand_id,
            count,
            "discount created"
        );
        self.sink.publish(LedgerEvent::DiscountCreated {
            discount_id: discount.id,
            brand_id: discount.brand_id.clone(),
            name: discount.name.clone(),
            count,
            at: discount.created_at,
        });

        Ok(discount)
    }

    /// Every discount owned by `brand_id`, in store order.
    pub fn list(&self, brand_id: &str) -> Result<Vec<Discount>, LedgerError> {
        let Some(store) = self.open_reader()? else {
            return Ok(Vec::new());
        };
        Ok(store
            .iter()
            .filter(|(_, d)| d.brand_id == brand_id)
            .map(|(_, d)| d.clone())
            .collect())
    }

    /// Summaries (code and claim counts) of every discount owned by `brand_id`.
    pub fn summaries(&self, brand_id: &str) -> Result<Vec<DiscountSummary>, LedgerError> {
        Ok(self.list(brand_id)?.iter().map(Discount::summary).collect())
    }

    /// Fetch a single discount.
    pub fn get(&self, discount_id: Ulid) -> Result<Discount, LedgerError> {
        self.open_reader()?
            .and_then(|store| store.get(&discount_id).cloned())
            .ok_or(LedgerError::DiscountNotFound(discount_id))
    }

    /// Every code, across all discounts, claimed by `user_id`.
    pub fn codes_claimed_by(&self, user_id: &str) -> Result<Vec<Code>, LedgerError> {
        let Some(store) = self.open_reader()? else {
            return Ok(Vec::new());
        };
        Ok(store
            .iter()
            .flat_map(|(_, d)| d.codes.iter())
            .filter(|c| c.claimed_by() == Some(user_id))
            .cloned()
            .collect())
    }

    /// Award `user_id` the lowest-indexed unclaimed code of a discount and
    /// return its id. A user holding any code of the discount is rejected.
    /// `store_id` is recorded as given.
    pub fn claim(&self, discount_id: Ulid, store_id: &str, user_id: &str) -> Result<Ulid, LedgerError> {
        let mut store = self.open_writer()?;

        let mut discount = store
            .get(&discount_id)
            .cloned()
            .ok_or(LedgerError::DiscountNotFound(discount_id))?;

        if discount.code_held_by(user_id).is_some() {
            tracing::warn!(%discount_id, user_id, "claim rejected: already claimed");
            return Err(LedgerError::AlreadyClaimed {
                discount_id,
                user_id: user_id.to_string(),
            });
        }

        let Some(index) = discount.first_unclaimed() else {
            tracing::warn!(%discount_id, user_id, "claim rejected: no codes left");
            return Err(LedgerError::Exhausted(discount_id));
        };
        let at = Utc::now();
        let code = &mut discount.codes[index];
        let marked = code.mark_claimed(user_id, store_id, at);
        debug_assert!(marked, "first_unclaimed returned a claimed code");
        let code_id = code.id;

        store.put(discount_id, discount)?;
        store.close()?;

        tracing::info!(%discount_id, %code_id, user_id, store_id, "code claimed");
        self.sink.publish(LedgerEvent::CodeClaimed {
            discount_id,
            code_id,
            user_id: user_id.to_string(),
            store_id: store_id.to_string(),
            at,
        });

        Ok(code_id)
    }
}
