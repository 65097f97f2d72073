// ABOUTME: Defines Discount and Code, the entities persisted in the discount ledger.
// ABOUTME: A Code's claim (user, time, store) is set exactly once and never cleared.

use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

static ID_GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// A fresh ULID, strictly greater than every id previously issued by this
/// process, so store key order matches creation order.
pub fn next_id() -> Ulid {
    ID_GENERATOR
        .lock()
        .ok()
        .and_then(|mut generator| generator.generate().ok())
        .unwrap_or_else(Ulid::new)
}

/// Who claimed a code, when, and at which store location. The three values
/// only ever exist together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub user_id: String,
    pub claimed_at: DateTime<Utc>,
    pub store_id: String,
}

/// A single redeemable unit within a discount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    pub id: Ulid,
    pub claim: Option<Claim>,
}

impl Code {
    /// Create an unclaimed code with a fresh ULID.
    pub fn new() -> Self {
        Self {
            id: next_id(),
            claim: None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }

    pub fn claimed_by(&self) -> Option<&str> {
        self.claim.as_ref().map(|c| c.user_id.as_str())
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claim.as_ref().map(|c| c.claimed_at)
    }

    pub fn claimed_in(&self) -> Option<&str> {
        self.claim.as_ref().map(|c| c.store_id.as_str())
    }

    /// Record a claim on this code. Returns false and leaves the code
    /// untouched if it was already claimed.
    #[must_use]
    pub fn mark_claimed(&mut self, user_id: &str, store_id: &str, at: DateTime<Utc>) -> bool {
        if self.claim.is_some() {
            return false;
        }
        self.claim = Some(Claim {
            user_id: user_id.to_string(),
            claimed_at: at,
            store_id: store_id.to_string(),
        });
        true
    }
}

impl Default for Code {
    fn default() -> Self {
        Self::new()
    }
}

/// A named batch of codes owned by one brand. The number of codes is
/// fixed when the discount is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub id: Ulid,
    pub name: String,
    pub brand_id: String,
    pub codes: Vec<Code>,
    pub created_at: DateTime<Utc>,
}

impl Discount {
    /// Create a discount with `count` fresh unclaimed codes. Callers are
    /// responsible for validating `count`.
    pub fn new(name: String, brand_id: String, count: usize) -> Self {
        Self {
            id: next_id(),
            name,
            brand_id,
            codes: (0..count).map(|_| Code::new()).collect(),
            created_at: Utc::now(),
        }
    }

    pub fn claimed_count(&self) -> usize {
        self.codes.iter().filter(|c| c.is_claimed()).count()
    }

    /// The code already held by `user_id`, if any.
    pub fn code_held_by(&self, user_id: &str) -> Option<&Code> {
        self.codes.iter().find(|c| c.claimed_by() == Some(user_id))
    }

    /// Index of the lowest-positioned unclaimed code.
    pub fn first_unclaimed(&self) -> Option<usize> {
        self.codes.iter().position(|c| !c.is_claimed())
    }

    pub fn summary(&self) -> DiscountSummary {
        DiscountSummary {
            id: self.id,
            name: self.name.clone(),
            brand_id: self.brand_id.clone(),
            codes: self.codes.len(),
            claimed: self.claimed_count(),
        }
    }
}

/// The public view of a discount: counts instead of the codes themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountSummary {
    pub id: Ulid,
    pub name: String,
    pub brand_id: String,
    pub codes: usize,
    pub claimed: usize,
}
