// ABOUTME: Core library for codeclaim, containing the discount/code domain types and ledger events.
// ABOUTME: This crate defines the shared data model used by the store, server, and CLI.

pub mod event;
pub mod model;

pub use event::{BroadcastSink, EventSink, LedgerEvent, NullSink};
pub use model::{Claim, Code, Discount, DiscountSummary, next_id};
