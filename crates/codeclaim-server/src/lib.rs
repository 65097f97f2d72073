// ABOUTME: HTTP server for codeclaim, exposing the discount ledger over a small JSON API.
// ABOUTME: Uses Axum with shared ledger state; identity comes from headers set by an upstream gateway.

pub mod api;
pub mod app_state;
pub mod config;
pub mod events;
pub mod identity;
pub mod routes;

pub use app_state::{AppState, SharedState};
pub use config::{CodeclaimConfig, ConfigError};
pub use events::spawn_event_logger;
pub use routes::create_router;
