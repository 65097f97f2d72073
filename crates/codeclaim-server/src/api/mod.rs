// ABOUTME: API module containing the HTTP handlers for the codeclaim REST API.
// ABOUTME: Maps ledger failures onto status codes and runs ledger calls off the async runtime.

pub mod codes;
pub mod discounts;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use codeclaim_store::{ErrorKind, LedgerError};

/// Translate a ledger failure into an HTTP response.
pub fn ledger_error_response(err: &LedgerError) -> Response {
    let domain = |status: StatusCode, message: String| {
        (
            status,
            Json(serde_json::json!({ "errors": { "discount": message } })),
        )
            .into_response()
    };

    match err.kind() {
        ErrorKind::InvalidArgument => domain(StatusCode::BAD_REQUEST, err.to_string()),
        ErrorKind::NotFound => domain(StatusCode::NOT_FOUND, "Not found".to_string()),
        ErrorKind::AlreadyClaimed => domain(
            StatusCode::CONFLICT,
            "You've already claimed this discount".to_string(),
        ),
        ErrorKind::Exhausted => domain(
            StatusCode::CONFLICT,
            "No codes left for this discount".to_string(),
        ),
        ErrorKind::LockTimeout => {
            tracing::warn!("ledger busy: {}", err);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": "ledger busy, retry later" })),
            )
                .into_response()
        }
        ErrorKind::PersistFailure | ErrorKind::Corrupt => {
            tracing::error!("ledger failure: {}", err);
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
        .into_response()
}

/// Run a ledger operation on the blocking pool. Writers may wait on the
/// snapshot lock, which must not stall the async runtime.
pub async fn run_ledger<T, F>(op: F) -> Result<T, Response>
where
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ledger_error_response(&e)),
        Err(e) => {
            tracing::error!("ledger task failed: {}", e);
            Err(internal_error())
        }
    }
}
