// ABOUTME: Code API handler listing every code the calling user has claimed.
// ABOUTME: Scans all discounts in a read-only ledger session.

use axum::Json;
use axum::extract::State;
use axum::response::Response;
use codeclaim_core::Code;

use crate::api::run_ledger;
use crate::app_state::SharedState;
use crate::identity::UserIdentity;

/// GET /codes - Codes claimed by the caller, across all discounts.
pub async fn my_claimed_codes(
    State(state): State<SharedState>,
    UserIdentity(user_id): UserIdentity,
) -> Result<Json<Vec<Code>>, Response> {
    let ledger = state.ledger.clone();
    let codes = run_ledger(move || ledger.codes_claimed_by(&user_id)).await?;
    Ok(Json(codes))
}
