// ABOUTME: Discount API handlers: create a discount, list a brand's discounts, and claim a code.
// ABOUTME: Each handler forwards to the ledger on the blocking pool and maps failures to status codes.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use codeclaim_core::DiscountSummary;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::api::run_ledger;
use crate::app_state::SharedState;
use crate::identity::{BrandIdentity, UserIdentity};

/// Request body for creating a discount.
#[derive(Debug, Deserialize)]
pub struct CreateDiscountRequest {
    pub name: String,
    pub count: i64,
}

/// Query string for listing discounts.
#[derive(Debug, Deserialize)]
pub struct ListDiscountsQuery {
    pub brand: String,
}

/// Request body for claiming a code.
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub discount: Ulid,
    pub store: String,
}

/// Response body after a successful claim.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub code: Ulid,
}

/// POST /discount - Issue a discount for the caller's brand.
pub async fn create_discount(
    State(state): State<SharedState>,
    BrandIdentity(brand_id): BrandIdentity,
    Json(req): Json<CreateDiscountRequest>,
) -> Response {
    let ledger = state.ledger.clone();
    match run_ledger(move || ledger.create(&req.name, &brand_id, req.count)).await {
        Ok(discount) => (StatusCode::CREATED, Json(discount.summary())).into_response(),
        Err(resp) => resp,
    }
}

/// GET /discounts?brand=<id> - List a brand's discounts with claim counts.
pub async fn list_discounts(
    State(state): State<SharedState>,
    Query(query): Query<ListDiscountsQuery>,
) -> Result<Json<Vec<DiscountSummary>>, Response> {
    let ledger = state.ledger.clone();
    let summaries = run_ledger(move || ledger.summaries(&query.brand)).await?;
    Ok(Json(summaries))
}

/// POST /discount/claim - Claim one code of a discount for the caller.
pub async fn claim_code(
    State(state): State<SharedState>,
    UserIdentity(user_id): UserIdentity,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, Response> {
    let ledger = state.ledger.clone();
    let code = run_ledger(move || ledger.claim(req.discount, &req.store, &user_id)).await?;
    Ok(Json(ClaimResponse { code }))
}
