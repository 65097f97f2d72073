// ABOUTME: Extractors for caller identity supplied by the upstream authentication gateway.
// ABOUTME: The gateway verifies credentials and forwards user/brand ids in headers that are trusted as-is.

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};

pub const USER_HEADER: &str = "x-user-id";
pub const BRAND_HEADER: &str = "x-brand-id";

/// The authenticated end user making the request.
#[derive(Debug, Clone)]
pub struct UserIdentity(pub String);

/// The authenticated brand making the request.
#[derive(Debug, Clone)]
pub struct BrandIdentity(pub String);

fn header_value(parts: &Parts, name: &str) -> Result<String, Response> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": format!("missing {} header", name) })),
            )
                .into_response()
        })
}

impl<S: Send + Sync> FromRequestParts<S> for UserIdentity {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_value(parts, USER_HEADER).map(UserIdentity)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for BrandIdentity {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_value(parts, BRAND_HEADER).map(BrandIdentity)
    }
}
