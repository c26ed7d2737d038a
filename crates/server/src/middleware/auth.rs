use crate::api::ErrorResponse;
use crate::config::AppState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

/// Extract the bearer token from the authorization header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Check a request against the configured token.
///
/// Without a configured token every request is accepted. Otherwise the header must be
/// exactly `Bearer <token>`.
pub fn is_authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(token) => bearer_token(headers) == Some(token),
    }
}

/// Bearer token enforcement middleware
pub async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !is_authorized(req.headers(), state.auth_token.as_deref()) {
        tracing::debug!(path = %req.uri().path(), "Rejected unauthenticated request");
        return (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new("Unauthorized"))).into_response();
    }

    next.run(req).await
}
