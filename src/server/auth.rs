use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::registry::TokenRegistry;

const BEARER_SEPARATOR: &str = "Bearer ";

/// Rejects any request whose `Authorization` header does not carry a registered token.
///
/// The registry lock is released before the wrapped handler runs.
pub(crate) async fn require_bearer(
    State(registry): State<Arc<TokenRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()).map(str::to_string) else {
        debug!(path = %request.uri().path(), "malformed authorization header");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if !registry.token_is_valid(&token).await {
        debug!(path = %request.uri().path(), "invalid desktop auth token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    next.run(request).await
}

/// Extracts the token from `Bearer <token>`.
///
/// Splitting on the separator must yield exactly two segments with nothing before the
/// scheme and a non-empty token after it.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;

    let mut segments = raw.split(BEARER_SEPARATOR);
    match (segments.next(), segments.next(), segments.next()) {
        (Some(""), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}
