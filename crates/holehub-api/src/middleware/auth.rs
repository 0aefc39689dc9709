//! Session authentication middleware
//!
//! Reads the session JWT from the `session_token` cookie or an
//! `Authorization: Bearer` header and injects [`AuthUser`] into request extensions.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use holehub_proto::{ErrorCode, ErrorResponse, SESSION_COOKIE};
use tracing::debug;

use crate::AppState;

/// The user a request acts on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub username: String,
}

/// Session token from the cookie, falling back to the Authorization header
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .map(str::trim)
        .find_map(|cookie| {
            cookie
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
    })
}

fn unauthorized(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(
            ErrorResponse::new(ErrorCode::SessionRequired, message)
                .with_suggestion("Sign in again with `holehub login`"),
        ),
    )
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let token = extract_token(request.headers()).ok_or_else(|| {
        unauthorized("Missing session token (cookie or Authorization header)")
    })?;

    let claims = state
        .sessions
        .validate(&token)
        .map_err(|e| unauthorized(format!("Invalid or expired session: {}", e)))?;

    debug!(user = %claims.sub, "Authenticated request");
    request.extensions_mut().insert(AuthUser {
        username: claims.sub,
    });

    Ok(next.run(request).await)
}
