//! Authorization gate for token-protected routes

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::error;

use crate::{
    error::{ApiError, ApiResult},
    session::SessionManager,
    state::AppState,
};

/// Header carrying the session token
pub const TOKEN_HEADER: &str = "x-token";

/// Authenticated user information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
}

/// Token the current request was authorized with
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// Read the session token header, treating blank values as absent
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|header| header.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve a token header value to the user it identifies
///
/// Absent, unknown, revoked and expired tokens all fail the same way.
pub async fn authorize(sessions: &SessionManager, token: Option<&str>) -> ApiResult<AuthUser> {
    let token = token.ok_or(ApiError::Unauthorized)?;

    let user_id = sessions
        .resolve(token)
        .await
        .map_err(|e| {
            error!("Failed to resolve session: {}", e);
            ApiError::InternalServerError
        })?
        .ok_or(ApiError::Unauthorized)?;

    Ok(AuthUser { id: user_id })
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token_from_headers(req.headers()).map(str::to_string);
    let user = authorize(&state.sessions, token.as_deref()).await?;

    // Insert the user and token into the request extensions
    req.extensions_mut().insert(user);
    if let Some(token) = token {
        req.extensions_mut().insert(SessionToken(token));
    }

    Ok(next.run(req).await)
}
