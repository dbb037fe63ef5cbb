//! Bearer token authentication.
use crate::{error::AppError, storage::Storage, AppState};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// The token of an `Authorization: Bearer <token>` header, if any
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Reject requests without a valid bearer token; otherwise attach the [`AuthUser`](crate::auth::AuthUser)
pub async fn require_auth<S: Storage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| AppError::Auth("Not authorized, no token".to_string()))?;

    let user = state.auth.verify(token).map_err(|e| {
        tracing::debug!("token rejected: {e}");
        AppError::Auth("Not authorized, token failed".to_string())
    })?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
