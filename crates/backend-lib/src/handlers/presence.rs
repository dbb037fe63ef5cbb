//! Read-only view of the online roster.
use crate::{error::AppError, storage::Storage, AppState};
use axum::{extract::State, Json};
use stagescout_common::PresenceEntry;
use std::sync::Arc;

/// `GET /api/presence`
pub async fn online_users<S: Storage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<PresenceEntry>>, AppError> {
    Ok(Json(state.presence.snapshot().await?))
}
