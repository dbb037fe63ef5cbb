// ============================
// crates/backend-lib/src/handlers/messages.rs
// ============================
//! Conversation and message endpoints (`/api/messages`).
//!
//! Persisting a message here is the only delivery guarantee the system
//! offers; live pushes happen separately over the realtime connection.
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::metrics::{CONVERSATION_CREATED, MESSAGE_PERSISTED};
use crate::storage::Storage;
use crate::validation;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use metrics::counter;
use stagescout_common::{ChatMessage, Conversation, NewConversation, NewMessage};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

async fn conversation_for<S: Storage>(
    storage: &S,
    id: Uuid,
    user: &AuthUser,
) -> Result<Conversation, AppError> {
    let conversation = storage.get_conversation(id).await?;
    if !conversation.has_participant(&user.user_id) {
        return Err(AppError::Forbidden(format!(
            "user {} is not part of conversation {id}",
            user.user_id
        )));
    }
    Ok(conversation)
}

/// `POST /api/messages/conversations`: return the existing conversation with
/// the receiver, or start one
pub async fn new_conversation<S: Storage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<NewConversation>,
) -> Result<(StatusCode, Json<Conversation>), AppError> {
    validation::validate_new_conversation(&user.user_id, &body)?;

    let (conversation, created) = state
        .storage
        .find_or_create_conversation(&user.user_id, &body.receiver_id)
        .await?;
    if !created {
        return Ok((StatusCode::OK, Json(conversation)));
    }

    counter!(CONVERSATION_CREATED).increment(1);
    info!(conversation_id = %conversation.id, "conversation created");
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// `GET /api/messages/conversations`
pub async fn get_conversations<S: Storage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Conversation>>, AppError> {
    Ok(Json(state.storage.list_conversations_for(&user.user_id).await?))
}

/// `POST /api/messages`: persist a message sent by the caller
pub async fn add_message<S: Storage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<NewMessage>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    validation::validate_new_message(&body)?;

    let conversation = conversation_for(&state.storage, body.conversation_id, &user).await?;
    if !conversation.has_participant(&body.receiver) {
        return Err(AppError::InvalidInput(format!(
            "receiver {} is not part of conversation {}",
            body.receiver, conversation.id
        )));
    }

    let message = state
        .storage
        .create_message(conversation.id, &user.user_id, &body.receiver, &body.text)
        .await?;

    counter!(MESSAGE_PERSISTED).increment(1);
    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /api/messages/{conversation_id}`
pub async fn get_messages<S: Storage + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Extension(user): Extension<AuthUser>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let conversation = conversation_for(&state.storage, conversation_id, &user).await?;
    Ok(Json(state.storage.list_messages(conversation.id).await?))
}
