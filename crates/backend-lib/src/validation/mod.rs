// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Boundary validation for realtime frames and REST bodies.
//!
//! Malformed identifiers are rejected here so the presence core can assume
//! well-formed input.

use regex::Regex;
use stagescout_common::{ClientToServer, NewConversation, NewMessage};
use std::sync::LazyLock;
use thiserror::Error;

const MAX_USER_ID_LENGTH: usize = 64;
const MAX_MESSAGE_LENGTH: usize = 5000;

static USER_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid user ID: {0}")]
    InvalidUserId(String),

    #[error("Invalid message text: {0}")]
    InvalidText(String),

    #[error("Invalid conversation: {0}")]
    InvalidConversation(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a user ID
pub fn validate_user_id(user_id: &str) -> ValidationResult<&str> {
    if user_id.is_empty() {
        return Err(ValidationError::InvalidUserId(
            "User ID must not be empty".to_string(),
        ));
    }

    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err(ValidationError::InvalidUserId(format!(
            "User ID cannot exceed {MAX_USER_ID_LENGTH} characters"
        )));
    }

    if !USER_ID_REGEX.is_match(user_id) {
        return Err(ValidationError::InvalidUserId(
            "User ID must contain only alphanumeric characters, '-' and '_'".to_string(),
        ));
    }

    Ok(user_id)
}

/// Validate chat message text
pub fn validate_text(text: &str) -> ValidationResult<&str> {
    if text.trim().is_empty() {
        return Err(ValidationError::InvalidText(
            "Message text must not be empty".to_string(),
        ));
    }

    if text.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ValidationError::InvalidText(format!(
            "Message text cannot exceed {MAX_MESSAGE_LENGTH} characters"
        )));
    }

    Ok(text)
}

/// Validates a client frame
pub fn validate_client_message(message: &ClientToServer) -> ValidationResult<()> {
    match message {
        ClientToServer::Identify { user_id } => {
            validate_user_id(user_id)?;
        },
        ClientToServer::SendMessage {
            sender_id,
            receiver_id,
            text,
        } => {
            validate_user_id(sender_id)?;
            validate_user_id(receiver_id)?;
            validate_text(text)?;
        },
    }

    Ok(())
}

/// Validate the body of a conversation request made by `caller`
pub fn validate_new_conversation(caller: &str, body: &NewConversation) -> ValidationResult<()> {
    validate_user_id(&body.receiver_id)?;
    if body.receiver_id == caller {
        return Err(ValidationError::InvalidConversation(
            "Cannot start a conversation with yourself".to_string(),
        ));
    }
    Ok(())
}

/// Validate the body of a message creation request
pub fn validate_new_message(body: &NewMessage) -> ValidationResult<()> {
    validate_user_id(&body.receiver)?;
    validate_text(&body.text)?;
    Ok(())
}
