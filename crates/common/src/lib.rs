// ================
// common/src/lib.rs
// ================
//! Common types shared between the `StageScout` clients and server.
//! This module defines the realtime WebSocket protocol and the REST
//! payloads of the messaging API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a logical user (matches the persisted user identity)
pub type UserId = String;

/// Identifier of one realtime connection, issued at connect time and never reused
pub type ConnectionId = Uuid;

/// One row of the online roster
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    /// The user reachable on this connection
    pub user_id: UserId,
    /// The connection the user is reachable on
    pub connection_id: ConnectionId,
}

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "msgType", rename_all_fields = "camelCase")]
pub enum ClientToServer {
    /// Bind the calling connection to a user
    /// # Fields
    /// * `user_id` - The user this connection claims to be
    Identify { user_id: UserId },
    /// Ask the server to push a chat message to a live receiver
    /// # Fields
    /// * `sender_id` - The sending user
    /// * `receiver_id` - The receiving user
    /// * `text` - Message body
    SendMessage {
        sender_id: UserId,
        receiver_id: UserId,
        text: String,
    },
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "msgType", rename_all_fields = "camelCase")]
pub enum ServerToClient {
    /// Full replacement of the online roster
    RosterUpdate {
        /// Every current directory entry, oldest first
        users: Vec<PresenceEntry>,
    },
    /// A live chat message for the receiving connection
    IncomingMessage {
        /// Who sent it
        sender_id: UserId,
        /// Message body
        text: String,
    },
    /// The identification was refused before reaching the directory
    IdentifyRejected {
        /// Reason for rejection
        reason: String,
    },
    /// Error response for frames that could not be parsed
    MalformedMessage {
        /// Error description
        err_msg: String,
    },
    /// Error response for frames that were parsed but refused
    Error {
        /// Machine readable error code
        code: String,
        /// Error description
        message: String,
    },
}

/// A two-party conversation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether `user_id` takes part in this conversation
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

/// A durably stored chat message
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: UserId,
    pub receiver: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /api/messages/conversations`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub receiver_id: UserId,
}

/// Body of `POST /api/messages`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub receiver: UserId,
    pub text: String,
}
