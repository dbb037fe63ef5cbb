// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_FRAME_REJECTED: &str = "ws.frame_rejected";
pub const PRESENCE_IDENTIFIED: &str = "presence.identified";
pub const PRESENCE_ONLINE: &str = "presence.online";
pub const RELAY_DELIVERED: &str = "relay.delivered";
pub const RELAY_OFFLINE: &str = "relay.offline";
pub const RELAY_DROPPED: &str = "relay.dropped";
pub const ROSTER_BROADCAST: &str = "roster.broadcast";
pub const ROSTER_SEND_FAILED: &str = "roster.send_failed";
pub const CONVERSATION_CREATED: &str = "conversation.created";
pub const MESSAGE_PERSISTED: &str = "message.persisted";
