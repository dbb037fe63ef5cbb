// ============================
// crates/backend-lib/src/presence/mod.rs
// ============================
//! Realtime presence and live message delivery.
//!
//! - [`directory`]: the user to connection mapping
//! - [`lifecycle`]: the actor that owns the directory and reacts to
//!   connect / identify / close events
//! - [`relay`]: best-effort, at-most-once forwarding of chat messages
//! - [`roster`]: full-roster fan-out after every directory mutation
//!
//! Everything that touches the directory runs inside the single actor task,
//! and pushes to connections never await, so a mutation and the broadcast
//! it triggers are never interleaved with another event.

pub mod directory;
pub mod lifecycle;
pub mod relay;
pub mod roster;

pub use directory::{AddOutcome, DuplicatePolicy, PresenceDirectory};
pub use lifecycle::{spawn_presence_actor, IdentifyOutcome, PresenceActor, PresenceHandle};
pub use relay::{RelayOutcome, SendIntent};
pub use roster::BroadcastReport;

use serde::Serialize;
use stagescout_common::{ConnectionId, ServerToClient, UserId};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Outbound queue of one connection; drained by that connection's writer task
pub type Outbound = mpsc::Sender<ServerToClient>;

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Transport is open, no user bound yet
    Connected,
    /// Bound to a user through an identify event
    Identified { user_id: UserId },
    /// Terminal; the connection is gone
    Closed,
}

pub(crate) struct Connection {
    pub outbound: Outbound,
    pub state: ConnectionState,
}

pub(crate) type ConnectionTable = HashMap<ConnectionId, Connection>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushError {
    /// The writer is not keeping up
    Full,
    /// The writer is gone
    Closed,
}

/// Queue `msg` on a connection without waiting
pub(crate) fn push(outbound: &Outbound, msg: ServerToClient) -> Result<(), PushError> {
    outbound.try_send(msg).map_err(|e| match e {
        TrySendError::Full(_) => PushError::Full,
        TrySendError::Closed(_) => PushError::Closed,
    })
}
