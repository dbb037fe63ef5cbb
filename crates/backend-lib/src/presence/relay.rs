//! Live message relay.
//!
//! A relay attempt resolves the receiver against the directory at the
//! instant of sending and pushes once. There is no queueing, retry or
//! acknowledgement; durability is the job of the REST persistence path.

use super::{push, ConnectionTable, PresenceDirectory};
use metrics::counter;
use stagescout_common::{ConnectionId, ServerToClient, UserId};
use tracing::debug;

use crate::metrics::{RELAY_DELIVERED, RELAY_DROPPED, RELAY_OFFLINE};

/// One live send request; exists only for the duration of a relay attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendIntent {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub payload: String,
}

/// How a relay attempt ended. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Queued on the receiver's current connection
    Delivered { connection_id: ConnectionId },
    /// The receiver has no directory entry
    Offline,
    /// The receiver was listed but its connection refused the push
    Dropped { connection_id: ConnectionId },
}

/// Push `intent` to the receiver's most recent connection, if any.
pub(crate) fn relay(
    directory: &PresenceDirectory,
    connections: &ConnectionTable,
    intent: SendIntent,
) -> RelayOutcome {
    let Some(entry) = directory.find(&intent.receiver_id) else {
        counter!(RELAY_OFFLINE).increment(1);
        debug!(receiver = %intent.receiver_id, "relay: receiver offline");
        return RelayOutcome::Offline;
    };
    let connection_id = entry.connection_id;

    let Some(connection) = connections.get(&connection_id) else {
        // Listed but already torn down
        counter!(RELAY_DROPPED).increment(1);
        return RelayOutcome::Dropped { connection_id };
    };

    let msg = ServerToClient::IncomingMessage {
        sender_id: intent.sender_id,
        text: intent.payload,
    };
    match push(&connection.outbound, msg) {
        Ok(()) => {
            counter!(RELAY_DELIVERED).increment(1);
            RelayOutcome::Delivered { connection_id }
        },
        Err(e) => {
            counter!(RELAY_DROPPED).increment(1);
            debug!(%connection_id, ?e, "relay: push refused, message lost on live path");
            RelayOutcome::Dropped { connection_id }
        },
    }
}
