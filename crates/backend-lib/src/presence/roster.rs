//! Roster fan-out: after each directory mutation the whole roster is
//! pushed to every open connection, identified or not.

use super::{push, ConnectionTable, PushError};
use metrics::counter;
use stagescout_common::{PresenceEntry, ServerToClient};
use tracing::warn;

use crate::metrics::{ROSTER_BROADCAST, ROSTER_SEND_FAILED};

/// Per-broadcast delivery summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Push `roster` to every connection in `connections`.
///
/// A failing recipient is logged and skipped; it never stops the others.
pub(crate) fn broadcast_roster(
    roster: Vec<PresenceEntry>,
    connections: &ConnectionTable,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for (connection_id, connection) in connections {
        let msg = ServerToClient::RosterUpdate {
            users: roster.clone(),
        };
        match push(&connection.outbound, msg) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                match e {
                    PushError::Full => {
                        warn!(%connection_id, "roster update skipped, outbound queue full");
                    },
                    PushError::Closed => {
                        warn!(%connection_id, "roster update skipped, connection writer gone");
                    },
                }
            },
        }
    }

    counter!(ROSTER_BROADCAST).increment(1);
    if report.failed > 0 {
        counter!(ROSTER_SEND_FAILED).increment(report.failed as u64);
    }
    report
}
