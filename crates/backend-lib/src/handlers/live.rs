// ============================
// crates/backend-lib/src/handlers/live.rs
// ============================
//! Live WebSocket frame handling.
//!
//! Frames are parsed, validated and checked against the connection's
//! bearer identity here, at the boundary, before anything reaches the
//! presence actor.
use crate::error::AppError;
use crate::metrics::WS_FRAME_REJECTED;
use crate::presence::{IdentifyOutcome, PresenceHandle, RelayOutcome, SendIntent};
use crate::validation;
use metrics::counter;
use stagescout_common::{ClientToServer, ConnectionId, ServerToClient, UserId};
use tracing::{debug, warn};

/// What the boundary knows about one realtime connection
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    /// User of the bearer token presented on upgrade, if any
    pub authenticated: Option<UserId>,
    /// Whether identify / send must match `authenticated`
    pub enforce_identity: bool,
}

impl ConnectionContext {
    fn may_act_as(&self, user_id: &str) -> bool {
        !self.enforce_identity || self.authenticated.as_deref() == Some(user_id)
    }
}

fn rejected(code: &str, message: String) -> Option<ServerToClient> {
    counter!(WS_FRAME_REJECTED, "code" => code.to_string()).increment(1);
    Some(ServerToClient::Error {
        code: code.to_string(),
        message,
    })
}

/// Handle one raw text frame. Returns a reply for this connection, if any.
pub async fn handle_frame(
    text: &str,
    ctx: &ConnectionContext,
    presence: &PresenceHandle,
) -> Result<Option<ServerToClient>, AppError> {
    let msg = match serde_json::from_str::<ClientToServer>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(connection_id = %ctx.connection_id, "malformed frame: {e}");
            counter!(WS_FRAME_REJECTED, "code" => "MALFORMED").increment(1);
            return Ok(Some(ServerToClient::MalformedMessage {
                err_msg: e.to_string(),
            }));
        },
    };

    if let Err(e) = validation::validate_client_message(&msg) {
        return Ok(rejected("VALIDATION_ERROR", e.to_string()));
    }

    handle_client_message(msg, ctx, presence).await
}

/// Handle a parsed, validated client message
pub async fn handle_client_message(
    msg: ClientToServer,
    ctx: &ConnectionContext,
    presence: &PresenceHandle,
) -> Result<Option<ServerToClient>, AppError> {
    match msg {
        ClientToServer::Identify { user_id } => {
            if !ctx.may_act_as(&user_id) {
                warn!(
                    connection_id = %ctx.connection_id,
                    claimed = %user_id,
                    authenticated = ?ctx.authenticated,
                    "identify refused"
                );
                counter!(WS_FRAME_REJECTED, "code" => "IDENTIFY_REJECTED").increment(1);
                return Ok(Some(ServerToClient::IdentifyRejected {
                    reason: "Identity does not match the connection's token".to_string(),
                }));
            }

            match presence.identify(ctx.connection_id, user_id).await? {
                IdentifyOutcome::Registered { broadcast, .. } => {
                    debug!(
                        connection_id = %ctx.connection_id,
                        delivered = broadcast.delivered,
                        failed = broadcast.failed,
                        "roster broadcast after identify"
                    );
                },
                IdentifyOutcome::Ignored { .. } | IdentifyOutcome::UnknownConnection => {},
            }
            Ok(None)
        },

        ClientToServer::SendMessage {
            sender_id,
            receiver_id,
            text,
        } => {
            if !ctx.may_act_as(&sender_id) {
                return Ok(rejected(
                    "SENDER_MISMATCH",
                    "Sender does not match the connection's token".to_string(),
                ));
            }

            let intent = SendIntent {
                sender_id,
                receiver_id,
                payload: text,
            };
            // The sender gets no confirmation either way
            match presence.relay(intent).await? {
                RelayOutcome::Delivered { connection_id } => {
                    debug!(from = %ctx.connection_id, to = %connection_id, "message relayed");
                },
                RelayOutcome::Offline => {
                    debug!(from = %ctx.connection_id, "receiver offline, relying on stored copy");
                },
                RelayOutcome::Dropped { connection_id } => {
                    debug!(from = %ctx.connection_id, to = %connection_id, "live push dropped");
                },
            }
            Ok(None)
        },
    }
}
