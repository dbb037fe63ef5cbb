// ============================
// crates/backend-lib/src/presence/lifecycle.rs
// ============================
//! Connection lifecycle manager.
//!
//! A single actor task owns the [`PresenceDirectory`] and the table of open
//! connections. Connect, identify, relay and close events are processed one
//! at a time in arrival order; for one connection that is the order its
//! transport delivered them.
//!
//! ```text
//! Connected --identify--> Identified --identify--> Identified
//!     |                        |
//!     +---------close----------+----> Closed
//! ```

use metrics::{counter, gauge};
use stagescout_common::{ConnectionId, PresenceEntry, UserId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::relay::{relay, RelayOutcome, SendIntent};
use super::roster::{broadcast_roster, BroadcastReport};
use super::{
    AddOutcome, Connection, ConnectionState, ConnectionTable, DuplicatePolicy, Outbound,
    PresenceDirectory,
};
use crate::error::AppError;
use crate::metrics::{PRESENCE_IDENTIFIED, PRESENCE_ONLINE, WS_ACTIVE, WS_CONNECTION, WS_DISCONNECTION};

/// Result of an identify event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyOutcome {
    /// The directory changed and the roster was broadcast
    Registered {
        outcome: AddOutcome,
        broadcast: BroadcastReport,
    },
    /// The duplicate policy kept an older entry; the unchanged roster was
    /// still broadcast so the identifying connection gets a copy
    Ignored { broadcast: BroadcastReport },
    /// The connection is not open (closed before the event was processed)
    UnknownConnection,
}

/// Message sent *into* the actor
#[derive(Debug)]
pub enum ActorMsg {
    Connect {
        connection_id: ConnectionId,
        outbound: Outbound,
        resp_tx: oneshot::Sender<()>,
    },
    Identify {
        connection_id: ConnectionId,
        user_id: UserId,
        resp_tx: oneshot::Sender<IdentifyOutcome>,
    },
    Relay {
        intent: SendIntent,
        resp_tx: oneshot::Sender<RelayOutcome>,
    },
    Disconnect {
        connection_id: ConnectionId,
        resp_tx: oneshot::Sender<BroadcastReport>,
    },
    Find {
        user_id: UserId,
        resp_tx: oneshot::Sender<Option<PresenceEntry>>,
    },
    Snapshot {
        resp_tx: oneshot::Sender<Vec<PresenceEntry>>,
    },
    State {
        connection_id: ConnectionId,
        resp_tx: oneshot::Sender<ConnectionState>,
    },
}

/// Handle that other components keep: the actor's command channel
#[derive(Clone, Debug)]
pub struct PresenceHandle {
    cmd_tx: mpsc::UnboundedSender<ActorMsg>,
}

impl PresenceHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ActorMsg,
    ) -> Result<T, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(build(resp_tx))?;
        Ok(resp_rx.await?)
    }

    /// Register a freshly opened transport connection (state `Connected`)
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        outbound: Outbound,
    ) -> Result<(), AppError> {
        self.request(|resp_tx| ActorMsg::Connect {
            connection_id,
            outbound,
            resp_tx,
        })
        .await
    }

    /// Bind `connection_id` to `user_id` and broadcast the new roster
    pub async fn identify(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
    ) -> Result<IdentifyOutcome, AppError> {
        self.request(|resp_tx| ActorMsg::Identify {
            connection_id,
            user_id,
            resp_tx,
        })
        .await
    }

    /// Best-effort live delivery of a chat message
    pub async fn relay(&self, intent: SendIntent) -> Result<RelayOutcome, AppError> {
        self.request(|resp_tx| ActorMsg::Relay { intent, resp_tx })
            .await
    }

    /// Handle a transport close; safe for never-identified or unknown connections
    pub async fn disconnect(
        &self,
        connection_id: ConnectionId,
    ) -> Result<BroadcastReport, AppError> {
        self.request(|resp_tx| ActorMsg::Disconnect {
            connection_id,
            resp_tx,
        })
        .await
    }

    pub async fn find(&self, user_id: &str) -> Result<Option<PresenceEntry>, AppError> {
        let user_id = user_id.to_string();
        self.request(|resp_tx| ActorMsg::Find { user_id, resp_tx })
            .await
    }

    pub async fn snapshot(&self) -> Result<Vec<PresenceEntry>, AppError> {
        self.request(|resp_tx| ActorMsg::Snapshot { resp_tx }).await
    }

    pub async fn connection_state(
        &self,
        connection_id: ConnectionId,
    ) -> Result<ConnectionState, AppError> {
        self.request(|resp_tx| ActorMsg::State {
            connection_id,
            resp_tx,
        })
        .await
    }
}

pub struct PresenceActor {
    directory: PresenceDirectory,
    connections: ConnectionTable,
}

impl PresenceActor {
    pub fn new(policy: DuplicatePolicy) -> Self {
        PresenceActor {
            directory: PresenceDirectory::new(policy),
            connections: ConnectionTable::new(),
        }
    }

    fn handle_connect(&mut self, connection_id: ConnectionId, outbound: Outbound) {
        self.connections.insert(
            connection_id,
            Connection {
                outbound,
                state: ConnectionState::Connected,
            },
        );
        counter!(WS_CONNECTION).increment(1);
        gauge!(WS_ACTIVE).set(self.connections.len() as f64);
        debug!(%connection_id, "connection opened");
    }

    fn handle_identify(&mut self, connection_id: ConnectionId, user_id: UserId) -> IdentifyOutcome {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            debug!(%connection_id, %user_id, "identify for a connection that is not open");
            return IdentifyOutcome::UnknownConnection;
        };

        let outcome = self.directory.add(user_id.clone(), connection_id);
        // An ignored identify leaves an existing binding in place
        if outcome.is_mutation() || connection.state == ConnectionState::Connected {
            connection.state = ConnectionState::Identified {
                user_id: user_id.clone(),
            };
        }

        if !outcome.is_mutation() {
            debug!(%connection_id, %user_id, "identify ignored, user already present");
            let broadcast = broadcast_roster(self.directory.snapshot(), &self.connections);
            return IdentifyOutcome::Ignored { broadcast };
        }
        if let AddOutcome::Replaced { evicted } = &outcome {
            for id in evicted {
                if let Some(old) = self.connections.get_mut(id) {
                    old.state = ConnectionState::Connected;
                }
            }
        }

        counter!(PRESENCE_IDENTIFIED).increment(1);
        gauge!(PRESENCE_ONLINE).set(self.directory.len() as f64);
        info!(%connection_id, %user_id, online = self.directory.len(), "user identified");

        let broadcast = broadcast_roster(self.directory.snapshot(), &self.connections);
        IdentifyOutcome::Registered { outcome, broadcast }
    }

    fn handle_disconnect(&mut self, connection_id: ConnectionId) -> BroadcastReport {
        // Discard first so the closing connection is not a broadcast recipient
        let was_open = self.connections.remove(&connection_id).is_some();
        let removed = self.directory.remove(connection_id);

        if was_open {
            counter!(WS_DISCONNECTION).increment(1);
            gauge!(WS_ACTIVE).set(self.connections.len() as f64);
        }
        gauge!(PRESENCE_ONLINE).set(self.directory.len() as f64);
        debug!(%connection_id, removed, "connection closed");

        broadcast_roster(self.directory.snapshot(), &self.connections)
    }

    fn connection_state(&self, connection_id: ConnectionId) -> ConnectionState {
        self.connections
            .get(&connection_id)
            .map_or(ConnectionState::Closed, |c| c.state.clone())
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ActorMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                ActorMsg::Connect {
                    connection_id,
                    outbound,
                    resp_tx,
                } => {
                    self.handle_connect(connection_id, outbound);
                    let _ = resp_tx.send(());
                },
                ActorMsg::Identify {
                    connection_id,
                    user_id,
                    resp_tx,
                } => {
                    let outcome = self.handle_identify(connection_id, user_id);
                    let _ = resp_tx.send(outcome);
                },
                ActorMsg::Relay { intent, resp_tx } => {
                    let outcome = relay(&self.directory, &self.connections, intent);
                    let _ = resp_tx.send(outcome);
                },
                ActorMsg::Disconnect {
                    connection_id,
                    resp_tx,
                } => {
                    let report = self.handle_disconnect(connection_id);
                    let _ = resp_tx.send(report);
                },
                ActorMsg::Find { user_id, resp_tx } => {
                    let _ = resp_tx.send(self.directory.find(&user_id).cloned());
                },
                ActorMsg::Snapshot { resp_tx } => {
                    let _ = resp_tx.send(self.directory.snapshot());
                },
                ActorMsg::State {
                    connection_id,
                    resp_tx,
                } => {
                    let _ = resp_tx.send(self.connection_state(connection_id));
                },
            }
        }
        debug!("presence actor stopped");
    }
}

/// Spawn the presence actor and return its handle
pub fn spawn_presence_actor(policy: DuplicatePolicy) -> PresenceHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let actor = PresenceActor::new(policy);

    tokio::spawn(async move {
        actor.run(cmd_rx).await;
    });

    PresenceHandle { cmd_tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagescout_common::ServerToClient;
    use uuid::Uuid;

    struct TestConn {
        id: ConnectionId,
        rx: mpsc::Receiver<ServerToClient>,
    }

    impl TestConn {
        fn drain(&mut self) -> Vec<ServerToClient> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }

        fn last_roster(&mut self) -> Option<Vec<PresenceEntry>> {
            self.drain().into_iter().rev().find_map(|m| match m {
                ServerToClient::RosterUpdate { users } => Some(users),
                _ => None,
            })
        }
    }

    async fn open(handle: &PresenceHandle) -> TestConn {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(16);
        handle.connect(id, tx).await.unwrap();
        TestConn { id, rx }
    }

    fn send(to: &str, from: &str, text: &str) -> SendIntent {
        SendIntent {
            sender_id: from.to_string(),
            receiver_id: to.to_string(),
            payload: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_connect_does_not_touch_directory() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let mut c1 = open(&handle).await;

        assert!(handle.snapshot().await.unwrap().is_empty());
        assert_eq!(
            handle.connection_state(c1.id).await.unwrap(),
            ConnectionState::Connected
        );
        assert!(c1.drain().is_empty());
    }

    #[tokio::test]
    async fn test_identify_then_disconnect() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let c1 = open(&handle).await;

        handle.identify(c1.id, "u1".to_string()).await.unwrap();
        assert_eq!(handle.find("u1").await.unwrap().unwrap().connection_id, c1.id);
        assert_eq!(
            handle.connection_state(c1.id).await.unwrap(),
            ConnectionState::Identified {
                user_id: "u1".to_string()
            }
        );

        handle.disconnect(c1.id).await.unwrap();
        assert!(handle.find("u1").await.unwrap().is_none());
        assert_eq!(
            handle.connection_state(c1.id).await.unwrap(),
            ConnectionState::Closed
        );
    }

    #[tokio::test]
    async fn test_relay_reaches_only_receiver() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let mut c1 = open(&handle).await;
        let mut c2 = open(&handle).await;
        handle.identify(c1.id, "u1".to_string()).await.unwrap();
        handle.identify(c2.id, "u2".to_string()).await.unwrap();
        c1.drain();
        c2.drain();

        let outcome = handle.relay(send("u2", "u1", "hi")).await.unwrap();
        assert_eq!(outcome, RelayOutcome::Delivered { connection_id: c2.id });
        assert_eq!(
            c2.drain(),
            vec![ServerToClient::IncomingMessage {
                sender_id: "u1".to_string(),
                text: "hi".to_string()
            }]
        );
        assert!(c1.drain().is_empty());

        let before = handle.snapshot().await.unwrap();
        let outcome = handle.relay(send("u3", "u2", "hey")).await.unwrap();
        assert_eq!(outcome, RelayOutcome::Offline);
        assert_eq!(handle.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_roster_reaches_every_connection_including_trigger() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let mut c1 = open(&handle).await;
        let mut c2 = open(&handle).await;
        let mut anonymous = open(&handle).await;

        let outcome = handle.identify(c1.id, "u1".to_string()).await.unwrap();
        let IdentifyOutcome::Registered { broadcast, .. } = outcome else {
            panic!("expected registration, got {outcome:?}")
        };
        assert_eq!(broadcast, BroadcastReport { delivered: 3, failed: 0 });

        let expected = vec![PresenceEntry {
            user_id: "u1".to_string(),
            connection_id: c1.id,
        }];
        assert_eq!(c1.last_roster().unwrap(), expected);
        assert_eq!(c2.last_roster().unwrap(), expected);
        assert_eq!(anonymous.last_roster().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_to_remaining() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let c1 = open(&handle).await;
        let mut c2 = open(&handle).await;
        handle.identify(c1.id, "u1".to_string()).await.unwrap();
        handle.identify(c2.id, "u2".to_string()).await.unwrap();
        c2.drain();

        let report = handle.disconnect(c1.id).await.unwrap();
        assert_eq!(report, BroadcastReport { delivered: 1, failed: 0 });
        assert_eq!(
            c2.last_roster().unwrap(),
            vec![PresenceEntry {
                user_id: "u2".to_string(),
                connection_id: c2.id,
            }]
        );
    }

    #[tokio::test]
    async fn test_close_of_unidentified_or_unknown_connection() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let c1 = open(&handle).await;
        let mut c2 = open(&handle).await;

        handle.disconnect(c1.id).await.unwrap();
        handle.disconnect(c1.id).await.unwrap();
        handle.disconnect(Uuid::new_v4()).await.unwrap();

        assert!(handle.snapshot().await.unwrap().is_empty());
        // Every close still rebroadcasts to whoever is left
        assert_eq!(c2.drain().len(), 3);
    }

    #[tokio::test]
    async fn test_relay_after_receiver_left_is_offline() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let c1 = open(&handle).await;
        handle.identify(c1.id, "u1".to_string()).await.unwrap();
        handle.disconnect(c1.id).await.unwrap();

        let outcome = handle.relay(send("u1", "u9", "late")).await.unwrap();
        assert_eq!(outcome, RelayOutcome::Offline);
    }

    #[tokio::test]
    async fn test_relay_to_stalled_writer_is_dropped() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(1);
        handle.connect(id, tx).await.unwrap();
        // Roster update fills the single slot
        handle.identify(id, "u1".to_string()).await.unwrap();

        let outcome = handle.relay(send("u1", "u2", "lost")).await.unwrap();
        assert_eq!(outcome, RelayOutcome::Dropped { connection_id: id });
        drop(rx);
    }

    #[tokio::test]
    async fn test_identify_twice_on_same_connection() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let mut c1 = open(&handle).await;

        handle.identify(c1.id, "u1".to_string()).await.unwrap();
        handle.identify(c1.id, "u1".to_string()).await.unwrap();

        let roster = handle.snapshot().await.unwrap();
        assert_eq!(roster.len(), 1);
        // Both identifications were broadcast
        assert_eq!(c1.drain().len(), 2);
    }

    #[tokio::test]
    async fn test_two_connections_same_user_per_policy() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let c1 = open(&handle).await;
        let c2 = open(&handle).await;
        handle.identify(c1.id, "u1".to_string()).await.unwrap();
        handle.identify(c2.id, "u1".to_string()).await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap().len(), 2);
        assert_eq!(handle.find("u1").await.unwrap().unwrap().connection_id, c2.id);

        let handle = spawn_presence_actor(DuplicatePolicy::Replace);
        let c1 = open(&handle).await;
        let c2 = open(&handle).await;
        handle.identify(c1.id, "u1".to_string()).await.unwrap();
        handle.identify(c2.id, "u1".to_string()).await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap().len(), 1);
        assert_eq!(
            handle.connection_state(c1.id).await.unwrap(),
            ConnectionState::Connected
        );

        let handle = spawn_presence_actor(DuplicatePolicy::KeepFirst);
        let c1 = open(&handle).await;
        let mut c2 = open(&handle).await;
        handle.identify(c1.id, "u1".to_string()).await.unwrap();
        c2.drain();
        let outcome = handle.identify(c2.id, "u1".to_string()).await.unwrap();
        assert!(matches!(outcome, IdentifyOutcome::Ignored { .. }));
        assert_eq!(handle.find("u1").await.unwrap().unwrap().connection_id, c1.id);
        assert_eq!(handle.snapshot().await.unwrap().len(), 1);
        // The late tab still learns who is online
        assert_eq!(
            c2.last_roster().unwrap(),
            vec![PresenceEntry {
                user_id: "u1".to_string(),
                connection_id: c1.id,
            }]
        );
    }

    #[tokio::test]
    async fn test_ignored_identify_still_broadcasts() {
        let handle = spawn_presence_actor(DuplicatePolicy::KeepFirst);
        let mut c1 = open(&handle).await;
        let mut c2 = open(&handle).await;
        handle.identify(c1.id, "u1".to_string()).await.unwrap();
        c1.drain();
        c2.drain();

        let outcome = handle.identify(c2.id, "u1".to_string()).await.unwrap();
        assert_eq!(
            outcome,
            IdentifyOutcome::Ignored {
                broadcast: BroadcastReport {
                    delivered: 2,
                    failed: 0
                }
            }
        );
        assert_eq!(c1.last_roster().unwrap().len(), 1);
        assert_eq!(c2.last_roster().unwrap().len(), 1);
        assert_eq!(
            handle.connection_state(c2.id).await.unwrap(),
            ConnectionState::Identified {
                user_id: "u1".to_string()
            }
        );

        // Closing the ignored tab leaves the first entry alone
        handle.disconnect(c2.id).await.unwrap();
        assert_eq!(handle.find("u1").await.unwrap().unwrap().connection_id, c1.id);
    }

    #[tokio::test]
    async fn test_ignored_identify_keeps_existing_binding() {
        let handle = spawn_presence_actor(DuplicatePolicy::KeepFirst);
        let c1 = open(&handle).await;
        let c2 = open(&handle).await;
        handle.identify(c1.id, "u1".to_string()).await.unwrap();
        handle.identify(c2.id, "u2".to_string()).await.unwrap();

        let outcome = handle.identify(c2.id, "u1".to_string()).await.unwrap();
        assert!(matches!(outcome, IdentifyOutcome::Ignored { .. }));
        assert_eq!(
            handle.connection_state(c2.id).await.unwrap(),
            ConnectionState::Identified {
                user_id: "u2".to_string()
            }
        );
        assert_eq!(handle.find("u2").await.unwrap().unwrap().connection_id, c2.id);
    }

    #[tokio::test]
    async fn test_identify_after_close_is_unknown() {
        let handle = spawn_presence_actor(DuplicatePolicy::Append);
        let c1 = open(&handle).await;
        handle.disconnect(c1.id).await.unwrap();

        let outcome = handle.identify(c1.id, "u1".to_string()).await.unwrap();
        assert_eq!(outcome, IdentifyOutcome::UnknownConnection);
        assert!(handle.find("u1").await.unwrap().is_none());
    }
}
