// ============================
// crates/backend-lib/src/presence/directory.rs
// ============================
//! In-memory online-user directory.
//!
//! Maps logical users to the realtime connections they are reachable on.
//! The directory itself does no I/O and never fails; it is owned by the
//! presence actor, which is the only writer.

use serde::{Deserialize, Serialize};
use stagescout_common::{ConnectionId, PresenceEntry, UserId};

/// What happens when a user identifies while already present on another connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep one entry per connection; a user may be listed several times
    #[default]
    Append,
    /// Drop the user's other entries so only the newest connection is listed
    Replace,
    /// Ignore the identification if the user is already listed
    KeepFirst,
}

/// Result of [`PresenceDirectory::add`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new entry was recorded
    Inserted,
    /// The entry was recorded after evicting these connections' entries
    Replaced { evicted: Vec<ConnectionId> },
    /// The user was already listed and the policy kept the older entry
    Ignored,
}

impl AddOutcome {
    /// Whether the directory changed
    pub fn is_mutation(&self) -> bool {
        !matches!(self, AddOutcome::Ignored)
    }
}

/// Ordered set of presence entries, oldest first
#[derive(Debug, Default, Clone)]
pub struct PresenceDirectory {
    entries: Vec<PresenceEntry>,
    policy: DuplicatePolicy,
}

impl PresenceDirectory {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            entries: Vec::new(),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Record that `user_id` is reachable at `connection_id`.
    ///
    /// A connection is listed at most once: if it was already bound (to this
    /// or another user) that binding is dropped first, so a re-identifying
    /// connection moves to the end of the roster. How other connections of
    /// the same user are treated depends on the [`DuplicatePolicy`].
    pub fn add(&mut self, user_id: UserId, connection_id: ConnectionId) -> AddOutcome {
        let rebinding = self
            .entries
            .iter()
            .any(|e| e.connection_id == connection_id);

        if self.policy == DuplicatePolicy::KeepFirst
            && self
                .entries
                .iter()
                .any(|e| e.user_id == user_id && e.connection_id != connection_id)
        {
            return AddOutcome::Ignored;
        }

        if rebinding {
            self.entries.retain(|e| e.connection_id != connection_id);
        }

        let mut evicted = Vec::new();
        if self.policy == DuplicatePolicy::Replace {
            self.entries.retain(|e| {
                if e.user_id == user_id {
                    evicted.push(e.connection_id);
                    false
                } else {
                    true
                }
            });
        }

        self.entries.push(PresenceEntry {
            user_id,
            connection_id,
        });

        if evicted.is_empty() {
            AddOutcome::Inserted
        } else {
            AddOutcome::Replaced { evicted }
        }
    }

    /// Remove every entry bound to `connection_id`, returning how many were removed.
    ///
    /// Removing an unknown connection is a normal event and returns 0.
    pub fn remove(&mut self, connection_id: ConnectionId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.connection_id != connection_id);
        before - self.entries.len()
    }

    /// The most recently added entry for `user_id`, or `None` if the user is offline
    pub fn find(&self, user_id: &str) -> Option<&PresenceEntry> {
        self.entries.iter().rev().find(|e| e.user_id == user_id)
    }

    /// Point-in-time copy of the roster
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
