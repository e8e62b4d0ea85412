//! Presence Registry
//!
//! Authoritative map from connection to public user record.
//! Every mutation is a point update keyed by connection id; only
//! `snapshot_all` walks the whole table.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::ids::{ConnectionId, SessionId};

/// Coarse user status.
///
/// The session id lives inside `InSession`, so a record carries a session id
/// exactly when it is in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    /// Connected, not queued, not playing.
    Lobby,
    /// Waiting in the matchmaking queue.
    Queued,
    /// Member of a session.
    InSession(SessionId),
}

impl UserStatus {
    /// Session id when in a session.
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            UserStatus::InSession(id) => Some(*id),
            _ => None,
        }
    }

    /// Public status label.
    pub fn kind(&self) -> StatusKind {
        match self {
            UserStatus::Lobby => StatusKind::Lobby,
            UserStatus::Queued => StatusKind::Queued,
            UserStatus::InSession(_) => StatusKind::InSession,
        }
    }
}

/// Status as shown to other users (no session id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusKind {
    /// Idle.
    Lobby,
    /// Searching for an opponent.
    Queued,
    /// Playing.
    InSession,
}

/// Identity a connection was admitted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Account id (absent for guests).
    pub account_id: Option<String>,
    /// Display name.
    pub display_name: String,
}

impl Identity {
    /// Identity for an anonymous guest.
    pub fn guest(display_name: impl Into<String>) -> Self {
        Self {
            account_id: None,
            display_name: display_name.into(),
        }
    }

    /// Whether this identity came from a verified credential.
    pub fn is_guest(&self) -> bool {
        self.account_id.is_none()
    }
}

/// One record per live connection.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Account id (absent for guests).
    pub account_id: Option<String>,
    /// Display name.
    pub display_name: String,
    /// Current status.
    pub status: UserStatus,
    /// Connect time.
    pub connected_at: DateTime<Utc>,
    /// Registration order, used to order snapshots.
    seq: u64,
}

impl UserRecord {
    /// Session id when in a session.
    pub fn session_id(&self) -> Option<SessionId> {
        self.status.session_id()
    }

    /// Id shown to the user themself: account id, or connection id for guests.
    pub fn user_id(&self) -> String {
        self.account_id
            .clone()
            .unwrap_or_else(|| self.connection_id.to_uuid_string())
    }
}

/// Public projection of a user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicUser {
    /// Connection id.
    pub id: ConnectionId,
    /// Display name.
    pub name: String,
    /// Coarse status.
    pub status: StatusKind,
}

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// Connection already has a record.
    #[error("connection {0} already registered")]
    AlreadyRegistered(ConnectionId),
}

/// The presence table.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    users: BTreeMap<ConnectionId, UserRecord>,
    next_seq: u64,
}

impl PresenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record for a new connection, starting in the lobby.
    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        identity: Identity,
    ) -> Result<UserRecord, PresenceError> {
        if self.users.contains_key(&connection_id) {
            return Err(PresenceError::AlreadyRegistered(connection_id));
        }

        let record = UserRecord {
            connection_id,
            account_id: identity.account_id,
            display_name: identity.display_name,
            status: UserStatus::Lobby,
            connected_at: Utc::now(),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.users.insert(connection_id, record.clone());
        Ok(record)
    }

    /// Look up a connection's record.
    pub fn lookup(&self, connection_id: &ConnectionId) -> Option<&UserRecord> {
        self.users.get(connection_id)
    }

    /// Set a connection's status. Returns false for unknown connections.
    pub fn update_status(&mut self, connection_id: &ConnectionId, status: UserStatus) -> bool {
        match self.users.get_mut(connection_id) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }

    /// Remove a connection's record.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<UserRecord> {
        self.users.remove(connection_id)
    }

    /// Public view of every user, in connect order.
    pub fn snapshot_all(&self) -> Vec<PublicUser> {
        let mut records: Vec<&UserRecord> = self.users.values().collect();
        records.sort_by_key(|r| r.seq);
        records.into_iter()
            .map(|r| PublicUser {
                id: r.connection_id,
                name: r.display_name.clone(),
                status: r.status.kind(),
            })
            .collect()
    }

    /// Every registered connection id.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.users.keys().copied().collect()
    }

    /// Connected user count.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// True when nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
