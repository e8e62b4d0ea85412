//! Lobby Engine
//!
//! Owns the presence registry, the matchmaking queue and the session store,
//! and implements every state-changing operation on them. All methods take
//! `&mut self`; the dispatcher serializes calls behind one lock.
//!
//! Operations return addressed [`Outbound`] messages instead of sending.

use tracing::{debug, info, warn};

use crate::core::ids::{ConnectionId, SessionId};
use crate::game::moves::Move;
use crate::game::session::{MoveOutcome, PlayerSlot, SessionStore, SESSION_SIZE};
use crate::lobby::outbound::{Outbound, Recipient};
use crate::lobby::presence::{Identity, PresenceError, PresenceRegistry, UserStatus};
use crate::lobby::queue::{MatchQueue, QueueError};
use crate::network::protocol::{
    ErrorCode, GameResultInfo, MatchFoundInfo, PlayerInfo, PlayerNotice, ServerMessage, UserData,
};

/// Lobby errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    /// No record for this connection (raced with disconnect).
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Connection registered twice.
    #[error("connection {0} already registered")]
    AlreadyRegistered(ConnectionId),

    /// Already waiting in the queue.
    #[error("already queued")]
    AlreadyQueued,

    /// Joined the queue while still in a session.
    #[error("already in a session")]
    AlreadyInSession,

    /// Session operation without a session.
    #[error("not in a session")]
    NotInSession,
}

impl From<PresenceError> for LobbyError {
    fn from(err: PresenceError) -> Self {
        match err {
            PresenceError::AlreadyRegistered(id) => LobbyError::AlreadyRegistered(id),
        }
    }
}

impl From<QueueError> for LobbyError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::AlreadyQueued => LobbyError::AlreadyQueued,
        }
    }
}

impl LobbyError {
    /// What to tell the originating connection, if anything.
    pub fn client_message(&self) -> Option<ServerMessage> {
        match self {
            LobbyError::UnknownConnection(_) => None,
            LobbyError::AlreadyRegistered(_) => Some(ServerMessage::error(
                ErrorCode::InternalError,
                "Connection already registered",
            )),
            LobbyError::AlreadyQueued => Some(ServerMessage::error(
                ErrorCode::AlreadyQueued,
                "Already in queue",
            )),
            LobbyError::AlreadyInSession => Some(ServerMessage::error(
                ErrorCode::AlreadyInSession,
                "Leave your current room before joining the queue",
            )),
            LobbyError::NotInSession => Some(ServerMessage::error(
                ErrorCode::NotInSession,
                "Not in a room",
            )),
        }
    }
}

/// Registry, queue and sessions behind one owner.
#[derive(Debug, Default)]
pub struct Lobby {
    registry: PresenceRegistry,
    queue: MatchQueue,
    sessions: SessionStore,
}

impl Lobby {
    /// Create an empty lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Presence registry (read-only).
    pub fn registry(&self) -> &PresenceRegistry {
        &self.registry
    }

    /// Matchmaking queue (read-only).
    pub fn queue(&self) -> &MatchQueue {
        &self.queue
    }

    /// Session store (read-only).
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn presence(&self) -> Outbound {
        Outbound::to_all(ServerMessage::OnlineUsers(self.registry.snapshot_all().into()))
    }

    fn session_of(&self, connection_id: &ConnectionId) -> Result<SessionId, LobbyError> {
        let record = self.registry
            .lookup(connection_id)
            .ok_or(LobbyError::UnknownConnection(*connection_id))?;
        record.session_id().ok_or(LobbyError::NotInSession)
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Admit a new connection.
    pub fn connect(
        &mut self,
        connection_id: ConnectionId,
        identity: Identity,
    ) -> Result<Vec<Outbound>, LobbyError> {
        let record = self.registry.register(connection_id, identity)?;
        info!("User {} connected as {:?}", connection_id.short(), record.display_name);

        Ok(vec![
            Outbound::to_one(connection_id, ServerMessage::UserData(UserData {
                name: record.display_name.clone(),
                user_id: record.user_id(),
            })),
            self.presence(),
        ])
    }

    /// Put a connection in the queue and pair whoever is waiting.
    pub fn join_queue(&mut self, connection_id: ConnectionId) -> Result<Vec<Outbound>, LobbyError> {
        let record = self.registry
            .lookup(&connection_id)
            .ok_or(LobbyError::UnknownConnection(connection_id))?;

        match record.status {
            UserStatus::Lobby => {}
            UserStatus::Queued => return Err(LobbyError::AlreadyQueued),
            UserStatus::InSession(_) => return Err(LobbyError::AlreadyInSession),
        }

        self.queue.enqueue(connection_id)?;
        self.registry.update_status(&connection_id, UserStatus::Queued);
        debug!("User {} queued ({} waiting)", connection_id.short(), self.queue.len());

        let mut out = Vec::new();
        self.pair_waiting(&mut out);
        out.push(self.presence());
        Ok(out)
    }

    /// Take a connection out of the queue. No-op if it is not queued.
    pub fn leave_queue(&mut self, connection_id: ConnectionId) -> Result<Vec<Outbound>, LobbyError> {
        if self.registry.lookup(&connection_id).is_none() {
            return Err(LobbyError::UnknownConnection(connection_id));
        }
        if !self.queue.remove(&connection_id) {
            return Ok(Vec::new());
        }
        self.registry.update_status(&connection_id, UserStatus::Lobby);
        debug!("User {} left the queue", connection_id.short());
        Ok(vec![self.presence()])
    }

    /// Record a move in the caller's session.
    pub fn submit_move(
        &mut self,
        connection_id: ConnectionId,
        chosen: Move,
    ) -> Result<Vec<Outbound>, LobbyError> {
        let session_id = self.session_of(&connection_id)?;
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        match session.submit_move(&connection_id, chosen) {
            MoveOutcome::Ignored => {
                debug!("Ignored move from {} in {}", connection_id.short(), session_id.short());
            }
            MoveOutcome::Recorded { display_name } => {
                out.push(Outbound::to_session(session_id, ServerMessage::PlayerMoved(
                    PlayerNotice::new(&connection_id, &display_name),
                )));
            }
            MoveOutcome::Resolved { display_name, result } => {
                out.push(Outbound::to_session(session_id, ServerMessage::PlayerMoved(
                    PlayerNotice::new(&connection_id, &display_name),
                )));
                let played: Vec<&str> = result.moves.iter().map(|m| m.chosen.as_str()).collect();
                info!(
                    "Session {} resolved: {} ({:?})",
                    session_id.short(), played.join(" vs "), result.outcome,
                );
                out.push(Outbound::to_session(
                    session_id,
                    ServerMessage::GameResult(GameResultInfo::from(&result)),
                ));
            }
        }
        Ok(out)
    }

    /// Clear the caller's session for another round.
    pub fn play_again(&mut self, connection_id: ConnectionId) -> Result<Vec<Outbound>, LobbyError> {
        let session_id = self.session_of(&connection_id)?;
        let reset = self.sessions
            .get_mut(&session_id)
            .map(|s| s.reset(&connection_id))
            .unwrap_or(false);

        if !reset {
            return Ok(Vec::new());
        }
        debug!("Session {} reset by {}", session_id.short(), connection_id.short());
        Ok(vec![Outbound::to_session(session_id, ServerMessage::GameReset)])
    }

    /// Leave the caller's session and return to the lobby.
    pub fn leave_room(&mut self, connection_id: ConnectionId) -> Result<Vec<Outbound>, LobbyError> {
        let session_id = self.session_of(&connection_id)?;

        let mut out = Vec::new();
        self.leave_session(connection_id, session_id, &mut out);
        self.registry.update_status(&connection_id, UserStatus::Lobby);
        out.push(self.presence());
        Ok(out)
    }

    /// Unwind everything a connection holds.
    ///
    /// Order: queue, session, registry, then the presence broadcast, so the
    /// snapshot never mentions the departed connection.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Vec<Outbound> {
        let mut out = Vec::new();

        self.queue.remove(&connection_id);

        let session_id = self.registry.lookup(&connection_id).and_then(|r| r.session_id());
        if let Some(session_id) = session_id {
            self.leave_session(connection_id, session_id, &mut out);
        }

        if let Some(record) = self.registry.remove(&connection_id) {
            let online = chrono::Utc::now() - record.connected_at;
            info!("User {} disconnected after {}s", connection_id.short(), online.num_seconds());
            out.push(self.presence());
        }
        out
    }

    // =========================================================================
    // PAIRING
    // =========================================================================

    /// Drain the queue two at a time into new sessions.
    fn pair_waiting(&mut self, out: &mut Vec<Outbound>) -> usize {
        let mut created = 0;

        loop {
            let batch = self.queue.dequeue_batch(SESSION_SIZE);
            if batch.len() < SESSION_SIZE {
                self.queue.requeue_front(batch);
                break;
            }

            let slots: Vec<PlayerSlot> = batch.iter()
                .filter_map(|id| self.registry.lookup(id))
                .map(|r| PlayerSlot::new(r.connection_id, r.account_id.clone(), r.display_name.clone()))
                .collect();

            let slots: [PlayerSlot; SESSION_SIZE] = match slots.try_into() {
                Ok(slots) => slots,
                Err(present) => {
                    let present: Vec<ConnectionId> = present.iter().map(|s| s.connection_id).collect();
                    warn!("Dropped {} stale queue entries", SESSION_SIZE - present.len());
                    self.queue.requeue_front(present);
                    continue;
                }
            };

            let players: Vec<PlayerInfo> = slots.iter()
                .map(|s| PlayerInfo::new(&s.connection_id, &s.display_name))
                .collect();
            let names: Vec<(ConnectionId, String)> = slots.iter()
                .map(|s| (s.connection_id, s.display_name.clone()))
                .collect();

            let session_id = self.sessions.create(slots);
            for (idx, (id, _)) in names.iter().enumerate() {
                self.registry.update_status(id, UserStatus::InSession(session_id));
                let opponent = &names[(idx + 1) % SESSION_SIZE].1;
                out.push(Outbound::to_one(*id, ServerMessage::MatchFound(
                    MatchFoundInfo::new(&session_id, opponent, players.clone()),
                )));
            }

            info!(
                "Created session {} for {} vs {}",
                session_id.short(), names[0].0.short(), names[1].0.short(),
            );
            created += 1;
        }

        created
    }

    /// Drop a connection's slot, deleting the session once nobody is left.
    fn leave_session(
        &mut self,
        connection_id: ConnectionId,
        session_id: SessionId,
        out: &mut Vec<Outbound>,
    ) -> bool {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        let Some(slot) = session.remove_slot(&connection_id) else {
            return false;
        };

        if session.is_empty() {
            self.sessions.remove(&session_id);
            info!("Session {} terminated", session_id.short());
        } else {
            out.push(Outbound::to_session(session_id, ServerMessage::PlayerLeft(
                PlayerNotice::new(&slot.connection_id, &slot.display_name),
            )));
        }
        true
    }

    // =========================================================================
    // ADDRESSING
    // =========================================================================

    /// Resolve an address against current state.
    pub fn address(&self, to: &Recipient) -> Vec<ConnectionId> {
        match to {
            Recipient::ToOne(id) => vec![*id],
            Recipient::ToSession(session_id) => self.sessions
                .get(session_id)
                .map(|s| s.member_ids())
                .unwrap_or_default(),
            Recipient::ToAll => self.registry.connection_ids(),
        }
    }

    /// Expand addressed messages into per-connection deliveries.
    pub fn expand(&self, outbound: Vec<Outbound>) -> Vec<(ConnectionId, ServerMessage)> {
        let mut deliveries = Vec::new();
        for Outbound { to, message } in outbound {
            for id in self.address(&to) {
                deliveries.push((id, message.clone()));
            }
        }
        deliveries
    }
}
