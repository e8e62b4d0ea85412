//! Game Sessions
//!
//! Per-session move state machine and the store that owns every live session.
//!
//! ```text
//! WaitingForMoves ──(both slots moved)──► Resolved
//!        ▲                                   │
//!        └────────────(reset)────────────────┘
//! any state ──(last member leaves)──► Terminated (removed from store)
//! ```

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};

use crate::core::ids::{ConnectionId, SessionId};
use crate::game::moves::{resolve, Move, Outcome};

/// Players per session.
pub const SESSION_SIZE: usize = 2;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// At least one slot has not moved yet.
    WaitingForMoves,
    /// Both moves are in and a result is attached.
    Resolved,
}

/// One member's position and submitted state within a session.
#[derive(Debug, Clone)]
pub struct PlayerSlot {
    /// Occupying connection.
    pub connection_id: ConnectionId,
    /// Account id (absent for guests).
    pub account_id: Option<String>,
    /// Public display name.
    pub display_name: String,
    /// Hidden until the round resolves.
    submitted_move: Option<Move>,
}

impl PlayerSlot {
    /// Create an empty slot.
    pub fn new(connection_id: ConnectionId, account_id: Option<String>, display_name: String) -> Self {
        Self {
            connection_id,
            account_id,
            display_name,
            submitted_move: None,
        }
    }

    /// Whether a move has been submitted this round.
    pub fn has_moved(&self) -> bool {
        self.submitted_move.is_some()
    }

    /// Submitted move, if any.
    pub fn submitted_move(&self) -> Option<Move> {
        self.submitted_move
    }

    fn clear(&mut self) {
        self.submitted_move = None;
    }
}

/// A move revealed after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealedMove {
    /// Player connection.
    pub connection_id: ConnectionId,
    /// Player display name.
    pub display_name: String,
    /// The move played.
    pub chosen: Move,
}

/// Result attached to a session once both slots have moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameResult {
    /// Tie or winning slot.
    pub outcome: Outcome,
    /// Both moves in slot order.
    pub moves: Vec<RevealedMove>,
}

impl GameResult {
    /// The winning player's reveal, if the round was decisive.
    pub fn winner(&self) -> Option<&RevealedMove> {
        self.outcome.winner().and_then(|idx| self.moves.get(idx))
    }
}

/// What a move submission did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Unknown slot or slot already moved; nothing changed.
    Ignored,
    /// Move stored, still waiting on the other slot.
    Recorded {
        /// Mover's display name.
        display_name: String,
    },
    /// Move stored and the round resolved.
    Resolved {
        /// Mover's display name.
        display_name: String,
        /// The attached result.
        result: GameResult,
    },
}

/// A head-to-head session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// Member slots in pairing order (1 or 2 while the session exists).
    slots: Vec<PlayerSlot>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last resolved result, cleared on reset.
    result: Option<GameResult>,
}

impl Session {
    /// Create a session from two paired slots.
    pub fn new(id: SessionId, slots: [PlayerSlot; SESSION_SIZE]) -> Self {
        Self {
            id,
            slots: slots.into(),
            created_at: Utc::now(),
            result: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        if self.result.is_some() {
            SessionState::Resolved
        } else {
            SessionState::WaitingForMoves
        }
    }

    /// Member slots in order.
    pub fn slots(&self) -> &[PlayerSlot] {
        &self.slots
    }

    /// Slot for a connection.
    pub fn slot(&self, connection_id: &ConnectionId) -> Option<&PlayerSlot> {
        self.slots.iter().find(|s| s.connection_id == *connection_id)
    }

    /// Member connection ids in slot order.
    pub fn member_ids(&self) -> Vec<ConnectionId> {
        self.slots.iter().map(|s| s.connection_id).collect()
    }

    /// Whether the connection occupies a slot.
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.slot(connection_id).is_some()
    }

    /// Last result, if resolved.
    pub fn result(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }

    /// Number of occupied slots.
    pub fn member_count(&self) -> usize {
        self.slots.len()
    }

    /// True once every member has left.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Submit a move for a member.
    ///
    /// A second submission from the same slot before reset is ignored.
    /// Resolution runs as soon as two slots have moved.
    pub fn submit_move(&mut self, connection_id: &ConnectionId, chosen: Move) -> MoveOutcome {
        let Some(slot) = self.slots.iter_mut().find(|s| s.connection_id == *connection_id) else {
            return MoveOutcome::Ignored;
        };
        if slot.has_moved() {
            return MoveOutcome::Ignored;
        }
        slot.submitted_move = Some(chosen);
        let display_name = slot.display_name.clone();

        match self.try_resolve() {
            Some(result) => MoveOutcome::Resolved { display_name, result },
            None => MoveOutcome::Recorded { display_name },
        }
    }

    fn try_resolve(&mut self) -> Option<GameResult> {
        if self.slots.len() != SESSION_SIZE || self.result.is_some() {
            return None;
        }

        let moves: Vec<RevealedMove> = self.slots.iter()
            .map(|s| {
                s.submitted_move.map(|chosen| RevealedMove {
                    connection_id: s.connection_id,
                    display_name: s.display_name.clone(),
                    chosen,
                })
            })
            .collect::<Option<_>>()?;

        let result = GameResult {
            outcome: resolve(moves[0].chosen, moves[1].chosen),
            moves,
        };
        self.result = Some(result.clone());
        Some(result)
    }

    /// Clear both moves and the result. Only members may reset.
    pub fn reset(&mut self, connection_id: &ConnectionId) -> bool {
        if !self.contains(connection_id) {
            return false;
        }
        for slot in &mut self.slots {
            slot.clear();
        }
        self.result = None;
        true
    }

    /// Remove a member's slot.
    pub fn remove_slot(&mut self, connection_id: &ConnectionId) -> Option<PlayerSlot> {
        let idx = self.slots.iter().position(|s| s.connection_id == *connection_id)?;
        Some(self.slots.remove(idx))
    }
}

// =============================================================================
// SESSION STORE
// =============================================================================

/// Owns all live sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: BTreeMap<SessionId, Session>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for two paired slots.
    pub fn create(&mut self, slots: [PlayerSlot; SESSION_SIZE]) -> SessionId {
        let mut id = SessionId::generate();
        while self.sessions.contains_key(&id) {
            id = SessionId::generate();
        }
        self.sessions.insert(id, Session::new(id, slots));
        id
    }

    /// Get a session by ID.
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Get a session mutably.
    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Remove a session.
    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        self.sessions.remove(id)
    }

    /// Active session count.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterate sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(byte: u8, name: &str) -> PlayerSlot {
        PlayerSlot::new(ConnectionId::new([byte; 16]), None, name.to_string())
    }

    fn create_test_session() -> Session {
        Session::new(SessionId::new([0; 16]), [slot(1, "alice"), slot(2, "bob")])
    }

    #[test]
    fn test_first_move_is_recorded_not_resolved() {
        let mut session = create_test_session();
        let a = ConnectionId::new([1; 16]);

        let outcome = session.submit_move(&a, Move::Rock);
        assert_eq!(outcome, MoveOutcome::Recorded { display_name: "alice".into() });
        assert!(session.slot(&a).unwrap().has_moved());
        assert_eq!(session.state(), SessionState::WaitingForMoves);
    }

    #[test]
    fn test_both_moves_resolve() {
        let mut session = create_test_session();
        let a = ConnectionId::new([1; 16]);
        let b = ConnectionId::new([2; 16]);

        session.submit_move(&a, Move::Rock);
        let outcome = session.submit_move(&b, Move::Scissors);

        let MoveOutcome::Resolved { result, .. } = outcome else {
            panic!("expected resolution");
        };
        assert_eq!(result.outcome, Outcome::Decisive { winner: 0 });
        assert_eq!(result.winner().unwrap().display_name, "alice");
        assert_eq!(session.state(), SessionState::Resolved);
    }

    #[test]
    fn test_duplicate_move_is_ignored() {
        let mut session = create_test_session();
        let a = ConnectionId::new([1; 16]);

        session.submit_move(&a, Move::Rock);
        assert_eq!(session.submit_move(&a, Move::Paper), MoveOutcome::Ignored);
        assert_eq!(session.slot(&a).unwrap().submitted_move(), Some(Move::Rock));
    }

    #[test]
    fn test_move_after_resolution_does_not_re_resolve() {
        let mut session = create_test_session();
        let a = ConnectionId::new([1; 16]);
        let b = ConnectionId::new([2; 16]);

        session.submit_move(&a, Move::Paper);
        session.submit_move(&b, Move::Paper);
        assert_eq!(session.submit_move(&b, Move::Rock), MoveOutcome::Ignored);
        assert_eq!(session.result().unwrap().outcome, Outcome::Tie);
    }

    #[test]
    fn test_non_member_move_is_ignored() {
        let mut session = create_test_session();
        let stranger = ConnectionId::new([9; 16]);
        assert_eq!(session.submit_move(&stranger, Move::Rock), MoveOutcome::Ignored);
    }

    #[test]
    fn test_reset_clears_round() {
        let mut session = create_test_session();
        let a = ConnectionId::new([1; 16]);
        let b = ConnectionId::new([2; 16]);

        session.submit_move(&a, Move::Rock);
        session.submit_move(&b, Move::Rock);
        assert!(session.reset(&b));

        assert!(session.slots().iter().all(|s| !s.has_moved()));
        assert!(session.result().is_none());
        assert_eq!(session.state(), SessionState::WaitingForMoves);

        session.submit_move(&a, Move::Scissors);
        let outcome = session.submit_move(&b, Move::Rock);
        assert!(matches!(outcome, MoveOutcome::Resolved { .. }));
        assert_eq!(session.result().unwrap().outcome, Outcome::Decisive { winner: 1 });
    }

    #[test]
    fn test_reset_by_non_member_rejected() {
        let mut session = create_test_session();
        let a = ConnectionId::new([1; 16]);
        session.submit_move(&a, Move::Rock);

        assert!(!session.reset(&ConnectionId::new([9; 16])));
        assert!(session.slot(&a).unwrap().has_moved());
    }

    #[test]
    fn test_lone_member_never_resolves() {
        let mut session = create_test_session();
        let a = ConnectionId::new([1; 16]);
        let b = ConnectionId::new([2; 16]);

        session.submit_move(&b, Move::Paper);
        session.remove_slot(&a).unwrap();
        assert_eq!(session.member_count(), 1);
        assert!(session.result().is_none());
    }

    #[test]
    fn test_remove_all_slots_empties_session() {
        let mut session = create_test_session();
        session.remove_slot(&ConnectionId::new([1; 16]));
        session.remove_slot(&ConnectionId::new([2; 16]));
        assert!(session.is_empty());
        assert!(session.remove_slot(&ConnectionId::new([2; 16])).is_none());
    }

    #[test]
    fn test_session_store() {
        let mut store = SessionStore::new();

        let id = store.create([slot(1, "alice"), slot(2, "bob")]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&id).unwrap().member_ids(), vec![
            ConnectionId::new([1; 16]),
            ConnectionId::new([2; 16]),
        ]);

        store.remove(&id);
        assert!(store.is_empty());
    }
}
