//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON object tagged by `"type"` (kebab-case) with
//! camelCase payload fields.

use serde::{Serialize, Deserialize};

use crate::core::ids::{ConnectionId, SessionId};
use crate::game::moves::{Move, Outcome};
use crate::game::session::{GameResult, RevealedMove};
use crate::lobby::presence::{PublicUser, StatusKind};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
///
/// None of these carry an identity; every event is attributed to the
/// connection it arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Start looking for an opponent.
    JoinQueue,

    /// Stop looking for an opponent.
    LeaveQueue,

    /// Submit a move for the current round.
    SubmitMove {
        /// The chosen move.
        #[serde(rename = "move")]
        chosen: Move,
    },

    /// Ask for another round in the same session.
    PlayAgain,

    /// Leave the current session.
    LeaveRoom,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// The connecting client's own identity.
    UserData(UserData),

    /// Presence snapshot.
    OnlineUsers(OnlineUsers),

    /// Paired with an opponent.
    MatchFound(MatchFoundInfo),

    /// A session member submitted a move (value withheld).
    PlayerMoved(PlayerNotice),

    /// Round resolved.
    GameResult(GameResultInfo),

    /// Round state cleared for another game.
    GameReset,

    /// A member left the session.
    PlayerLeft(PlayerNotice),

    /// Error message.
    Error(ServerError),

    /// Pong response.
    #[serde(rename_all = "camelCase")]
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall clock (ms since epoch).
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Sent to a client right after it connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    /// Display name.
    pub name: String,
    /// Account id, or connection id for guests.
    pub user_id: String,
}

/// Everyone currently connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsers {
    /// Connected user count.
    pub count: usize,
    /// Users in connect order.
    pub users: Vec<OnlineUser>,
}

/// One entry of the presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    /// Public connection id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Coarse status.
    pub status: StatusKind,
}

impl From<Vec<PublicUser>> for OnlineUsers {
    fn from(users: Vec<PublicUser>) -> Self {
        let users: Vec<OnlineUser> = users.into_iter()
            .map(|u| OnlineUser {
                id: u.id.to_uuid_string(),
                name: u.name,
                status: u.status,
            })
            .collect();
        Self { count: users.len(), users }
    }
}

/// Public reference to a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    /// Public connection id.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl PlayerInfo {
    /// Build from a connection and its name.
    pub fn new(id: &ConnectionId, name: &str) -> Self {
        Self {
            id: id.to_uuid_string(),
            name: name.to_string(),
        }
    }
}

/// Information about a found match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFoundInfo {
    /// Session identifier.
    pub session_id: String,
    /// The recipient's opponent's display name.
    pub opponent: String,
    /// Both players in slot order.
    pub players: Vec<PlayerInfo>,
}

impl MatchFoundInfo {
    /// Build the notice for one side of a pairing.
    pub fn new(session_id: &SessionId, opponent: &str, players: Vec<PlayerInfo>) -> Self {
        Self {
            session_id: session_id.to_uuid_string(),
            opponent: opponent.to_string(),
            players,
        }
    }
}

/// Identifies the player a session notice is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerNotice {
    /// Public connection id.
    pub player_id: String,
    /// Display name.
    pub player_name: String,
}

impl PlayerNotice {
    /// Build from a connection and its name.
    pub fn new(id: &ConnectionId, name: &str) -> Self {
        Self {
            player_id: id.to_uuid_string(),
            player_name: name.to_string(),
        }
    }
}

/// Round outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    /// Same move on both sides.
    Tie,
    /// One player won.
    Decisive,
}

/// A revealed move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveReveal {
    /// Public connection id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// The move played.
    #[serde(rename = "move")]
    pub chosen: Move,
}

impl From<&RevealedMove> for MoveReveal {
    fn from(m: &RevealedMove) -> Self {
        Self {
            id: m.connection_id.to_uuid_string(),
            name: m.display_name.clone(),
            chosen: m.chosen,
        }
    }
}

/// Resolved round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResultInfo {
    /// Tie or decisive.
    pub outcome: OutcomeKind,
    /// Winner (None on a tie).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<PlayerInfo>,
    /// Both moves in slot order.
    pub moves: Vec<MoveReveal>,
}

impl From<&GameResult> for GameResultInfo {
    fn from(result: &GameResult) -> Self {
        let outcome = match result.outcome {
            Outcome::Tie => OutcomeKind::Tie,
            Outcome::Decisive { .. } => OutcomeKind::Decisive,
        };
        Self {
            outcome,
            winner: result.winner().map(|w| PlayerInfo::new(&w.connection_id, &w.display_name)),
            moves: result.moves.iter().map(MoveReveal::from).collect(),
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// Already waiting in the queue.
    AlreadyQueued,
    /// Already in a session.
    AlreadyInSession,
    /// Not in a session.
    NotInSession,
    /// Frame could not be parsed.
    InvalidMessage,
    /// Internal error.
    InternalError,
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
