//! Lobby Layer
//!
//! Shared mutable state: who is connected, who is waiting, who is playing.
//!
//! - `presence`: Presence registry
//! - `queue`: Matchmaking queue
//! - `engine`: Pairing and every state-changing operation
//! - `outbound`: Addressed messages returned by the engine

pub mod presence;
pub mod queue;
pub mod outbound;
pub mod engine;

pub use engine::{Lobby, LobbyError};
pub use outbound::{Outbound, Recipient};
pub use presence::{Identity, PresenceRegistry, PublicUser, StatusKind, UserRecord, UserStatus};
pub use queue::{MatchQueue, QueueError};
