//! # RPS Arena Server
//!
//! Real-time rock/paper/scissors lobby: presence, matchmaking and
//! two-player sessions over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RPS ARENA SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  └── ids.rs      - Connection and session identifiers        │
//! │                                                              │
//! │  game/           - Round logic (pure)                        │
//! │  ├── moves.rs    - Move set and outcome resolution           │
//! │  └── session.rs  - Session state machine and store           │
//! │                                                              │
//! │  lobby/          - Shared state                              │
//! │  ├── presence.rs - Presence registry                         │
//! │  ├── queue.rs    - FIFO matchmaking queue                    │
//! │  ├── outbound.rs - Addressed outbound messages               │
//! │  └── engine.rs   - Pairing and state transitions             │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── dispatcher.rs - Serialized event handling and fan-out   │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - Token verification and guest identities   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Registry, queue and session store sit behind one lock. Every client
//! event is applied atomically and its outbound messages are addressed
//! before the lock is released, so no observer sees a half-applied
//! transition.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod lobby;
pub mod network;

// Re-export commonly used types
pub use core::ids::{ConnectionId, SessionId};
pub use game::moves::{Move, Outcome};
pub use game::session::{Session, SessionState};
pub use lobby::{Lobby, LobbyError, UserStatus};
pub use network::{Dispatcher, GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
