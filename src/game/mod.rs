//! Game Logic Module
//!
//! The rock/paper/scissors round and the sessions that host it.
//!
//! ## Module Structure
//!
//! - `moves`: Move set and pure outcome resolution
//! - `session`: Session state machine and session store

pub mod moves;
pub mod session;

// Re-export key types
pub use moves::{Move, Outcome, resolve};
pub use session::{
    GameResult, MoveOutcome, PlayerSlot, RevealedMove, Session, SessionState, SessionStore,
};
