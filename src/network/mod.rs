//! Network Layer
//!
//! WebSocket transport, wire protocol and identity resolution.
//! All lobby state changes run through `lobby/` behind the dispatcher.

pub mod auth;
pub mod protocol;
pub mod dispatcher;
pub mod server;

pub use auth::{AuthConfig, AuthError, IdentityVerifier, JwtVerifier, TokenClaims, validate_token};
pub use dispatcher::{ClientSender, Dispatcher};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
