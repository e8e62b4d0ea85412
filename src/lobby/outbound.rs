//! Addressed outbound messages.
//!
//! Lobby operations never talk to the transport. They return `Outbound`
//! values and the dispatcher turns the address into concrete connections.

use crate::core::ids::{ConnectionId, SessionId};
use crate::network::protocol::ServerMessage;

/// Who a message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// A single connection.
    ToOne(ConnectionId),
    /// Every current member of a session.
    ToSession(SessionId),
    /// Every connected user.
    ToAll,
}

/// A message plus its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Address.
    pub to: Recipient,
    /// Payload.
    pub message: ServerMessage,
}

impl Outbound {
    /// Message for one connection.
    pub fn to_one(connection_id: ConnectionId, message: ServerMessage) -> Self {
        Self { to: Recipient::ToOne(connection_id), message }
    }

    /// Message for a session's members.
    pub fn to_session(session_id: SessionId, message: ServerMessage) -> Self {
        Self { to: Recipient::ToSession(session_id), message }
    }

    /// Message for everyone.
    pub fn to_all(message: ServerMessage) -> Self {
        Self { to: Recipient::ToAll, message }
    }
}
