//! Event Dispatcher
//!
//! Routes inbound events to the lobby and fans out the results.
//!
//! Every lobby mutation happens under one mutex. Addressed messages are
//! expanded to concrete deliveries while the lock is held, then the lock is
//! released before anything is handed to a connection's outbound channel.
//! The delivery turn is taken before the lobby lock is dropped, so every
//! client sees operations' messages in the order the lobby applied them.
//! Sends use `try_send`, so a full or dead client channel never stalls
//! anyone else.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::core::ids::ConnectionId;
use crate::lobby::engine::{Lobby, LobbyError};
use crate::lobby::outbound::Outbound;
use crate::network::auth::{resolve_identity, IdentityVerifier};
use crate::network::protocol::{ClientMessage, ServerMessage};

/// Outbound channel for one connection.
pub type ClientSender = mpsc::Sender<ServerMessage>;

/// Shared dispatcher, one per server.
pub struct Dispatcher {
    /// Registry, queue and sessions.
    lobby: Mutex<Lobby>,
    /// Delivery turn, handed over from the lobby lock.
    delivery_order: Mutex<()>,
    /// Outbound channels by connection.
    connections: RwLock<BTreeMap<ConnectionId, ClientSender>>,
    /// External identity collaborator.
    verifier: Arc<dyn IdentityVerifier>,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            lobby: Mutex::new(Lobby::new()),
            delivery_order: Mutex::new(()),
            connections: RwLock::new(BTreeMap::new()),
            verifier,
        }
    }

    /// Admit a new connection and return its identity handle.
    pub async fn connect(&self, credential: Option<&str>, sender: ClientSender) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        let identity = resolve_identity(self.verifier.as_ref(), credential, &connection_id);

        self.connections.write().await.insert(connection_id, sender);
        self.apply(connection_id, |lobby| lobby.connect(connection_id, identity)).await;
        connection_id
    }

    /// Handle one inbound message from a connection.
    pub async fn handle(&self, connection_id: ConnectionId, msg: ClientMessage) {
        match msg {
            ClientMessage::JoinQueue => {
                self.apply(connection_id, |lobby| lobby.join_queue(connection_id)).await;
            }
            ClientMessage::LeaveQueue => {
                self.apply(connection_id, |lobby| lobby.leave_queue(connection_id)).await;
            }
            ClientMessage::SubmitMove { chosen } => {
                self.apply(connection_id, |lobby| lobby.submit_move(connection_id, chosen)).await;
            }
            ClientMessage::PlayAgain => {
                self.apply(connection_id, |lobby| lobby.play_again(connection_id)).await;
            }
            ClientMessage::LeaveRoom => {
                self.apply(connection_id, |lobby| lobby.leave_room(connection_id)).await;
            }
            ClientMessage::Ping { timestamp } => {
                let pong = ServerMessage::Pong {
                    timestamp,
                    server_time: std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis() as u64,
                };
                self.send_to(connection_id, pong).await;
            }
        }
    }

    /// Tear down a connection. Safe to call more than once.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.apply(connection_id, |lobby| Ok(lobby.disconnect(connection_id))).await;
        self.connections.write().await.remove(&connection_id);
    }

    /// Send one message directly to a connection.
    pub async fn send_to(&self, connection_id: ConnectionId, message: ServerMessage) {
        self.deliver(vec![(connection_id, message)]).await;
    }

    /// Run a lobby operation under the lock, then deliver its output.
    async fn apply<F>(&self, origin: ConnectionId, op: F)
    where
        F: FnOnce(&mut Lobby) -> Result<Vec<Outbound>, LobbyError>,
    {
        let (deliveries, _turn) = {
            let mut lobby = self.lobby.lock().await;
            let deliveries = match op(&mut lobby) {
                Ok(outbound) => lobby.expand(outbound),
                Err(e) => {
                    debug!("Event from {} rejected: {}", origin.short(), e);
                    e.client_message()
                        .map(|msg| vec![(origin, msg)])
                        .unwrap_or_default()
                }
            };
            // Queue for delivery in lobby order; the lobby lock drops right after.
            (deliveries, self.delivery_order.lock().await)
        };

        self.deliver(deliveries).await;
    }

    /// Hand messages to connection channels. Never waits on a client.
    async fn deliver(&self, deliveries: Vec<(ConnectionId, ServerMessage)>) {
        if deliveries.is_empty() {
            return;
        }

        let targets: Vec<(ConnectionId, Option<ClientSender>, ServerMessage)> = {
            let connections = self.connections.read().await;
            deliveries.into_iter()
                .map(|(id, msg)| (id, connections.get(&id).cloned(), msg))
                .collect()
        };

        for (id, sender, msg) in targets {
            match sender {
                Some(sender) => {
                    if let Err(e) = sender.try_send(msg) {
                        warn!("Dropped message for {}: {}", id.short(), e);
                    }
                }
                None => debug!("No channel for {}", id.short()),
            }
        }
    }

    /// Connected user count.
    pub async fn connection_count(&self) -> usize {
        self.lobby.lock().await.registry().len()
    }

    /// Active session count.
    pub async fn session_count(&self) -> usize {
        self.lobby.lock().await.sessions().len()
    }

    /// Matchmaking queue size.
    pub async fn queue_size(&self) -> usize {
        self.lobby.lock().await.queue().len()
    }

    /// Run a read-only inspection of lobby state.
    pub async fn inspect<R>(&self, f: impl FnOnce(&Lobby) -> R) -> R {
        let lobby = self.lobby.lock().await;
        f(&lobby)
    }
}
