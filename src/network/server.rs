//! WebSocket Game Server
//!
//! Async WebSocket server for lobby connections.
//! Handles the connect-time handshake, per-connection read/write tasks and
//! shutdown. Everything stateful goes through the [`Dispatcher`].

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::network::auth::IdentityVerifier;
use crate::network::dispatcher::Dispatcher;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Origin substrings allowed to upgrade. Empty allows every origin.
    pub allowed_origins: Vec<String>,
    /// Per-connection outbound queue capacity.
    pub outbound_buffer: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            max_connections: 1000,
            allowed_origins: Vec::new(),
            outbound_buffer: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, GameServerError> {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = env_or("PORT", defaults.bind_addr.port())?;
        let bind_addr = format!("{}:{}", host, port)
            .parse()
            .map_err(|e| GameServerError::Config(format!("invalid HOST/PORT: {}", e)))?;

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            max_connections: env_or("MAX_CONNECTIONS", defaults.max_connections)?,
            allowed_origins,
            outbound_buffer: env_or("OUTBOUND_BUFFER", defaults.outbound_buffer)?,
            version: defaults.version,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, GameServerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| GameServerError::Config(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Bad configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Whether an upgrade from `origin` may proceed.
pub fn origin_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    match origin {
        None => true,
        Some(_) if allowed.is_empty() => true,
        Some(origin) => allowed.iter().any(|a| origin.contains(a.as_str())),
    }
}

/// Pull the credential from the upgrade request: `?token=` first, then a
/// bearer `Authorization` header.
pub fn extract_credential(req: &Request) -> Option<String> {
    let from_query = req.uri()
        .query()
        .and_then(|q| {
            q.split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(k, _)| *k == "token")
                .map(|(_, v)| v.to_string())
        })
        .filter(|t| !t.is_empty());

    from_query.or_else(|| {
        req.headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

fn forbidden(reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Lobby state and fan-out.
    dispatcher: Arc<Dispatcher>,
    /// One permit per admitted connection, held from accept until cleanup.
    connection_slots: Arc<Semaphore>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            connection_slots: Arc::new(Semaphore::new(
                config.max_connections.min(Semaphore::MAX_PERMITS),
            )),
            config,
            dispatcher: Arc::new(Dispatcher::new(verifier)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from an already-bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            "Game server v{} listening on {}",
            self.config.version,
            listener.local_addr()?,
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = self.connection_slots.clone().try_acquire_owned() else {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            };

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, permit);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    ///
    /// The permit is released when the connection task finishes.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, permit: OwnedSemaphorePermit) {
        let dispatcher = self.dispatcher.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut credential = None;
            let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let origin = req.headers()
                    .get(header::ORIGIN)
                    .and_then(|v| v.to_str().ok());
                if !origin_allowed(origin, &config.allowed_origins) {
                    return Err(forbidden("Origin not allowed"));
                }
                credential = extract_credential(req);
                Ok(response)
            };

            let handshake = accept_hdr_async(stream, callback).await;
            let ws_stream = match handshake {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_buffer);

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let connection_id = dispatcher.connect(credential.as_deref(), msg_tx).await;
            info!("Connection {} from {}", connection_id.short(), addr);

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => {
                                        dispatcher.handle(connection_id, client_msg).await;
                                    }
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        dispatcher.send_to(connection_id, ServerMessage::error(
                                            ErrorCode::InvalidMessage,
                                            "Invalid message format",
                                        )).await;
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                debug!("Ignoring binary frame from {}", addr);
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        dispatcher.send_to(connection_id, ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup drops the dispatcher's sender, which lets the writer drain and exit.
            dispatcher.disconnect(connection_id).await;
            if tokio::time::timeout(Duration::from_secs(2), sender_task).await.is_err() {
                debug!("Writer for {} did not finish in time", addr);
            }

            info!("Client {} cleaned up", addr);
            drop(permit);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.dispatcher.connection_count().await
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.dispatcher.session_count().await
    }

    /// Get matchmaking queue size.
    pub async fn queue_size(&self) -> usize {
        self.dispatcher.queue_size().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::auth::{AuthConfig, JwtVerifier, TokenClaims};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use futures_util::future::join_all;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Error as WsError;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const SECRET: &str = "server-test-secret-0123456789ab";

    fn verifier() -> Arc<dyn IdentityVerifier> {
        Arc::new(JwtVerifier::new(AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }))
    }

    fn token(id: &str, name: &str) -> String {
        let claims = TokenClaims {
            id: Some(id.into()),
            name: Some(name.into()),
            exp: chrono::Utc::now().timestamp() as u64 + 3600,
            ..Default::default()
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn start_server() -> (Arc<GameServer>, SocketAddr) {
        start_server_with(ServerConfig::default()).await
    }

    async fn start_server_with(config: ServerConfig) -> (Arc<GameServer>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(config, verifier()));
        let running = server.clone();
        tokio::spawn(async move {
            running.serve(listener).await.unwrap();
        });
        (server, addr)
    }

    async fn recv_until(ws: &mut Client, wanted: &str) -> ServerMessage {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let msg = ServerMessage::from_json(&text).unwrap();
                        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                        if value["type"] == wanted {
                            return msg;
                        }
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("connection ended while waiting for {}: {:?}", wanted, other),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", wanted))
    }

    async fn send(ws: &mut Client, msg: ClientMessage) {
        ws.send(Message::Text(msg.to_json().unwrap())).await.unwrap();
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.max_connections, 1000);
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn test_origin_allow_list() {
        let allowed = vec!["vercel.app".to_string(), "localhost".to_string()];
        assert!(origin_allowed(None, &allowed));
        assert!(origin_allowed(Some("https://game.vercel.app"), &allowed));
        assert!(origin_allowed(Some("http://localhost:5173"), &allowed));
        assert!(!origin_allowed(Some("https://evil.example"), &allowed));
        assert!(origin_allowed(Some("https://anything"), &[]));
    }

    #[test]
    fn test_extract_credential() {
        let req = Request::builder().uri("/socket?room=1&token=abc.def.ghi").body(()).unwrap();
        assert_eq!(extract_credential(&req).as_deref(), Some("abc.def.ghi"));

        let req = Request::builder()
            .uri("/socket")
            .header("Authorization", "Bearer xyz")
            .body(())
            .unwrap();
        assert_eq!(extract_credential(&req).as_deref(), Some("xyz"));

        let req = Request::builder().uri("/socket?token=").body(()).unwrap();
        assert!(extract_credential(&req).is_none());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(ServerConfig::default(), verifier());

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 0);
        assert_eq!(server.queue_size().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = GameServer::new(ServerConfig::default(), verifier());
        server.shutdown();
        // Should not panic
    }

    #[tokio::test]
    async fn test_match_over_websocket() {
        let (server, addr) = start_server().await;

        let url_a = format!("ws://{}/?token={}", addr, token("acct-ada", "Ada"));
        let (mut a, _) = connect_async(url_a).await.unwrap();
        let (mut b, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();

        let ServerMessage::UserData(me) = recv_until(&mut a, "user-data").await else {
            panic!("expected user data");
        };
        assert_eq!(me.name, "Ada");
        assert_eq!(me.user_id, "acct-ada");

        let ServerMessage::UserData(guest) = recv_until(&mut b, "user-data").await else {
            panic!("expected user data");
        };
        assert!(guest.name.starts_with("Guest-"));

        send(&mut a, ClientMessage::JoinQueue).await;
        // Wait until A is actually queued before B joins, so slot order is A then B.
        while server.queue_size().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        send(&mut b, ClientMessage::JoinQueue).await;

        let ServerMessage::MatchFound(found) = recv_until(&mut a, "match-found").await else {
            panic!("expected match");
        };
        assert_eq!(found.opponent, guest.name);
        recv_until(&mut b, "match-found").await;

        send(&mut a, ClientMessage::SubmitMove { chosen: crate::game::Move::Rock }).await;
        recv_until(&mut b, "player-moved").await;
        send(&mut b, ClientMessage::SubmitMove { chosen: crate::game::Move::Scissors }).await;

        for ws in [&mut a, &mut b] {
            let ServerMessage::GameResult(result) = recv_until(ws, "game-result").await else {
                panic!("expected result");
            };
            assert_eq!(result.winner.unwrap().name, "Ada");
        }

        b.close(None).await.unwrap();
        let ServerMessage::PlayerLeft(left) = recv_until(&mut a, "player-left").await else {
            panic!("expected player-left");
        };
        assert_eq!(left.player_name, guest.name);

        server.shutdown();
        recv_until(&mut a, "shutdown").await;
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error() {
        let (server, addr) = start_server().await;
        let (mut ws, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
        recv_until(&mut ws, "user-data").await;

        ws.send(Message::Text("{\"type\":\"submit-move\",\"move\":\"spock\"}".into())).await.unwrap();
        let ServerMessage::Error(err) = recv_until(&mut ws, "error").await else {
            panic!("expected error");
        };
        assert_eq!(err.code, ErrorCode::InvalidMessage);

        // Connection survives the bad frame.
        send(&mut ws, ClientMessage::Ping { timestamp: 7 }).await;
        let ServerMessage::Pong { timestamp, .. } = recv_until(&mut ws, "pong").await else {
            panic!("expected pong");
        };
        assert_eq!(timestamp, 7);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_connection_limit_holds_under_burst() {
        let (server, addr) = start_server_with(ServerConfig {
            max_connections: 1,
            ..Default::default()
        })
        .await;

        let url = format!("ws://{}/", addr);
        let attempts = (0..5).map(|_| connect_async(url.clone()));
        let results = join_all(attempts).await;

        let mut admitted: Vec<Client> = results
            .into_iter()
            .filter_map(|r| r.ok().map(|(ws, _)| ws))
            .collect();
        assert_eq!(admitted.len(), 1);

        recv_until(&mut admitted[0], "user-data").await;
        assert_eq!(server.connection_count().await, 1);

        // Closing the admitted client frees its slot.
        let mut first = admitted.remove(0);
        first.close(None).await.unwrap();
        drop(first);

        let mut readmitted = None;
        for _ in 0..100 {
            if let Ok((ws, _)) = connect_async(url.clone()).await {
                readmitted = Some(ws);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut ws = readmitted.expect("slot was never released");
        recv_until(&mut ws, "user-data").await;

        server.shutdown();
    }

    #[tokio::test]
    async fn test_disallowed_origin_gets_403() {
        let (server, addr) = start_server_with(ServerConfig {
            allowed_origins: vec!["localhost".to_string()],
            ..Default::default()
        })
        .await;

        let mut request = format!("ws://{}/", addr).into_client_request().unwrap();
        request.headers_mut().insert(header::ORIGIN, "https://evil.example".parse().unwrap());
        match connect_async(request).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::FORBIDDEN),
            Err(other) => panic!("unexpected handshake error: {:?}", other),
            Ok(_) => panic!("handshake should be refused"),
        }
        assert_eq!(server.connection_count().await, 0);

        let mut request = format!("ws://{}/", addr).into_client_request().unwrap();
        request.headers_mut().insert(header::ORIGIN, "http://localhost:5173".parse().unwrap());
        let (mut ws, _) = connect_async(request).await.unwrap();
        recv_until(&mut ws, "user-data").await;

        server.shutdown();
    }
}
