//! RPS Arena Server
//!
//! Loads configuration from the environment and serves the lobby over
//! WebSocket until Ctrl-C.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rps_arena::{
    VERSION,
    network::{AuthConfig, GameServer, JwtVerifier, ServerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("RPS Arena Server v{}", VERSION);

    let config = ServerConfig::from_env()?;
    let auth = AuthConfig::from_env();
    if auth.is_configured() {
        info!("Token verification enabled");
    } else {
        warn!("No JWT_SECRET or AUTH_PUBLIC_KEY_PEM set, every client joins as a guest");
    }
    if !config.allowed_origins.is_empty() {
        info!("Allowed origins: {}", config.allowed_origins.join(", "));
    }

    let server = Arc::new(GameServer::new(config, Arc::new(JwtVerifier::new(auth))));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await?;

    // Give connection tasks a moment to flush shutdown notices.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("Server stopped");
    Ok(())
}
