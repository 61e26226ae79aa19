//! Multi-room WebSocket Chat Hub - Entry Point
//!
//! Loads configuration, starts the listener and serves connections.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chat_hub::{serve, ChatHub, InMemoryRoomRepository, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_hub=info")),
        )
        .init();

    let mut config = ServerConfig::from_env()?;

    // Bind address from command line wins over the environment
    if let Some(addr) = env::args().nth(1) {
        config.bind_addr = addr;
    }

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Chat hub listening on {}", config.bind_addr);

    let repository = Arc::new(InMemoryRoomRepository::new());
    for seed in &config.seed_rooms {
        repository.insert_room(seed.to_room()).await;
        info!(room_id = %seed.room_id, members = seed.members.len(), "seeded room");
    }
    if config.require_membership && config.seed_rooms.is_empty() {
        warn!("membership is required but no rooms are seeded; set CHAT_HUB_SEED or CHAT_HUB_REQUIRE_MEMBERSHIP=false");
    }
    let hub = Arc::new(ChatHub::new(repository, config));

    serve(listener, hub).await;
    Ok(())
}
