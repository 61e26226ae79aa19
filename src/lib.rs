//! Multi-room WebSocket Chat Hub Library
//!
//! A real-time chat backend built with tokio-tungstenite using the Actor
//! pattern for per-room state.
//!
//! # Features
//! - Rooms addressed by id, actors started lazily on first connection
//! - Text messages, seen receipts and deletions, persisted then broadcast
//! - History replay for late joiners
//! - Eviction of connections that cannot keep up
//!
//! # Architecture
//! - `RoomRegistry` maps room ids to running `RoomActor`s behind one mutex
//! - Each `RoomActor` owns its membership and serializes every mutation
//! - Each connection runs a read pump and a write pump bridging the socket
//!   to its room
//! - Persistence goes through the `RoomRepository` trait
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use chat_hub::{serve, ChatHub, InMemoryRoomRepository, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let listener = TcpListener::bind(&config.bind_addr).await.unwrap();
//!     let hub = Arc::new(ChatHub::new(Arc::new(InMemoryRoomRepository::new()), config));
//!     serve(listener, hub).await;
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod hub;
pub mod message;
pub mod registry;
pub mod repository;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use config::{RoomSeed, ServerConfig};
pub use connection::{Connection, Inbox, Outgoing};
pub use error::{AppError, ConfigError, ProtocolError, RepositoryError, RoomError, SendError};
pub use handler::handle_connection;
pub use hub::ChatHub;
pub use message::{ChatEvent, ClientEvent, DeleteMessage, EmbeddedMedia, Message, MessageType, SeenMessage};
pub use registry::RoomRegistry;
pub use repository::{InMemoryRoomRepository, Role, Room, RoomRepository, UserPermission};
pub use room::{RoomActor, RoomHandle, RoomInfo};
pub use server::serve;
pub use types::{ConnectionId, MessageId, RoomId, UserId};
