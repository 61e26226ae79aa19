//! Error types for the chat hub
//!
//! Mirrors the hub's failure classes: protocol errors (drop one frame),
//! persistence errors (drop one event), room availability, setup and
//! socket errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::{MessageId, RoomId, UserId};

/// Application-level errors
///
/// Returned from connection setup and from the listener. None of these are
/// produced inside a room actor's loop.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal for the connection)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence layer rejected a setup call
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Room actor is gone
    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    /// The user holds no permission in the room
    #[error("User {user} is not a member of room {room}")]
    Forbidden { user: UserId, room: RoomId },
}

/// Wire protocol errors
///
/// The offending frame is dropped; the connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope or payload did not parse
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Envelope `type` is not one of the known event types
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

/// Persistence port errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// `create_room` found an existing room with that id
    #[error("Room already exists: {0}")]
    RoomExists(RoomId),

    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("Message {message} not found in room {room}")]
    MessageNotFound { room: RoomId, message: MessageId },

    #[error("User {user} not found in room {room}")]
    UserNotFound { room: RoomId, user: UserId },

    /// Removing this member would leave the room with nobody in it
    #[error("Cannot remove the last member of room {0}")]
    LastMember(RoomId),

    /// Storage backend failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Room actor errors
#[derive(Debug, Error)]
pub enum RoomError {
    /// The room's event channel is closed
    #[error("Room {0} is unavailable")]
    Unavailable(RoomId),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Outbound channel send errors
///
/// Occurs when the room actor delivers to a connection's outbound channel.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The connection's write pump has gone away
    #[error("Channel closed")]
    ChannelClosed,

    /// The connection is not draining its buffer fast enough
    #[error("Channel full")]
    BufferFull,
}
