//! Chat hub entry point
//!
//! Receives `(room, user, socket)` from the upgrade layer, checks the user
//! belongs in the room and hands the socket to that room's actor.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, RepositoryError};
use crate::handler::{handle_connection, reject};
use crate::registry::RoomRegistry;
use crate::repository::RoomRepository;
use crate::types::{RoomId, UserId};

pub struct ChatHub {
    registry: RoomRegistry,
    repository: Arc<dyn RoomRepository>,
    config: ServerConfig,
}

impl ChatHub {
    pub fn new(repository: Arc<dyn RoomRepository>, config: ServerConfig) -> Self {
        Self {
            registry: RoomRegistry::new(repository.clone(), config.room_channel_capacity),
            repository,
            config,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn repository(&self) -> &Arc<dyn RoomRepository> {
        &self.repository
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Check that `user` holds a permission in `room_id`
    ///
    /// Always passes when membership checks are disabled.
    pub async fn validate_connection(&self, room_id: &RoomId, user: &UserId) -> Result<(), AppError> {
        if !self.config.require_membership {
            return Ok(());
        }

        match self.repository.get_permission(room_id, user).await {
            Ok(_) => Ok(()),
            Err(RepositoryError::UserNotFound { .. }) => Err(AppError::Forbidden {
                user: user.clone(),
                room: room_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Attach an authorized socket to its room and run it to completion
    pub async fn connect<S>(
        &self,
        room_id: RoomId,
        user: UserId,
        ws_stream: WebSocketStream<S>,
    ) -> Result<(), AppError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let room = match self.registry.get_or_create(&room_id, &user).await {
            Ok(room) => room,
            Err(e) => {
                warn!(room_id = %room_id, "room unavailable: {}", e);
                reject(ws_stream, CloseCode::Error, "room unavailable").await;
                return Err(e.into());
            }
        };

        info!(room_id = %room_id, user = %user, "user joined room");
        handle_connection(ws_stream, room, user, self.config.outbound_channel_capacity).await
    }
}
