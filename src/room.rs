//! Room actor implementation
//!
//! One actor per active room. It owns the room's live membership and is the
//! only writer of the room's persisted state, so every Register, Unregister,
//! Text, Seen and Delete is applied one at a time in the order the actor's
//! channel yields them. That order is the order every member observes.
//!
//! Events are persisted first and fanned out only on success, each tagged
//! with the room's next sequence number. Fan-out and history replay never
//! block: a member whose outbound buffer is full is evicted on the spot so
//! the rest of the room keeps flowing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::{Connection, Seq};
use crate::error::{RoomError, SendError};
use crate::message::{ChatEvent, DeleteMessage, Message, SeenMessage, TextDraft};
use crate::repository::RoomRepository;
use crate::types::{ConnectionId, MessageId, RoomId};

/// Events accepted by a room actor
#[derive(Debug)]
pub enum RoomEvent {
    /// Hand history to the connection, then add it to the room
    Register(Connection),
    /// Remove a connection and close its outbound channels
    Unregister(ConnectionId),
    /// New text message to persist and broadcast
    Text(TextDraft),
    /// Seen receipt to persist and broadcast
    Seen(SeenMessage),
    /// Deletion to persist and broadcast
    Delete(DeleteMessage),
    /// Snapshot of the room's live state
    Info(oneshot::Sender<RoomInfo>),
}

impl From<ChatEvent> for RoomEvent {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::Text(draft) => RoomEvent::Text(draft),
            ChatEvent::Seen(receipt) => RoomEvent::Seen(receipt),
            ChatEvent::Delete(notice) => RoomEvent::Delete(notice),
        }
    }
}

/// Live room metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: RoomId,
    /// Number of registered connections
    pub members: usize,
}

/// Handle to a running room actor
///
/// Cheap to clone; the registry keeps one per room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomEvent>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// True if both handles address the same actor
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    pub async fn register(&self, connection: Connection) -> Result<(), RoomError> {
        self.send(RoomEvent::Register(connection)).await
    }

    pub async fn unregister(&self, id: ConnectionId) -> Result<(), RoomError> {
        self.send(RoomEvent::Unregister(id)).await
    }

    /// Forward an inbound chat event
    pub async fn submit(&self, event: ChatEvent) -> Result<(), RoomError> {
        self.send(event.into()).await
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomEvent::Info(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
    }

    async fn send(&self, event: RoomEvent) -> Result<(), RoomError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id.clone()))
    }
}

/// The room actor state. Runs inside its own Tokio task.
pub struct RoomActor {
    room_id: RoomId,
    /// Live connections: ConnectionId -> Connection
    members: HashMap<ConnectionId, Connection>,
    repository: Arc<dyn RoomRepository>,
    receiver: mpsc::Receiver<RoomEvent>,
    /// Timestamp of the last accepted message, keeps `sent_at` non-decreasing
    last_sent_at: DateTime<Utc>,
    /// Sequence number of the next broadcast event
    next_seq: Seq,
}

impl RoomActor {
    /// Create an actor and its handle without starting it
    pub fn new(
        room_id: RoomId,
        repository: Arc<dyn RoomRepository>,
        capacity: usize,
    ) -> (RoomHandle, RoomActor) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = RoomHandle {
            room_id: room_id.clone(),
            sender: tx,
        };
        let actor = RoomActor {
            room_id,
            members: HashMap::new(),
            repository,
            receiver: rx,
            last_sent_at: DateTime::<Utc>::MIN_UTC,
            next_seq: 0,
        };
        (handle, actor)
    }

    /// Run the room event loop
    ///
    /// Processes events until every handle is dropped.
    pub async fn run(mut self) {
        info!(room_id = %self.room_id, "room actor started");

        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event).await;
        }

        info!(room_id = %self.room_id, "room actor stopped");
    }

    async fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Register(connection) => self.handle_register(connection).await,
            RoomEvent::Unregister(id) => self.handle_unregister(id),
            RoomEvent::Text(draft) => self.handle_text(draft).await,
            RoomEvent::Seen(receipt) => self.handle_seen(receipt).await,
            RoomEvent::Delete(notice) => self.handle_delete(notice).await,
            RoomEvent::Info(reply) => {
                let _ = reply.send(RoomInfo {
                    room_id: self.room_id.clone(),
                    members: self.members.len(),
                });
            }
        }
    }

    async fn handle_register(&mut self, mut connection: Connection) {
        info!(
            room_id = %self.room_id,
            connection = %connection.id,
            user = %connection.user,
            "registering connection"
        );

        let history = match self.repository.get_messages(&self.room_id).await {
            Ok(history) => history,
            // Join anyway, just without replay
            Err(e) => {
                warn!(room_id = %self.room_id, "failed to load history: {}", e);
                Vec::new()
            }
        };

        debug!(room_id = %self.room_id, count = history.len(), "replaying history");
        if connection.replay(history).is_err() {
            debug!(connection = %connection.id, "connection closed before replay");
            return;
        }

        self.members.insert(connection.id, connection);
        debug!(room_id = %self.room_id, members = self.members.len(), "connection registered");
    }

    fn handle_unregister(&mut self, id: ConnectionId) {
        // Dropping the connection closes its outbound channels
        if self.members.remove(&id).is_some() {
            info!(
                room_id = %self.room_id,
                connection = %id,
                members = self.members.len(),
                "connection unregistered"
            );
        }
    }

    async fn handle_text(&mut self, draft: TextDraft) {
        let sent_at = Utc::now().max(self.last_sent_at);
        let message = Message {
            id: MessageId::generate(),
            content: draft.content,
            embedded_media: draft.embedded_media,
            chat_room_id: self.room_id.clone(),
            seen_by: vec![draft.sent_by.clone()],
            sent_by: draft.sent_by,
            sent_at,
        };

        if let Err(e) = self.repository.append_message(&self.room_id, &message).await {
            warn!(room_id = %self.room_id, message_id = %message.id, "dropping message, persist failed: {}", e);
            return;
        }
        self.last_sent_at = sent_at;

        debug!(room_id = %self.room_id, message_id = %message.id, "broadcasting message");
        self.fan_out(|conn, seq| conn.try_send_message(seq, message.clone()));
    }

    async fn handle_seen(&mut self, receipt: SeenMessage) {
        if let Err(e) = self
            .repository
            .mark_seen(&self.room_id, &receipt.message_id, &receipt.seen_by)
            .await
        {
            warn!(room_id = %self.room_id, message_id = %receipt.message_id, "dropping seen receipt: {}", e);
            return;
        }

        debug!(room_id = %self.room_id, message_id = %receipt.message_id, "broadcasting seen receipt");
        self.fan_out(|conn, seq| conn.try_send_seen(seq, receipt.clone()));
    }

    async fn handle_delete(&mut self, notice: DeleteMessage) {
        if let Err(e) = self
            .repository
            .delete_message(&self.room_id, &notice.message_id)
            .await
        {
            warn!(room_id = %self.room_id, message_id = %notice.message_id, "dropping delete: {}", e);
            return;
        }

        debug!(room_id = %self.room_id, message_id = %notice.message_id, "broadcasting delete");
        self.fan_out(|conn, seq| conn.try_send_delete(seq, notice.clone()));
    }

    /// Deliver to every member without blocking, evicting those that can't take it
    fn fan_out(&mut self, deliver: impl Fn(&Connection, Seq) -> Result<(), SendError>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let mut evicted = Vec::new();

        for (id, conn) in &self.members {
            match deliver(conn, seq) {
                Ok(()) => {}
                Err(SendError::BufferFull) => {
                    warn!(room_id = %self.room_id, connection = %id, user = %conn.user, "evicting slow connection");
                    evicted.push(*id);
                }
                Err(SendError::ChannelClosed) => {
                    debug!(room_id = %self.room_id, connection = %id, "dropping closed connection");
                    evicted.push(*id);
                }
            }
        }

        for id in evicted {
            self.members.remove(&id);
        }
    }
}

/// Spawn a room actor task and return a handle to it
pub fn spawn_room(
    room_id: RoomId,
    repository: Arc<dyn RoomRepository>,
    capacity: usize,
) -> RoomHandle {
    let (handle, actor) = RoomActor::new(room_id, repository, capacity);
    tokio::spawn(actor.run());
    handle
}
