//! Persistence port
//!
//! The narrow interface the hub uses to durably record room activity, plus
//! an in-process implementation. Real deployments put a document store behind
//! [`RoomRepository`]; the hub never assumes any call is transactional with
//! its in-memory fan-out.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::RepositoryError;
use crate::message::Message;
use crate::types::{MessageId, RoomId, UserId};

/// Permission level of a room member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Member,
    Admin,
}

/// One member of a room and their role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermission {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(rename = "permission")]
    pub role: Role,
}

impl UserPermission {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}

/// Persisted room document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    /// Ordered by arrival at the room actor
    pub messages: Vec<Message>,
    pub users: Vec<UserPermission>,
}

impl Room {
    /// An empty room with no history and no members
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            users: Vec::new(),
        }
    }

    pub fn has_member(&self, user: &UserId) -> bool {
        self.users.iter().any(|p| &p.user_id == user)
    }

    fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }
}

/// Storage operations required by the hub
///
/// Every call may fail. Implementations must make `mark_seen` idempotent.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Create an empty room; `RoomExists` if the id is taken
    async fn create_room(&self, id: &RoomId) -> Result<Room, RepositoryError>;

    /// Fetch a room; `RoomNotFound` if absent
    async fn get_room(&self, id: &RoomId) -> Result<Room, RepositoryError>;

    async fn delete_room(&self, id: &RoomId) -> Result<(), RepositoryError>;

    /// Append to the end of the room's history
    async fn append_message(&self, room: &RoomId, message: &Message) -> Result<(), RepositoryError>;

    /// Add `user` to the message's seen set
    async fn mark_seen(
        &self,
        room: &RoomId,
        message: &MessageId,
        user: &UserId,
    ) -> Result<(), RepositoryError>;

    async fn delete_message(&self, room: &RoomId, message: &MessageId) -> Result<(), RepositoryError>;

    /// Full history of a room in order
    async fn get_messages(&self, room: &RoomId) -> Result<Vec<Message>, RepositoryError> {
        Ok(self.get_room(room).await?.messages)
    }

    /// Add a member, or update the role of an existing one
    async fn add_member(&self, room: &RoomId, permission: UserPermission) -> Result<(), RepositoryError>;

    /// Remove a member; refuses to empty the room
    async fn remove_member(&self, room: &RoomId, user: &UserId) -> Result<(), RepositoryError>;

    async fn get_permission(&self, room: &RoomId, user: &UserId) -> Result<UserPermission, RepositoryError> {
        self.get_room(room)
            .await?
            .users
            .into_iter()
            .find(|p| &p.user_id == user)
            .ok_or_else(|| RepositoryError::UserNotFound {
                room: room.clone(),
                user: user.clone(),
            })
    }

    async fn change_role(&self, room: &RoomId, user: &UserId, role: Role) -> Result<(), RepositoryError>;

    /// Messages in the room that `user` has not seen yet
    async fn get_unseen_messages(&self, room: &RoomId, user: &UserId) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.get_messages(room).await?;
        Ok(messages
            .into_iter()
            .filter(|m| !m.seen_by.contains(user))
            .collect())
    }
}

/// Room documents held in process memory
#[derive(Debug, Default)]
pub struct InMemoryRoomRepository {
    rooms: Mutex<HashMap<RoomId, Room>>,
}

impl InMemoryRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a whole room document, replacing any existing one
    pub async fn insert_room(&self, room: Room) {
        self.rooms.lock().await.insert(room.id.clone(), room);
    }

    /// Run `f` against a stored room, or fail with `RoomNotFound`
    async fn with_room<T>(
        &self,
        id: &RoomId,
        f: impl FnOnce(&mut Room) -> Result<T, RepositoryError> + Send,
    ) -> Result<T, RepositoryError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms
            .get_mut(id)
            .ok_or_else(|| RepositoryError::RoomNotFound(id.clone()))?;
        f(room)
    }
}

#[async_trait]
impl RoomRepository for InMemoryRoomRepository {
    async fn create_room(&self, id: &RoomId) -> Result<Room, RepositoryError> {
        let mut rooms = self.rooms.lock().await;
        if rooms.contains_key(id) {
            return Err(RepositoryError::RoomExists(id.clone()));
        }
        let room = Room::new(id.clone());
        rooms.insert(id.clone(), room.clone());
        debug!("Created room {}", id);
        Ok(room)
    }

    async fn get_room(&self, id: &RoomId) -> Result<Room, RepositoryError> {
        self.with_room(id, |room| Ok(room.clone())).await
    }

    async fn delete_room(&self, id: &RoomId) -> Result<(), RepositoryError> {
        self.rooms
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::RoomNotFound(id.clone()))
    }

    async fn append_message(&self, room: &RoomId, message: &Message) -> Result<(), RepositoryError> {
        let message = message.clone();
        self.with_room(room, move |r| {
            r.messages.push(message);
            Ok(())
        })
        .await
    }

    async fn mark_seen(
        &self,
        room: &RoomId,
        message: &MessageId,
        user: &UserId,
    ) -> Result<(), RepositoryError> {
        self.with_room(room, |r| {
            let msg = r
                .message_mut(message)
                .ok_or_else(|| RepositoryError::MessageNotFound {
                    room: room.clone(),
                    message: message.clone(),
                })?;
            msg.mark_seen(user);
            Ok(())
        })
        .await
    }

    async fn delete_message(&self, room: &RoomId, message: &MessageId) -> Result<(), RepositoryError> {
        self.with_room(room, |r| {
            let before = r.messages.len();
            r.messages.retain(|m| &m.id != message);
            if r.messages.len() == before {
                return Err(RepositoryError::MessageNotFound {
                    room: room.clone(),
                    message: message.clone(),
                });
            }
            Ok(())
        })
        .await
    }

    async fn add_member(&self, room: &RoomId, permission: UserPermission) -> Result<(), RepositoryError> {
        self.with_room(room, move |r| {
            match r.users.iter_mut().find(|p| p.user_id == permission.user_id) {
                Some(existing) => existing.role = permission.role,
                None => r.users.push(permission),
            }
            Ok(())
        })
        .await
    }

    async fn remove_member(&self, room: &RoomId, user: &UserId) -> Result<(), RepositoryError> {
        self.with_room(room, |r| {
            if !r.has_member(user) {
                return Err(RepositoryError::UserNotFound {
                    room: room.clone(),
                    user: user.clone(),
                });
            }
            if r.users.len() == 1 {
                return Err(RepositoryError::LastMember(room.clone()));
            }
            r.users.retain(|p| &p.user_id != user);
            Ok(())
        })
        .await
    }

    async fn change_role(&self, room: &RoomId, user: &UserId, role: Role) -> Result<(), RepositoryError> {
        self.with_room(room, |r| {
            let permission = r
                .users
                .iter_mut()
                .find(|p| &p.user_id == user)
                .ok_or_else(|| RepositoryError::UserNotFound {
                    room: room.clone(),
                    user: user.clone(),
                })?;
            permission.role = role;
            Ok(())
        })
        .await
    }
}


/// Repository double whose calls can be made to fail per category
#[cfg(test)]
pub(crate) mod faulty {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    pub(crate) struct FaultyRepository {
        pub inner: InMemoryRoomRepository,
        pub fail_create: bool,
        pub fail_reads: bool,
        /// Switchable while a room is running
        pub fail_writes: AtomicBool,
        pub fail_members: bool,
    }

    impl FaultyRepository {
        fn writes_fail(&self) -> bool {
            self.fail_writes.load(Ordering::SeqCst)
        }
    }

    fn backend() -> RepositoryError {
        RepositoryError::Backend("injected failure".to_string())
    }

    #[async_trait]
    impl RoomRepository for FaultyRepository {
        async fn create_room(&self, id: &RoomId) -> Result<Room, RepositoryError> {
            if self.fail_create {
                return Err(backend());
            }
            self.inner.create_room(id).await
        }

        async fn get_room(&self, id: &RoomId) -> Result<Room, RepositoryError> {
            if self.fail_reads {
                return Err(backend());
            }
            self.inner.get_room(id).await
        }

        async fn delete_room(&self, id: &RoomId) -> Result<(), RepositoryError> {
            self.inner.delete_room(id).await
        }

        async fn append_message(&self, room: &RoomId, message: &Message) -> Result<(), RepositoryError> {
            if self.writes_fail() {
                return Err(backend());
            }
            self.inner.append_message(room, message).await
        }

        async fn mark_seen(
            &self,
            room: &RoomId,
            message: &MessageId,
            user: &UserId,
        ) -> Result<(), RepositoryError> {
            if self.writes_fail() {
                return Err(backend());
            }
            self.inner.mark_seen(room, message, user).await
        }

        async fn delete_message(&self, room: &RoomId, message: &MessageId) -> Result<(), RepositoryError> {
            if self.writes_fail() {
                return Err(backend());
            }
            self.inner.delete_message(room, message).await
        }

        async fn add_member(&self, room: &RoomId, permission: UserPermission) -> Result<(), RepositoryError> {
            if self.fail_members {
                return Err(backend());
            }
            self.inner.add_member(room, permission).await
        }

        async fn remove_member(&self, room: &RoomId, user: &UserId) -> Result<(), RepositoryError> {
            self.inner.remove_member(room, user).await
        }

        async fn change_role(&self, room: &RoomId, user: &UserId, role: Role) -> Result<(), RepositoryError> {
            self.inner.change_role(room, user, role).await
        }
    }
}
