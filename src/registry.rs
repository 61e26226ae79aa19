//! Room registry
//!
//! Process-wide directory of room actors. The map lock is held only for
//! lookups and inserts; backing-room creation and actor startup happen
//! outside it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::error::RepositoryError;
use crate::repository::{Role, RoomRepository, UserPermission};
use crate::room::{RoomActor, RoomHandle};
use crate::types::{RoomId, UserId};

/// Lazily populated map of `RoomId -> RoomHandle`
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, RoomHandle>>,
    repository: Arc<dyn RoomRepository>,
    /// Capacity of each room actor's event channel
    room_capacity: usize,
}

impl RoomRegistry {
    pub fn new(repository: Arc<dyn RoomRepository>, room_capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            repository,
            room_capacity,
        }
    }

    /// Return the running actor for `room_id`, starting one on first access
    ///
    /// First access makes sure the backing room exists (an existing room is
    /// fine). A room created here gets `creator` as its admin so it never has
    /// an empty member set. If any of that fails no actor is started.
    pub async fn get_or_create(
        &self,
        room_id: &RoomId,
        creator: &UserId,
    ) -> Result<RoomHandle, RepositoryError> {
        let cached = self.lock().get(room_id).cloned();
        if let Some(handle) = cached {
            return Ok(handle);
        }

        match self.repository.create_room(room_id).await {
            Ok(_) => {
                self.seed_admin(room_id, creator).await?;
                info!(room_id = %room_id, admin = %creator, "created backing room");
            }
            Err(RepositoryError::RoomExists(_)) => debug!(room_id = %room_id, "backing room already exists"),
            Err(e) => return Err(e),
        }

        let (handle, actor) = RoomActor::new(room_id.clone(), self.repository.clone(), self.room_capacity);

        // Another caller may have won the race while we were creating the room
        let winner = {
            let mut rooms = self.lock();
            match rooms.get(room_id) {
                Some(existing) => Err(existing.clone()),
                None => {
                    rooms.insert(room_id.clone(), handle.clone());
                    Ok(handle)
                }
            }
        };

        match winner {
            Ok(handle) => {
                tokio::spawn(actor.run());
                info!(room_id = %room_id, "room actor spawned");
                Ok(handle)
            }
            Err(existing) => Ok(existing),
        }
    }

    async fn seed_admin(&self, room_id: &RoomId, creator: &UserId) -> Result<(), RepositoryError> {
        let admin = UserPermission::new(creator.clone(), Role::Admin);
        if let Err(e) = self.repository.add_member(room_id, admin).await {
            // A memberless room must not stay behind
            if let Err(cleanup) = self.repository.delete_room(room_id).await {
                warn!(room_id = %room_id, "failed to remove memberless room: {}", cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Number of rooms with a running actor
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.lock().contains_key(room_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RoomId, RoomHandle>> {
        // The map is never left half-updated, so a poisoned lock is still usable
        self.rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::faulty::FaultyRepository;
    use crate::repository::{InMemoryRoomRepository, Room};

    fn alice() -> UserId {
        UserId::new("alice")
    }

    #[tokio::test]
    async fn test_get_or_create_caches_handle() {
        let repo = Arc::new(InMemoryRoomRepository::new());
        let registry = RoomRegistry::new(repo.clone(), 16);
        let id = RoomId::new("R1");

        let first = registry.get_or_create(&id, &alice()).await.unwrap();
        let second = registry.get_or_create(&id, &UserId::new("bob")).await.unwrap();

        assert!(first.same_room(&second));
        assert_eq!(registry.len(), 1);
        assert!(repo.get_room(&id).await.is_ok());
        assert_eq!(first.info().await.unwrap().members, 0);
    }

    #[tokio::test]
    async fn test_created_room_has_creator_as_admin() {
        let repo = Arc::new(InMemoryRoomRepository::new());
        let registry = RoomRegistry::new(repo.clone(), 16);
        let id = RoomId::new("R1");

        registry.get_or_create(&id, &alice()).await.unwrap();

        let room = repo.get_room(&id).await.unwrap();
        assert_eq!(room.users, vec![UserPermission::new(alice(), Role::Admin)]);
    }

    #[tokio::test]
    async fn test_existing_backing_room_is_accepted() {
        let repo = Arc::new(InMemoryRoomRepository::new());
        let mut room = Room::new(RoomId::new("R1"));
        room.users.push(UserPermission::new(UserId::new("bob"), Role::Admin));
        repo.insert_room(room).await;
        let registry = RoomRegistry::new(repo.clone(), 16);

        let handle = registry.get_or_create(&RoomId::new("R1"), &alice()).await.unwrap();
        assert_eq!(handle.room_id(), &RoomId::new("R1"));

        // existing membership is left alone
        let stored = repo.get_room(&RoomId::new("R1")).await.unwrap();
        assert!(!stored.has_member(&alice()));
    }

    #[tokio::test]
    async fn test_create_failure_starts_no_actor() {
        let repo = Arc::new(FaultyRepository {
            fail_create: true,
            ..Default::default()
        });
        let registry = RoomRegistry::new(repo, 16);
        let id = RoomId::new("R1");

        let err = registry.get_or_create(&id, &alice()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Backend(_)));
        assert!(registry.is_empty());
        assert!(!registry.contains(&id));
    }

    #[tokio::test]
    async fn test_admin_seed_failure_leaves_no_room() {
        let repo = Arc::new(FaultyRepository {
            fail_members: true,
            ..Default::default()
        });
        let registry = RoomRegistry::new(repo.clone(), 16);
        let id = RoomId::new("R1");

        assert!(registry.get_or_create(&id, &alice()).await.is_err());
        assert!(registry.is_empty());
        assert!(matches!(
            repo.inner.get_room(&id).await,
            Err(RepositoryError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_first_access_yields_one_actor() {
        let repo = Arc::new(InMemoryRoomRepository::new());
        let registry = Arc::new(RoomRegistry::new(repo, 16));
        let id = RoomId::new("R1");

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let id = id.clone();
            tasks.push(tokio::spawn(async move { registry.get_or_create(&id, &alice()).await.unwrap() }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        assert!(handles.windows(2).all(|w| w[0].same_room(&w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_rooms_are_independent() {
        let registry = RoomRegistry::new(Arc::new(InMemoryRoomRepository::new()), 16);
        let a = registry.get_or_create(&RoomId::new("A"), &alice()).await.unwrap();
        let b = registry.get_or_create(&RoomId::new("B"), &alice()).await.unwrap();

        assert!(!a.same_room(&b));
        assert_eq!(registry.len(), 2);
    }
}
