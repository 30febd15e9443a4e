//! Room registry: at most one live room per group, plus the connection index.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::state::{
    game::{ConnectionId, GroupId},
    room::{Room, RoomPolicy},
    timer::QuestionTimer,
};

/// A room together with its deadline timer, guarded by one mutex.
#[derive(Debug)]
pub struct RoomSlot {
    /// Room state.
    pub room: Room,
    /// Pending question deadline of the room.
    pub timer: QuestionTimer,
}

impl RoomSlot {
    /// Slot with no deadline pending.
    pub fn new(room: Room) -> Self {
        Self {
            room,
            timer: QuestionTimer::new(),
        }
    }

    /// Run a room operation, containing any panic it raises.
    pub fn run<T>(&mut self, op: impl FnOnce(&mut Room) -> T) -> Result<T, RoomPanicked> {
        let room = &mut self.room;
        catch_unwind(AssertUnwindSafe(|| op(room))).map_err(|payload| RoomPanicked {
            message: panic_message(payload.as_ref()),
        })
    }
}

/// A room operation panicked; the room state can no longer be trusted.
#[derive(Debug, Clone, Error)]
#[error("room operation panicked: {message}")]
pub struct RoomPanicked {
    /// Panic payload rendered as text.
    pub message: String,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Shared handle to a room slot.
pub type RoomHandle = Arc<Mutex<RoomSlot>>;
/// Lock held on a room slot.
pub type RoomGuard = OwnedMutexGuard<RoomSlot>;

/// Registry of live rooms keyed by group, and of which room each connection is bound to.
///
/// A room is closed under its own lock before it is removed from the map, so anyone who locks a
/// handle can tell whether it is still the live room of its group.
pub struct RoomRegistry {
    rooms: DashMap<GroupId, RoomHandle>,
    connections: DashMap<ConnectionId, GroupId>,
    policy: RoomPolicy,
}

impl RoomRegistry {
    /// Empty registry creating rooms with `policy`.
    pub fn new(policy: RoomPolicy) -> Self {
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            policy,
        }
    }

    /// Limits applied to new rooms.
    pub fn policy(&self) -> RoomPolicy {
        self.policy
    }

    /// Lock the live room of `group_id`, creating an empty one if none exists.
    ///
    /// Concurrent callers for the same group always end up on the same room.
    pub async fn resolve_or_create_room(&self, group_id: &str) -> (RoomHandle, RoomGuard) {
        loop {
            let handle = self
                .rooms
                .entry(group_id.to_string())
                .or_insert_with(|| {
                    debug!(%group_id, "creating room");
                    Arc::new(Mutex::new(RoomSlot::new(Room::new(group_id, self.policy))))
                })
                .clone();
            let guard = handle.clone().lock_owned().await;
            if !guard.room.is_closed() {
                return (handle, guard);
            }
            drop(guard);
            self.rooms
                .remove_if(group_id, |_, current| Arc::ptr_eq(current, &handle));
        }
    }

    /// Handle of the live room of `group_id`, if any.
    pub fn room(&self, group_id: &str) -> Option<RoomHandle> {
        self.rooms.get(group_id).map(|entry| entry.value().clone())
    }

    /// Every registered room.
    pub fn rooms(&self) -> Vec<(GroupId, RoomHandle)> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Remove `handle` from the registry if it is still the room of `group_id`.
    ///
    /// The caller must have closed the room first.
    pub fn discard(&self, group_id: &str, handle: &RoomHandle) {
        if self
            .rooms
            .remove_if(group_id, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
        {
            debug!(%group_id, "room destroyed");
        }
    }

    /// Record that `connection_id` now plays in `group_id`.
    pub fn bind(&self, connection_id: ConnectionId, group_id: &str) {
        self.connections.insert(connection_id, group_id.to_string());
    }

    /// Forget the binding of `connection_id` if it still points at `group_id`.
    pub fn unbind(&self, connection_id: ConnectionId, group_id: &str) -> bool {
        self.connections
            .remove_if(&connection_id, |_, bound| bound == group_id)
            .is_some()
    }

    /// Group `connection_id` is bound to.
    pub fn group_of(&self, connection_id: ConnectionId) -> Option<GroupId> {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.value().clone())
    }

    /// Number of connections seated in a room.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Lock the room `connection_id` is bound to.
    ///
    /// The binding is re-checked once the lock is held; a connection that moved meanwhile is looked
    /// up again.
    pub async fn lock_bound(
        &self,
        connection_id: ConnectionId,
    ) -> Option<(GroupId, RoomHandle, RoomGuard)> {
        loop {
            let group_id = self.group_of(connection_id)?;
            let handle = self.room(&group_id)?;
            let guard = handle.clone().lock_owned().await;
            match self.group_of(connection_id) {
                Some(bound) if bound == group_id => {}
                Some(_) => continue,
                None => return None,
            }
            if guard.room.is_closed() {
                self.unbind(connection_id, &group_id);
                return None;
            }
            return Some((group_id, handle, guard));
        }
    }

    /// Unbind `connection_id` and lock the room it was bound to, so the caller can remove the
    /// player under the same lock.
    pub async fn detach_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Option<(GroupId, RoomHandle, RoomGuard)> {
        loop {
            let group_id = self.group_of(connection_id)?;
            let Some(handle) = self.room(&group_id) else {
                self.unbind(connection_id, &group_id);
                return None;
            };
            let guard = handle.clone().lock_owned().await;
            if self.unbind(connection_id, &group_id) {
                return Some((group_id, handle, guard));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;
    use uuid::Uuid;

    use super::*;
    use crate::state::game::JoiningPlayer;

    fn registry() -> Arc<RoomRegistry> {
        Arc::new(RoomRegistry::new(RoomPolicy::default()))
    }

    #[tokio::test]
    async fn resolving_twice_yields_the_same_room() {
        let registry = registry();
        let (first, guard) = registry.resolve_or_create_room("smiths").await;
        drop(guard);
        let (second, _guard) = registry.resolve_or_create_room("smiths").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.room_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_joins_share_one_room() {
        let registry = registry();
        let mut tasks = Vec::new();
        for i in 0..10 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (handle, mut guard) = registry.resolve_or_create_room("smiths").await;
                let joining = JoiningPlayer {
                    connection_id: Uuid::new_v4(),
                    user_id: format!("user-{i}"),
                    display_name: format!("User {i}"),
                };
                guard.room.join(joining, Instant::now()).unwrap();
                handle
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }
        assert_eq!(registry.room_count(), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
        let guard = handles[0].lock().await;
        assert_eq!(guard.room.player_count(), 10);
    }

    #[tokio::test]
    async fn closed_room_is_replaced() {
        let registry = registry();
        let (old, mut guard) = registry.resolve_or_create_room("smiths").await;
        guard.room.close();
        drop(guard);

        let (fresh, guard) = registry.resolve_or_create_room("smiths").await;
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(!guard.room.is_closed());
        assert_eq!(registry.room_count(), 1);
    }

    #[tokio::test]
    async fn discard_ignores_a_newer_room() {
        let registry = registry();
        let (old, mut guard) = registry.resolve_or_create_room("smiths").await;
        guard.room.close();
        drop(guard);
        let (_fresh, _guard) = registry.resolve_or_create_room("smiths").await;

        registry.discard("smiths", &old);
        assert_eq!(registry.room_count(), 1);
    }

    #[tokio::test]
    async fn detach_unbinds_and_locks() {
        let registry = registry();
        let connection = Uuid::new_v4();
        let (handle, guard) = registry.resolve_or_create_room("smiths").await;
        registry.bind(connection, "smiths");
        drop(guard);

        let (group, detached, _guard) = registry.detach_connection(connection).await.unwrap();
        assert_eq!(group, "smiths");
        assert!(Arc::ptr_eq(&handle, &detached));
        assert_eq!(registry.group_of(connection), None);
        assert!(registry.detach_connection(connection).await.is_none());
    }

    #[tokio::test]
    async fn lock_bound_follows_the_binding() {
        let registry = registry();
        let connection = Uuid::new_v4();
        assert!(registry.lock_bound(connection).await.is_none());

        let (_handle, guard) = registry.resolve_or_create_room("smiths").await;
        drop(guard);
        registry.bind(connection, "smiths");
        let (group, _, guard) = registry.lock_bound(connection).await.unwrap();
        assert_eq!(group, "smiths");
        assert_eq!(guard.room.group_id(), "smiths");
        drop(guard);

        assert!(!registry.unbind(connection, "jones"));
        assert!(registry.unbind(connection, "smiths"));
    }

    #[test]
    fn panics_are_contained() {
        let mut slot = RoomSlot::new(Room::new("smiths", RoomPolicy::default()));
        let err = slot
            .run(|_room| -> usize { panic!("boom") })
            .unwrap_err();
        assert_eq!(err.message, "boom");
        assert_eq!(slot.run(|room| room.player_count()).unwrap(), 0);
    }
}
