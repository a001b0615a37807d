//! Persistence collaborator for rooms and messages.
//!
//! The engine never owns durable state; it calls a [`RoomStore`] to find,
//! create and append. [`MemoryRoomStore`] keeps everything in-process.

use crate::error::StoreError;
use crate::room::{MembershipKey, Room};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_protocol::{Event, ThreadId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A persisted message record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub thread: ThreadId,
    pub sender: UserId,
    /// The full message event as it was published.
    pub event: Event,
    pub created_at: DateTime<Utc>,
}

/// Durable storage for rooms and their messages.
///
/// `insert` must reject a room whose membership key or thread already
/// exists with [`StoreError::Conflict`].
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Find the room with exactly this membership.
    async fn find_by_key(
        &self,
        namespace: &str,
        key: &MembershipKey,
    ) -> Result<Option<Room>, StoreError>;

    /// Find a room by thread id.
    async fn find_by_thread(
        &self,
        namespace: &str,
        thread: &str,
    ) -> Result<Option<Room>, StoreError>;

    /// Insert a new room.
    async fn insert(&self, namespace: &str, room: Room) -> Result<(), StoreError>;

    /// Save a sent message.
    async fn append_message(
        &self,
        namespace: &str,
        message: StoredMessage,
    ) -> Result<(), StoreError>;

    /// Messages of a thread, newest first.
    async fn messages(
        &self,
        namespace: &str,
        thread: &str,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Rooms and messages of one namespace.
#[derive(Debug, Default)]
struct NamespaceRooms {
    /// Canonical membership key -> thread.
    by_key: DashMap<MembershipKey, ThreadId>,
    /// Thread -> room.
    by_thread: DashMap<ThreadId, Room>,
    /// Thread -> messages, oldest first.
    messages: DashMap<ThreadId, Vec<StoredMessage>>,
}

/// In-process [`RoomStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryRoomStore {
    namespaces: Arc<DashMap<String, Arc<NamespaceRooms>>>,
}

impl MemoryRoomStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace(&self, namespace: &str) -> Arc<NamespaceRooms> {
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }

    /// Number of rooms in a namespace.
    #[must_use]
    pub fn room_count(&self, namespace: &str) -> usize {
        self.namespaces
            .get(namespace)
            .map(|rooms| rooms.by_thread.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn find_by_key(
        &self,
        namespace: &str,
        key: &MembershipKey,
    ) -> Result<Option<Room>, StoreError> {
        let rooms = self.namespace(namespace);
        let Some(thread) = rooms.by_key.get(key).map(|t| t.clone()) else {
            return Ok(None);
        };
        Ok(rooms.by_thread.get(&thread).map(|r| r.clone()))
    }

    async fn find_by_thread(
        &self,
        namespace: &str,
        thread: &str,
    ) -> Result<Option<Room>, StoreError> {
        Ok(self
            .namespace(namespace)
            .by_thread
            .get(thread)
            .map(|r| r.clone()))
    }

    async fn insert(&self, namespace: &str, room: Room) -> Result<(), StoreError> {
        let rooms = self.namespace(namespace);

        // Lock order is key index, then thread index. Neither index changes
        // unless both slots are free.
        let outcome = match rooms.by_key.entry(room.key()) {
            Entry::Occupied(taken) => Err(StoreError::Conflict(format!(
                "membership {}",
                taken.key()
            ))),
            Entry::Vacant(key_slot) => match rooms.by_thread.entry(room.thread.clone()) {
                Entry::Occupied(_) => {
                    Err(StoreError::Conflict(format!("thread {}", room.thread)))
                }
                Entry::Vacant(thread_slot) => {
                    key_slot.insert(room.thread.clone());
                    thread_slot.insert(room);
                    Ok(())
                }
            },
        };
        outcome
    }

    async fn append_message(
        &self,
        namespace: &str,
        message: StoredMessage,
    ) -> Result<(), StoreError> {
        let rooms = self.namespace(namespace);
        if !rooms.by_thread.contains_key(&message.thread) {
            return Err(StoreError::Backend(format!(
                "no room for thread {}",
                message.thread
            )));
        }
        rooms
            .messages
            .entry(message.thread.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn messages(
        &self,
        namespace: &str,
        thread: &str,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self
            .namespace(namespace)
            .messages
            .get(thread)
            .map(|m| m.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Room;
    use parley_protocol::{ChatMessage, Profile};

    fn room(owner: i64, guests: &[i64]) -> Room {
        Room::create(
            UserId::from(owner),
            guests.iter().map(|g| UserId::from(*g)).collect(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryRoomStore::new();
        let room = room(1, &[2]);

        store.insert("db", room.clone()).await.unwrap();
        assert_eq!(
            store.find_by_key("db", &room.key()).await.unwrap(),
            Some(room.clone())
        );
        assert_eq!(
            store.find_by_thread("db", &room.thread).await.unwrap(),
            Some(room.clone())
        );
        assert!(store.find_by_thread("other", &room.thread).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_membership_conflicts() {
        let store = MemoryRoomStore::new();
        store.insert("db", room(1, &[2])).await.unwrap();

        let err = store.insert("db", room(2, &[1])).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.room_count("db"), 1);
    }

    #[tokio::test]
    async fn test_losing_room_is_never_visible() {
        let store = MemoryRoomStore::new();
        let winner = room(1, &[2]);
        let loser = room(2, &[1]);
        store.insert("db", winner.clone()).await.unwrap();

        assert!(store.insert("db", loser.clone()).await.is_err());
        assert!(store.find_by_thread("db", &loser.thread).await.unwrap().is_none());
        assert_eq!(
            store.find_by_key("db", &loser.key()).await.unwrap(),
            Some(winner)
        );
    }

    #[tokio::test]
    async fn test_duplicate_thread_conflicts() {
        let store = MemoryRoomStore::new();
        let first = room(1, &[2]);
        let mut same_thread = room(1, &[3]);
        same_thread.thread = first.thread.clone();
        store.insert("db", first.clone()).await.unwrap();

        let err = store.insert("db", same_thread.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.find_by_key("db", &same_thread.key()).await.unwrap().is_none());
        assert_eq!(
            store.find_by_thread("db", &first.thread).await.unwrap(),
            Some(first)
        );
    }

    #[tokio::test]
    async fn test_messages_newest_first() {
        let store = MemoryRoomStore::new();
        let room = room(1, &[2]);
        store.insert("db", room.clone()).await.unwrap();

        let sender = Profile::new(1, "Alice");
        for text in ["first", "second"] {
            let msg = ChatMessage::new(room.thread.clone(), sender.clone(), vec![], text);
            store
                .append_message(
                    "db",
                    StoredMessage {
                        thread: room.thread.clone(),
                        sender: sender.id.clone(),
                        event: Event::message(msg),
                        created_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }

        let texts: Vec<String> = store
            .messages("db", &room.thread)
            .await
            .unwrap()
            .iter()
            .map(|m| m.event.as_message().unwrap().text.clone())
            .collect();
        assert_eq!(texts, ["second", "first"]);
    }

    #[tokio::test]
    async fn test_append_to_unknown_thread() {
        let store = MemoryRoomStore::new();
        let sender = Profile::new(1, "Alice");
        let result = store
            .append_message(
                "db",
                StoredMessage {
                    thread: "missing".into(),
                    sender: sender.id.clone(),
                    event: Event::message(ChatMessage::new("missing", sender, vec![], "x")),
                    created_at: Utc::now(),
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }
}
