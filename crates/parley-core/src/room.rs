//! Chat rooms and exact-membership room resolution.
//!
//! A room is identified by its thread and owns a fixed membership set. No
//! two rooms in a namespace share the same set; lookups go through the
//! canonical [`MembershipKey`] so argument order never matters.

use crate::error::{ChatError, ChatResult, StoreError};
use crate::store::RoomStore;
use parley_protocol::{ThreadId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Role of a room member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Guest,
}

/// A room member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user: UserId,
    pub role: Role,
}

/// Canonical form of a membership set: sorted, without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MembershipKey(Vec<UserId>);

impl MembershipKey {
    /// Build the key for a set of participants, in any order.
    pub fn new<'a>(users: impl IntoIterator<Item = &'a UserId>) -> Self {
        let set: BTreeSet<&UserId> = users.into_iter().collect();
        Self(set.into_iter().cloned().collect())
    }

    /// The participants, sorted.
    #[must_use]
    pub fn users(&self) -> &[UserId] {
        &self.0
    }

    /// Number of distinct participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the key has no participants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MembershipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, user) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{user}")?;
        }
        f.write_str("}")
    }
}

/// A chat room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Globally unique thread id.
    pub thread: ThreadId,
    /// Members; the first is the owner.
    pub members: Vec<Member>,
}

impl Room {
    /// Create a room with a fresh thread. `owner` gets the owner role and
    /// every distinct other participant is a guest.
    #[must_use]
    pub fn create(owner: UserId, guests: Vec<UserId>) -> Self {
        let mut seen = BTreeSet::new();
        seen.insert(owner.clone());

        let mut members = vec![Member {
            user: owner,
            role: Role::Owner,
        }];
        for guest in guests {
            if seen.insert(guest.clone()) {
                members.push(Member {
                    user: guest,
                    role: Role::Guest,
                });
            }
        }

        Self {
            thread: Uuid::new_v4().to_string(),
            members,
        }
    }

    /// The canonical key of this room's membership.
    #[must_use]
    pub fn key(&self) -> MembershipKey {
        MembershipKey::new(self.members.iter().map(|m| &m.user))
    }

    /// Check if a user belongs to the room.
    #[must_use]
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.iter().any(|m| &m.user == user)
    }

    /// The owner, if the room has one.
    #[must_use]
    pub fn owner(&self) -> Option<&UserId> {
        self.members
            .iter()
            .find(|m| m.role == Role::Owner)
            .map(|m| &m.user)
    }

    /// Member ids in membership order.
    pub fn member_ids(&self) -> impl Iterator<Item = &UserId> {
        self.members.iter().map(|m| &m.user)
    }
}

/// Finds the room for an exact membership set, creating it when missing.
#[derive(Clone)]
pub struct RoomResolver {
    store: Arc<dyn RoomStore>,
}

impl RoomResolver {
    /// Create a resolver over a persistence collaborator.
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// Return the room whose membership is exactly `owner` plus
    /// `participants`, creating it if none exists.
    ///
    /// # Errors
    ///
    /// [`ChatError::Validation`] if nobody besides the owner is named;
    /// store failures propagate. A creation race is settled by re-reading
    /// once after the store reports a conflict.
    pub async fn get_or_create_room(
        &self,
        namespace: &str,
        owner: &UserId,
        participants: &[UserId],
    ) -> ChatResult<Room> {
        let key = MembershipKey::new(std::iter::once(owner).chain(participants));
        if key.len() < 2 {
            return Err(ChatError::Validation(
                "a room needs at least one participant besides the owner".into(),
            ));
        }

        if let Some(room) = self.store.find_by_key(namespace, &key).await? {
            return Ok(room);
        }

        let room = Room::create(owner.clone(), participants.to_vec());
        match self.store.insert(namespace, room.clone()).await {
            Ok(()) => {
                debug!(namespace = %namespace, thread = %room.thread, members = %key, "Created room");
                Ok(room)
            }
            Err(StoreError::Conflict(reason)) => {
                warn!(namespace = %namespace, members = %key, %reason, "Room creation raced, re-reading");
                self.store
                    .find_by_key(namespace, &key)
                    .await?
                    .ok_or_else(|| {
                        ChatError::Internal(format!("room for {key} vanished after conflict"))
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Find a room by thread.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotFound`] if the thread is unknown.
    pub async fn find_by_thread(&self, namespace: &str, thread: &str) -> ChatResult<Room> {
        self.store
            .find_by_thread(namespace, thread)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("thread {thread}")))
    }

    /// Find a room by thread, requiring `user` to be a member.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotFound`] if the thread is unknown or the user is not
    /// a member; the two cases are indistinguishable to the caller.
    pub async fn room_for_member(
        &self,
        namespace: &str,
        thread: &str,
        user: &UserId,
    ) -> ChatResult<Room> {
        match self.store.find_by_thread(namespace, thread).await? {
            Some(room) if room.is_member(user) => Ok(room),
            _ => Err(ChatError::NotFound(format!("thread {thread}"))),
        }
    }
}
