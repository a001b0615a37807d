//! User directory and chat permission policy.
//!
//! Both are collaborator seams: a deployment plugs in its own user store or
//! friend graph, the engine only asks questions through these traits.

use async_trait::async_trait;
use dashmap::DashMap;
use parley_protocol::{Profile, UserId};
use std::sync::Arc;

/// Source of user profiles and friend lists.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// The public profile of a user, or `None` if unknown.
    async fn profile(&self, user: &UserId) -> Option<Profile>;

    /// Users who receive this user's presence.
    async fn friends(&self, user: &UserId) -> Vec<UserId>;
}

/// Decides whether one user may open a chat with another.
#[async_trait]
pub trait ChatPolicy: Send + Sync {
    async fn is_permitted(&self, requester: &UserId, target: &UserId) -> bool;
}

/// Policy that permits every pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl ChatPolicy for AllowAll {
    async fn is_permitted(&self, _requester: &UserId, _target: &UserId) -> bool {
        true
    }
}

/// Policy that only permits chatting with friends.
#[derive(Clone)]
pub struct FriendsOnly {
    directory: Arc<dyn UserDirectory>,
}

impl FriendsOnly {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl ChatPolicy for FriendsOnly {
    async fn is_permitted(&self, requester: &UserId, target: &UserId) -> bool {
        self.directory.friends(requester).await.contains(target)
    }
}

/// In-process directory.
///
/// Unless a user has an explicit friend list, every other registered user is
/// a friend.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    profiles: Arc<DashMap<UserId, Profile>>,
    friends: Arc<DashMap<UserId, Vec<UserId>>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a user.
    pub fn insert(&self, profile: Profile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    /// Restrict a user's friends to an explicit list.
    pub fn set_friends(&self, user: UserId, friends: Vec<UserId>) {
        self.friends.insert(user, friends);
    }

    /// Number of registered users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn profile(&self, user: &UserId) -> Option<Profile> {
        self.profiles.get(user).map(|p| p.clone())
    }

    async fn friends(&self, user: &UserId) -> Vec<UserId> {
        if let Some(explicit) = self.friends.get(user) {
            return explicit.clone();
        }
        let mut all: Vec<UserId> = self
            .profiles
            .iter()
            .map(|p| p.key().clone())
            .filter(|id| id != user)
            .collect();
        all.sort();
        all
    }
}
