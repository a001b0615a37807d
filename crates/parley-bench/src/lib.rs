//! Shared fixtures for the Parley benchmarks.

use parley_core::{ChatConfig, ChatService, MemoryDirectory, MemoryExpiringStore, MemoryRoomStore};
use parley_protocol::{ChatMessage, Event, Profile, UserId};
use std::sync::Arc;

/// Namespace used by every benchmark.
pub const NAMESPACE: &str = "bench";

/// A directory of `users` numbered users, everyone friends with everyone.
#[must_use]
pub fn directory(users: i64) -> Arc<MemoryDirectory> {
    let directory = Arc::new(MemoryDirectory::new());
    for id in 1..=users {
        directory.insert(Profile::new(id, format!("user-{id}")));
    }
    directory
}

/// A chat service over in-memory collaborators.
#[must_use]
pub fn service(users: i64, config: ChatConfig) -> ChatService {
    ChatService::new(
        config,
        Arc::new(MemoryRoomStore::new()),
        Arc::new(MemoryExpiringStore::default()),
        directory(users),
    )
}

/// A message event with a text body of `text_len` bytes.
#[must_use]
pub fn message_event(text_len: usize) -> Arc<Event> {
    let sender = Profile::new(1, "user-1");
    let members = vec![sender.clone(), Profile::new(2, "user-2")];
    Arc::new(Event::message(ChatMessage::new(
        "bench-thread",
        sender,
        members,
        "x".repeat(text_len),
    )))
}

/// Ids `1..=count`.
#[must_use]
pub fn user_ids(count: i64) -> Vec<UserId> {
    (1..=count).map(UserId::from).collect()
}
