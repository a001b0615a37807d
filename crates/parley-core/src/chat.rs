//! Caller-facing chat operations.
//!
//! [`ChatService`] is constructed once and shared by every request handler.
//! It ties the registry, presence, room resolution and token store together
//! behind the operations a web layer exposes.

use crate::directory::{AllowAll, ChatPolicy, UserDirectory};
use crate::error::{ChatError, ChatResult};
use crate::presence::{PresenceTracker, DEFAULT_PRESENCE_THRESHOLD};
use crate::registry::{Registry, RegistryConfig};
use crate::room::{Room, RoomResolver};
use crate::store::{RoomStore, StoredMessage};
use crate::streamer::{EventStreamer, DEFAULT_HEARTBEAT};
use crate::token::{ExpiringStore, TokenStore};
use chrono::Utc;
use futures_util::Stream;
use parley_protocol::codec::MAX_FRAME_SIZE;
use parley_protocol::{ChatMessage, Event, Frame, PresenceStanza, Profile, ThreadId, UserId};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Chat engine configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Backlog above which a user is reported offline.
    pub presence_threshold: usize,
    /// Idle interval between stream keep-alives.
    pub heartbeat: Duration,
    /// Optional mailbox bound; oldest events are dropped beyond it.
    pub max_backlog: Option<usize>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
            heartbeat: DEFAULT_HEARTBEAT,
            max_backlog: None,
        }
    }
}

/// Result of starting a session with another user.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub thread_id: ThreadId,
    pub members: Vec<Profile>,
}

/// The chat engine.
#[derive(Clone)]
pub struct ChatService {
    registry: Arc<Registry>,
    presence: PresenceTracker,
    rooms: RoomResolver,
    tokens: TokenStore,
    directory: Arc<dyn UserDirectory>,
    policy: Arc<dyn ChatPolicy>,
    heartbeat: Duration,
}

impl ChatService {
    /// Create a service that permits every chat pair.
    #[must_use]
    pub fn new(
        config: ChatConfig,
        store: Arc<dyn RoomStore>,
        tokens: Arc<dyn ExpiringStore>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        info!("Creating chat service with config: {:?}", config);
        let registry = Arc::new(Registry::with_config(RegistryConfig {
            max_backlog: config.max_backlog,
        }));

        Self {
            presence: PresenceTracker::with_threshold(registry.clone(), config.presence_threshold),
            registry,
            rooms: RoomResolver::new(store),
            tokens: TokenStore::new(tokens),
            directory,
            policy: Arc::new(AllowAll),
            heartbeat: config.heartbeat,
        }
    }

    /// Replace the chat permission policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn ChatPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// The mailbox registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The presence tracker.
    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    async fn profile(&self, user: &UserId) -> ChatResult<Profile> {
        self.directory
            .profile(user)
            .await
            .ok_or_else(|| ChatError::NotFound(format!("user {user}")))
    }

    async fn profiles(&self, room: &Room) -> ChatResult<Vec<Profile>> {
        let mut profiles = Vec::with_capacity(room.members.len());
        for user in room.member_ids() {
            profiles.push(self.profile(user).await?);
        }
        Ok(profiles)
    }

    /// Tell the user's friends about their current presence.
    async fn publish_presence(&self, namespace: &str, profile: Profile) -> usize {
        let friends = self.directory.friends(&profile.id).await;
        self.presence.broadcast_presence(namespace, profile, &friends)
    }

    /// Find or create the room with exactly these members.
    ///
    /// # Errors
    ///
    /// See [`RoomResolver::get_or_create_room`].
    pub async fn get_or_create_room(
        &self,
        namespace: &str,
        owner: &UserId,
        participants: &[UserId],
    ) -> ChatResult<Room> {
        self.rooms
            .get_or_create_room(namespace, owner, participants)
            .await
    }

    /// Open a one-to-one session between `requester` and `target`.
    ///
    /// # Errors
    ///
    /// [`ChatError::Validation`] without a target, [`ChatError::NotFound`]
    /// for an unknown target, [`ChatError::PermissionDenied`] when the
    /// policy refuses the pair.
    pub async fn start_session(
        &self,
        namespace: &str,
        requester: &UserId,
        target: Option<&UserId>,
    ) -> ChatResult<Session> {
        let target = target.ok_or_else(|| {
            ChatError::Validation("cannot find the person you want to talk to".into())
        })?;
        self.profile(target).await?;

        if !self.policy.is_permitted(requester, target).await {
            return Err(ChatError::PermissionDenied(
                "you can only talk to friends".into(),
            ));
        }

        let room = self
            .get_or_create_room(namespace, requester, std::slice::from_ref(target))
            .await?;
        let members = self.profiles(&room).await?;
        debug!(namespace = %namespace, thread = %room.thread, "Session started");

        Ok(Session {
            thread_id: room.thread,
            members,
        })
    }

    /// Send a message to every member of a thread.
    ///
    /// The message is saved through the room store, the sender's presence
    /// is refreshed for their friends, and each member (sender included)
    /// receives a copy.
    ///
    /// # Errors
    ///
    /// [`ChatError::Validation`] for empty text, [`ChatError::NotFound`] if
    /// the thread is unknown or the sender is not a member.
    pub async fn send(
        &self,
        namespace: &str,
        thread: &str,
        sender: &UserId,
        text: &str,
        kind: Option<&str>,
    ) -> ChatResult<Uuid> {
        if text.is_empty() {
            return Err(ChatError::Validation("message text is required".into()));
        }

        let room = self.rooms.room_for_member(namespace, thread, sender).await?;
        let sender_profile = self.profile(sender).await?;
        let members = self.profiles(&room).await?;

        let mut message = ChatMessage::new(room.thread.clone(), sender_profile.clone(), members, text);
        if let Some(kind) = kind.filter(|k| !k.is_empty()) {
            message = message.with_kind(kind);
        }
        let id = message.id;
        let event = Event::message(message);

        // Reject before saving anything so an oversize message is never
        // half-delivered.
        let size = serde_json::to_vec(&event)
            .map_err(|e| ChatError::Internal(e.to_string()))?
            .len();
        if size > MAX_FRAME_SIZE {
            return Err(ChatError::Validation(format!(
                "message of {size} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
            )));
        }

        self.rooms
            .store()
            .append_message(
                namespace,
                StoredMessage {
                    thread: room.thread.clone(),
                    sender: sender.clone(),
                    event: event.clone(),
                    created_at: Utc::now(),
                },
            )
            .await?;

        self.publish_presence(namespace, sender_profile).await;

        let recipients = self
            .registry
            .publish_many(namespace, room.member_ids(), Arc::new(event));
        debug!(namespace = %namespace, thread = %room.thread, message = %id, recipients, "Message sent");

        Ok(id)
    }

    /// Saved messages of a thread, newest first. Members only.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotFound`] if the thread is unknown or `user` is not a
    /// member.
    pub async fn history(
        &self,
        namespace: &str,
        thread: &str,
        user: &UserId,
    ) -> ChatResult<Vec<StoredMessage>> {
        let room = self.rooms.room_for_member(namespace, thread, user).await?;
        Ok(self.rooms.store().messages(namespace, &room.thread).await?)
    }

    /// Presence of every friend of `user`.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotFound`] if a friend has no profile.
    pub async fn friends_presence(
        &self,
        namespace: &str,
        user: &UserId,
    ) -> ChatResult<Vec<PresenceStanza>> {
        let mut stanzas = Vec::new();
        for friend in self.directory.friends(user).await {
            let profile = self.profile(&friend).await?;
            stanzas.push(self.presence.stanza(namespace, profile));
        }
        Ok(stanzas)
    }

    /// Announce the user to their friends and stream their mailbox.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotFound`] if the user has no profile.
    pub async fn stream(
        &self,
        namespace: &str,
        user: &UserId,
    ) -> ChatResult<impl Stream<Item = Frame> + Send + 'static> {
        let profile = self.profile(user).await?;
        self.publish_presence(namespace, profile).await;

        let mailbox = self.registry.mailbox(namespace, user);
        debug!(namespace = %namespace, user = %user, backlog = mailbox.len(), "Stream opened");
        Ok(EventStreamer::with_heartbeat(mailbox, self.heartbeat).into_stream())
    }

    /// Issue a stream token for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the token store rejects the write.
    pub async fn issue_token(&self, namespace: &str, user: &UserId) -> ChatResult<String> {
        self.tokens.issue_token(namespace, user).await
    }

    /// Stream the mailbox of the user a token was issued for.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotFound`] if the token is unknown or expired.
    pub async fn stream_via_token(
        &self,
        token: &str,
    ) -> ChatResult<impl Stream<Item = Frame> + Send + 'static> {
        let grant = self.tokens.resolve_token(token).await?;
        self.stream(&grant.namespace, &grant.user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{FriendsOnly, MemoryDirectory};
    use crate::store::MemoryRoomStore;
    use crate::token::MemoryExpiringStore;
    use futures_util::StreamExt;

    const NS: &str = "db";

    struct Fixture {
        service: ChatService,
        directory: Arc<MemoryDirectory>,
        u1: UserId,
        u2: UserId,
        u3: UserId,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(MemoryDirectory::new());
        for (id, name) in [(1, "One"), (2, "Two"), (3, "Three")] {
            directory.insert(Profile::new(id, name));
        }
        let service = ChatService::new(
            ChatConfig::default(),
            Arc::new(MemoryRoomStore::new()),
            Arc::new(MemoryExpiringStore::default()),
            directory.clone(),
        );
        Fixture {
            service,
            directory,
            u1: UserId::from(1),
            u2: UserId::from(2),
            u3: UserId::from(3),
        }
    }

    async fn next_message<S>(stream: &mut std::pin::Pin<&mut S>) -> ChatMessage
    where
        S: Stream<Item = Frame>,
    {
        loop {
            if let Some(Frame::Event(event)) = stream.next().await {
                if let Some(message) = event.as_message() {
                    return message.clone();
                }
            }
        }
    }

    fn drain(service: &ChatService, user: &UserId) -> Vec<Arc<Event>> {
        let mailbox = service.registry().mailbox(NS, user);
        std::iter::from_fn(|| mailbox.try_take()).collect()
    }

    #[tokio::test]
    async fn test_send_message_end_to_end() {
        let Fixture { service, u1, u2, .. } = fixture();

        assert!(matches!(
            service.send(NS, "not-a-thread", &u1, "Send Message", None).await,
            Err(ChatError::NotFound(_))
        ));

        let room = service.get_or_create_room(NS, &u1, &[u2.clone()]).await.unwrap();
        let id = service
            .send(NS, &room.thread, &u1, "Send Message", None)
            .await
            .unwrap();

        let messages: Vec<_> = drain(&service, &u2)
            .into_iter()
            .filter_map(|e| e.as_message().cloned())
            .collect();
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.id, id);
        assert_eq!(message.text, "Send Message");
        assert_eq!(message.sender.id, u1);
        assert_eq!(message.thread, room.thread);
        assert_eq!(message.kind, "plain");
        assert_eq!(message.members.len(), 2);
    }

    #[tokio::test]
    async fn test_send_reaches_sender_and_refreshes_presence() {
        let Fixture { service, u1, u2, u3, .. } = fixture();
        let room = service.get_or_create_room(NS, &u1, &[u2.clone()]).await.unwrap();
        service
            .send(NS, &room.thread, &u1, "hi", Some("html"))
            .await
            .unwrap();

        let own = drain(&service, &u1);
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].as_message().unwrap().kind, "html");

        // u3 is a friend but not a member: presence only.
        let third = drain(&service, &u3);
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].as_presence().unwrap().entity.id, u1);
    }

    #[tokio::test]
    async fn test_oversize_message_is_rejected_before_delivery() {
        let Fixture { service, u1, u2, .. } = fixture();
        let room = service.get_or_create_room(NS, &u1, &[u2.clone()]).await.unwrap();
        let text = "x".repeat(MAX_FRAME_SIZE);

        assert!(matches!(
            service.send(NS, &room.thread, &u1, &text, None).await,
            Err(ChatError::Validation(_))
        ));
        assert!(drain(&service, &u2).is_empty());
        assert!(service.history(NS, &room.thread, &u1).await.unwrap().is_empty());

        service.send(NS, &room.thread, &u1, "fits", None).await.unwrap();
        let delivered = drain(&service, &u2)
            .into_iter()
            .filter(|e| e.as_message().is_some())
            .count();
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_non_member_cannot_send() {
        let Fixture { service, u1, u2, u3, .. } = fixture();
        let room = service.get_or_create_room(NS, &u1, &[u2.clone()]).await.unwrap();

        assert!(matches!(
            service.send(NS, &room.thread, &u3, "intrude", None).await,
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            service.send(NS, &room.thread, &u1, "", None).await,
            Err(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_start_session() {
        let Fixture { service, directory, u1, u2, u3 } = fixture();

        assert!(matches!(
            service.start_session(NS, &u1, None).await,
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            service.start_session(NS, &u1, Some(&UserId::from(99))).await,
            Err(ChatError::NotFound(_))
        ));

        let session = service.start_session(NS, &u1, Some(&u2)).await.unwrap();
        let again = service.start_session(NS, &u2, Some(&u1)).await.unwrap();
        assert_eq!(session.thread_id, again.thread_id);
        assert_eq!(session.members[0].id, u1);
        assert_eq!(session.members[1].id, u2);

        directory.set_friends(u1.clone(), vec![u2.clone()]);
        let strict = service.clone().with_policy(Arc::new(FriendsOnly::new(directory)));
        assert!(matches!(
            strict.start_session(NS, &u1, Some(&u3)).await,
            Err(ChatError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_history_is_member_only() {
        let Fixture { service, u1, u2, u3, .. } = fixture();
        let room = service.get_or_create_room(NS, &u1, &[u2.clone()]).await.unwrap();
        service.send(NS, &room.thread, &u1, "one", None).await.unwrap();
        service.send(NS, &room.thread, &u2, "two", None).await.unwrap();

        let history = service.history(NS, &room.thread, &u2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event.as_message().unwrap().text, "two");
        assert_eq!(history[1].sender, u1);

        assert!(matches!(
            service.history(NS, &room.thread, &u3).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_friends_presence_follows_backlog() {
        let Fixture { service, u1, u2, .. } = fixture();
        let room = service.get_or_create_room(NS, &u1, &[u2.clone()]).await.unwrap();
        // Three sends leave u2 with three presence events and three
        // messages, over the threshold; u3 only gets the presence events.
        for i in 0..3 {
            service
                .send(NS, &room.thread, &u1, &format!("m{i}"), None)
                .await
                .unwrap();
        }

        let stanzas = service.friends_presence(NS, &u1).await.unwrap();
        let two = stanzas.iter().find(|s| s.entity.id == u2).unwrap();
        assert!(!two.available);
        let three = stanzas.iter().find(|s| s.entity.id == UserId::from(3)).unwrap();
        assert!(three.available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_announces_and_delivers() {
        let Fixture { service, u1, u2, .. } = fixture();

        let stream = service.stream(NS, &u1).await.unwrap();
        tokio::pin!(stream);

        let announced = drain(&service, &u2);
        assert_eq!(announced.len(), 1);
        assert!(announced[0].as_presence().unwrap().available);

        let room = service.get_or_create_room(NS, &u2, &[u1.clone()]).await.unwrap();
        service.send(NS, &room.thread, &u2, "hello", None).await.unwrap();

        // u2's own presence broadcast reaches u1 before the message.
        assert_eq!(next_message(&mut stream).await.text, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_flow() {
        let Fixture { service, u1, u2, .. } = fixture();

        assert!(matches!(
            service.stream_via_token("garbage").await,
            Err(ChatError::NotFound(_))
        ));

        let token = service.issue_token(NS, &u1).await.unwrap();
        let stream = service.stream_via_token(&token).await.unwrap();
        tokio::pin!(stream);

        let room = service.get_or_create_room(NS, &u1, &[u2.clone()]).await.unwrap();
        service.send(NS, &room.thread, &u2, "via token", None).await.unwrap();

        let message = next_message(&mut stream).await;
        assert_eq!(message.text, "via token");
        assert_eq!(message.sender.id, u2);
    }
}
