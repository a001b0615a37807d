//! Presence inferred from mailbox backlog.
//!
//! There is no connect/disconnect handshake. A connected streamer keeps its
//! mailbox drained; a user whose backlog grows past the threshold is
//! considered offline.

use crate::registry::Registry;
use parley_protocol::{Event, PresenceStanza, Profile, UserId};
use std::sync::Arc;
use tracing::debug;

/// Backlog above which a user is considered offline.
pub const DEFAULT_PRESENCE_THRESHOLD: usize = 5;

/// Computed presence view over the mailbox registry.
#[derive(Clone)]
pub struct PresenceTracker {
    registry: Arc<Registry>,
    threshold: usize,
}

impl PresenceTracker {
    /// Create a tracker with the default threshold.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_threshold(registry, DEFAULT_PRESENCE_THRESHOLD)
    }

    /// Create a tracker with a custom threshold.
    #[must_use]
    pub fn with_threshold(registry: Arc<Registry>, threshold: usize) -> Self {
        Self {
            registry,
            threshold,
        }
    }

    /// The configured threshold.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether the user's backlog is at or below the threshold.
    #[must_use]
    pub fn is_online(&self, namespace: &str, user: &UserId) -> bool {
        self.registry.backlog_size(namespace, user) <= self.threshold
    }

    /// Presence stanza for a user as of now.
    #[must_use]
    pub fn stanza(&self, namespace: &str, profile: Profile) -> PresenceStanza {
        let available = self.is_online(namespace, &profile.id);
        PresenceStanza::new(profile, available)
    }

    /// Publish one presence event for `profile` into every peer's mailbox.
    ///
    /// Returns the number of recipients.
    pub fn broadcast_presence(&self, namespace: &str, profile: Profile, peers: &[UserId]) -> usize {
        let user = profile.id.clone();
        let event = Arc::new(Event::presence(self.stanza(namespace, profile)));
        let available = event.as_presence().is_some_and(|p| p.available);

        let count = self.registry.publish_many(namespace, peers, event);
        debug!(namespace = %namespace, user = %user, available, recipients = count, "Broadcast presence");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Arc<Event> {
        Arc::new(Event::presence(PresenceStanza::new(
            Profile::new(9, "Peer"),
            true,
        )))
    }

    #[test]
    fn test_presence_threshold() {
        let registry = Arc::new(Registry::new());
        let tracker = PresenceTracker::new(registry.clone());
        let alice = UserId::from(1);

        assert!(tracker.is_online("db", &alice));
        for _ in 0..5 {
            registry.publish("db", &alice, event());
        }
        assert!(tracker.is_online("db", &alice));

        registry.publish("db", &alice, event());
        assert_eq!(registry.backlog_size("db", &alice), 6);
        assert!(!tracker.is_online("db", &alice));

        registry.mailbox("db", &alice).try_take();
        assert!(tracker.is_online("db", &alice));
    }

    #[test]
    fn test_custom_threshold() {
        let registry = Arc::new(Registry::new());
        let tracker = PresenceTracker::with_threshold(registry.clone(), 0);
        let alice = UserId::from(1);

        assert!(tracker.is_online("db", &alice));
        registry.publish("db", &alice, event());
        assert!(!tracker.is_online("db", &alice));
    }

    #[test]
    fn test_broadcast_presence() {
        let registry = Arc::new(Registry::new());
        let tracker = PresenceTracker::new(registry.clone());
        let peers = [UserId::from(2), UserId::from(3)];

        let count = tracker.broadcast_presence("db", Profile::new(1, "Alice"), &peers);
        assert_eq!(count, 2);

        for peer in &peers {
            let got = registry.mailbox("db", peer).try_take().unwrap();
            let stanza = got.as_presence().unwrap();
            assert_eq!(stanza.entity.id, UserId::from(1));
            assert_eq!(stanza.show, "chat");
            assert!(stanza.status.is_none());
            assert!(stanza.available);
        }
    }

    #[test]
    fn test_broadcast_reports_offline_sender() {
        let registry = Arc::new(Registry::new());
        let tracker = PresenceTracker::new(registry.clone());
        let alice = UserId::from(1);
        for _ in 0..6 {
            registry.publish("db", &alice, event());
        }

        tracker.broadcast_presence("db", Profile::new(1, "Alice"), &[UserId::from(2)]);
        let got = registry.mailbox("db", &UserId::from(2)).try_take().unwrap();
        assert!(!got.as_presence().unwrap().available);
    }
}
