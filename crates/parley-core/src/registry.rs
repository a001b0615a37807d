//! Namespaced registry of user mailboxes.
//!
//! The registry is the only shared mutable state of the engine. Mailboxes
//! are created lazily, exactly once per (namespace, user) pair.

use crate::mailbox::Mailbox;
use dashmap::DashMap;
use parley_protocol::{Event, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// An isolation key (tenant or datastore).
pub type Namespace = String;

/// Registry configuration.
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Backlog bound applied to new mailboxes. `None` keeps them unbounded.
    pub max_backlog: Option<usize>,
}

/// The central mailbox registry.
pub struct Registry {
    /// Mailboxes indexed by namespace, then user.
    namespaces: DashMap<Namespace, DashMap<UserId, Arc<Mailbox>>>,
    /// Configuration.
    config: RegistryConfig,
}

impl Registry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating mailbox registry with config: {:?}", config);
        Self {
            namespaces: DashMap::new(),
            config,
        }
    }

    /// Get the mailbox for a user, creating it on first reference.
    ///
    /// Repeated calls with the same key return the same mailbox.
    pub fn mailbox(&self, namespace: &str, user: &UserId) -> Arc<Mailbox> {
        if let Some(users) = self.namespaces.get(namespace) {
            if let Some(mailbox) = users.get(user) {
                return mailbox.clone();
            }
        }

        let users = self.namespaces.entry(namespace.to_string()).or_default();
        let mailbox = users
            .entry(user.clone())
            .or_insert_with(|| {
                debug!(namespace = %namespace, user = %user, "Creating mailbox");
                Arc::new(match self.config.max_backlog {
                    Some(capacity) => Mailbox::bounded(capacity),
                    None => Mailbox::new(),
                })
            })
            .clone();
        mailbox
    }

    /// Append an event to a user's mailbox.
    pub fn publish(&self, namespace: &str, user: &UserId, event: Arc<Event>) {
        let kind = event.kind();
        self.mailbox(namespace, user).publish(event);
        trace!(namespace = %namespace, user = %user, kind, "Published event");
    }

    /// Publish one event into several mailboxes.
    ///
    /// Returns the number of recipients.
    pub fn publish_many<'a>(
        &self,
        namespace: &str,
        users: impl IntoIterator<Item = &'a UserId>,
        event: Arc<Event>,
    ) -> usize {
        let mut count = 0;
        for user in users {
            self.publish(namespace, user, event.clone());
            count += 1;
        }
        count
    }

    /// Number of events waiting for a user.
    #[must_use]
    pub fn backlog_size(&self, namespace: &str, user: &UserId) -> usize {
        self.mailbox(namespace, user).len()
    }

    /// Remove the oldest event for a user, waiting up to `timeout`.
    pub async fn take_blocking(
        &self,
        namespace: &str,
        user: &UserId,
        timeout: Duration,
    ) -> Option<Arc<Event>> {
        let mailbox = self.mailbox(namespace, user);
        mailbox.take(timeout).await
    }

    /// Check if a mailbox exists without creating it.
    #[must_use]
    pub fn contains(&self, namespace: &str, user: &UserId) -> bool {
        self.namespaces
            .get(namespace)
            .is_some_and(|users| users.contains_key(user))
    }

    /// Get all namespace names.
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.iter().map(|e| e.key().clone()).collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            namespace_count: self.namespaces.len(),
            ..RegistryStats::default()
        };
        for users in self.namespaces.iter() {
            stats.mailbox_count += users.len();
            stats.total_backlog += users.iter().map(|m| m.value().len()).sum::<usize>();
        }
        stats
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Number of namespaces with at least one mailbox.
    pub namespace_count: usize,
    /// Number of mailboxes.
    pub mailbox_count: usize,
    /// Events waiting across all mailboxes.
    pub total_backlog: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{PresenceStanza, Profile};

    fn presence(id: i64) -> Arc<Event> {
        Arc::new(Event::presence(PresenceStanza::new(
            Profile::new(id, "someone"),
            true,
        )))
    }

    #[test]
    fn test_registry_mailbox_identity() {
        let registry = Registry::new();
        let alice = UserId::from(1);

        let a = registry.mailbox("db1", &alice);
        let b = registry.mailbox("db1", &alice);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.stats().mailbox_count, 1);
    }

    #[test]
    fn test_registry_namespace_isolation() {
        let registry = Registry::new();
        let alice = UserId::from(1);

        registry.publish("db1", &alice, presence(2));
        assert_eq!(registry.backlog_size("db1", &alice), 1);
        assert_eq!(registry.backlog_size("db2", &alice), 0);
        assert!(!Arc::ptr_eq(
            &registry.mailbox("db1", &alice),
            &registry.mailbox("db2", &alice)
        ));
    }

    #[test]
    fn test_registry_contains_does_not_create() {
        let registry = Registry::new();
        let alice = UserId::from("alice");

        assert!(!registry.contains("db", &alice));
        assert_eq!(registry.stats().mailbox_count, 0);
        registry.mailbox("db", &alice);
        assert!(registry.contains("db", &alice));
    }

    #[test]
    fn test_registry_publish_many() {
        let registry = Registry::new();
        let peers = [UserId::from(2), UserId::from(3)];

        let count = registry.publish_many("db", &peers, presence(1));
        assert_eq!(count, 2);
        assert_eq!(registry.backlog_size("db", &peers[0]), 1);
        assert_eq!(registry.backlog_size("db", &peers[1]), 1);
    }

    #[test]
    fn test_registry_max_backlog() {
        let registry = Registry::with_config(RegistryConfig {
            max_backlog: Some(3),
        });
        let alice = UserId::from(1);

        for i in 0..10 {
            registry.publish("db", &alice, presence(i));
        }
        assert_eq!(registry.backlog_size("db", &alice), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_take_blocking() {
        let registry = Registry::new();
        let alice = UserId::from(1);

        assert!(registry
            .take_blocking("db", &alice, Duration::from_secs(5))
            .await
            .is_none());

        registry.publish("db", &alice, presence(9));
        let event = registry
            .take_blocking("db", &alice, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(event.kind(), "presence");
        assert_eq!(registry.backlog_size("db", &alice), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registry_concurrent_get_or_create() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.mailbox("db", &UserId::from(7)) })
            })
            .collect();

        let mut mailboxes = Vec::new();
        for handle in handles {
            mailboxes.push(handle.await.unwrap());
        }
        assert!(mailboxes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.stats().mailbox_count, 1);
    }

    #[test]
    fn test_registry_stats() {
        let registry = Registry::new();
        registry.publish("db1", &UserId::from(1), presence(2));
        registry.publish("db1", &UserId::from(2), presence(1));
        registry.publish("db2", &UserId::from(1), presence(2));

        let stats = registry.stats();
        assert_eq!(stats.namespace_count, 2);
        assert_eq!(stats.mailbox_count, 3);
        assert_eq!(stats.total_backlog, 3);
    }
}
