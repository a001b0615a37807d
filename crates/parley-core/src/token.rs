//! Short-lived stream tokens.
//!
//! Some stream clients cannot carry session credentials. They are handed an
//! opaque token that maps to the user for a fixed time-to-live. Expiry is
//! delegated to the backing [`ExpiringStore`]; tokens are written once and
//! never refreshed or revoked early.

use crate::error::{ChatError, ChatResult, StoreError};
use async_trait::async_trait;
use moka::future::Cache;
use parley_protocol::UserId;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Length of generated tokens.
pub const TOKEN_LENGTH: usize = 32;

/// Key prefix under which tokens are stored.
const KEY_PREFIX: &str = "parley:stream-token:";

/// External key-value store with built-in expiry.
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Store a value; it expires after [`ExpiringStore::ttl`].
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Read a value without touching its expiry.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Lifetime applied to every entry.
    fn ttl(&self) -> Duration;
}

/// In-memory [`ExpiringStore`] backed by a moka cache.
#[derive(Debug, Clone)]
pub struct MemoryExpiringStore {
    cache: Cache<String, String>,
    ttl: Duration,
}

impl MemoryExpiringStore {
    /// Create a store whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder().time_to_live(ttl).build();
        Self { cache, ttl }
    }
}

impl Default for MemoryExpiringStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

#[async_trait]
impl ExpiringStore for MemoryExpiringStore {
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.cache.insert(key.to_string(), value).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.cache.get(key).await)
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// What a token grants: streaming one user's mailbox in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub namespace: String,
    pub user: UserId,
}

/// Issues and resolves stream tokens.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn ExpiringStore>,
}

impl TokenStore {
    #[must_use]
    pub fn new(backend: Arc<dyn ExpiringStore>) -> Self {
        Self { backend }
    }

    /// Lifetime of issued tokens.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.backend.ttl()
    }

    /// Issue a fresh token for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the write.
    pub async fn issue_token(&self, namespace: &str, user: &UserId) -> ChatResult<String> {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();

        let grant = TokenGrant {
            namespace: namespace.to_string(),
            user: user.clone(),
        };
        let value =
            serde_json::to_string(&grant).map_err(|e| ChatError::Internal(e.to_string()))?;
        self.backend.put(&storage_key(&token), value).await?;

        debug!(namespace = %namespace, user = %user, ttl = ?self.ttl(), "Issued stream token");
        Ok(token)
    }

    /// Resolve a token to its grant.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotFound`] if the token is unknown or expired.
    pub async fn resolve_token(&self, token: &str) -> ChatResult<TokenGrant> {
        let raw = self
            .backend
            .get(&storage_key(token))
            .await?
            .ok_or_else(|| ChatError::NotFound("stream token".into()))?;

        serde_json::from_str(&raw).map_err(|e| ChatError::Internal(e.to_string()))
    }
}

fn storage_key(token: &str) -> String {
    format!("{KEY_PREFIX}{token}")
}
