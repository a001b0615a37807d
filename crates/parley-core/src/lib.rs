//! # parley-core
//!
//! Presence and message routing for the Parley chat engine.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Mailbox** - Per-user FIFO queue of pending events
//! - **Registry** - Namespaced map of user mailboxes, created lazily
//! - **Presence** - Online/offline inferred from mailbox backlog
//! - **Room** - Exact-membership room resolution
//! - **Streamer** - Live stream of a mailbox with idle keep-alives
//! - **Token** - Short-lived stream tokens over an expiring store
//! - **Chat** - The service object tying them together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ ChatService │────▶│  Registry   │────▶│   Mailbox   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   ▲                   │
//!        ▼                   │                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │RoomResolver │     │  Presence   │     │  Streamer   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod chat;
pub mod directory;
pub mod error;
pub mod mailbox;
pub mod presence;
pub mod registry;
pub mod room;
pub mod store;
pub mod streamer;
pub mod token;

pub use chat::{ChatConfig, ChatService, Session};
pub use directory::{AllowAll, ChatPolicy, FriendsOnly, MemoryDirectory, UserDirectory};
pub use error::{ChatError, ChatResult, StoreError};
pub use mailbox::Mailbox;
pub use presence::PresenceTracker;
pub use registry::{Namespace, Registry, RegistryConfig, RegistryStats};
pub use room::{Member, MembershipKey, Role, Room, RoomResolver};
pub use store::{MemoryRoomStore, RoomStore, StoredMessage};
pub use streamer::EventStreamer;
pub use token::{ExpiringStore, MemoryExpiringStore, TokenGrant, TokenStore};
