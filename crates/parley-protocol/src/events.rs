//! Event payloads delivered through a user's mailbox.
//!
//! Every event carries a UTC timestamp and a `type` discriminator with a
//! kind-specific body:
//!
//! ```json
//! {"timestamp": "...", "type": "presence", "presence": {...}}
//! {"timestamp": "...", "type": "message", "message": {...}}
//! ```

use crate::entity::Profile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A room's thread identifier.
pub type ThreadId = String;

/// Message type used when the sender does not give one.
pub const DEFAULT_MESSAGE_TYPE: &str = "plain";

/// Language tag stamped on every message.
pub const DEFAULT_LANGUAGE: &str = "en_US";

/// `show` value of a presence stanza.
pub const SHOW_CHAT: &str = "chat";

/// Presence information about one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStanza {
    pub entity: Profile,
    pub show: String,
    pub status: Option<String>,
    pub available: bool,
}

impl PresenceStanza {
    /// Create a stanza for a user with the given availability.
    #[must_use]
    pub fn new(entity: Profile, available: bool) -> Self {
        Self {
            entity,
            show: SHOW_CHAT.to_string(),
            status: None,
            available,
        }
    }
}

/// A chat message addressed to every member of a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub subject: Option<String>,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub language: String,
    pub attachments: Vec<serde_json::Value>,
    pub id: Uuid,
    pub thread: ThreadId,
    pub sender: Profile,
    pub members: Vec<Profile>,
}

impl ChatMessage {
    /// Create a plain-text message with a fresh id.
    #[must_use]
    pub fn new(
        thread: impl Into<ThreadId>,
        sender: Profile,
        members: Vec<Profile>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            subject: None,
            text: text.into(),
            kind: DEFAULT_MESSAGE_TYPE.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            attachments: Vec::new(),
            id: Uuid::new_v4(),
            thread: thread.into(),
            sender,
            members,
        }
    }

    /// Override the message type.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

/// Kind-specific part of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventBody {
    Presence { presence: PresenceStanza },
    Message { message: ChatMessage },
}

/// An immutable event queued for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    /// Create a presence event stamped now.
    #[must_use]
    pub fn presence(presence: PresenceStanza) -> Self {
        Self {
            timestamp: Utc::now(),
            body: EventBody::Presence { presence },
        }
    }

    /// Create a message event stamped now.
    #[must_use]
    pub fn message(message: ChatMessage) -> Self {
        Self {
            timestamp: Utc::now(),
            body: EventBody::Message { message },
        }
    }

    /// The wire discriminator, `"presence"` or `"message"`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self.body {
            EventBody::Presence { .. } => "presence",
            EventBody::Message { .. } => "message",
        }
    }

    /// The message body, if this is a message event.
    #[must_use]
    pub fn as_message(&self) -> Option<&ChatMessage> {
        match &self.body {
            EventBody::Message { message } => Some(message),
            EventBody::Presence { .. } => None,
        }
    }

    /// The presence body, if this is a presence event.
    #[must_use]
    pub fn as_presence(&self) -> Option<&PresenceStanza> {
        match &self.body {
            EventBody::Presence { presence } => Some(presence),
            EventBody::Message { .. } => None,
        }
    }
}

/// One transmission unit of an event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A queued event.
    Event(Arc<Event>),
    /// Idle heartbeat, rendered as an empty JSON object.
    KeepAlive,
}

impl Frame {
    /// Wrap an event.
    #[must_use]
    pub fn event(event: impl Into<Arc<Event>>) -> Self {
        Frame::Event(event.into())
    }

    /// Whether this is a heartbeat.
    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        matches!(self, Frame::KeepAlive)
    }
}
