//! Identities as they appear on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `objectType` emitted for every user profile.
pub const USER_OBJECT_TYPE: &str = "chat.user";

/// Opaque participant identifier.
///
/// Callers may key users by integer database ids or by string handles; both
/// serialize untagged so a profile's `id` is a plain JSON number or string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    /// Numeric identifier.
    Int(i64),
    /// Textual identifier.
    Name(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Int(id) => write!(f, "{id}"),
            UserId::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId::Int(id)
    }
}

impl From<&str> for UserId {
    fn from(name: &str) -> Self {
        UserId::Name(name.to_string())
    }
}

impl From<String> for UserId {
    fn from(name: String) -> Self {
        UserId::Name(name)
    }
}

impl FromStr for UserId {
    type Err = std::convert::Infallible;

    /// Digits parse as [`UserId::Int`], anything else is kept as a name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<i64>()
            .map(UserId::Int)
            .unwrap_or_else(|_| UserId::Name(s.to_string())))
    }
}

/// Public projection of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub url: Option<String>,
    pub object_type: String,
    pub id: UserId,
    pub display_name: String,
}

impl Profile {
    /// Create a profile with no url.
    #[must_use]
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            url: None,
            object_type: USER_OBJECT_TYPE.to_string(),
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Attach a profile url.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}
