use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True for an empty or whitespace-only id.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identity of an app user.
    UserId
);
string_id!(ConversationId);
string_id!(MessageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Private,
}

/// A two-party private channel. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub created_at: DateTime<Utc>,
}

/// Membership of one identity in one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantLink {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

/// A single message. Field names on the wire follow the store's record shape
/// (`chat_id`, `content`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "chat_id")]
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[serde(rename = "content")]
    pub body: String,
    pub sent_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_from(&self, user_id: &UserId) -> bool {
        self.sender_id == *user_id
    }
}

pub const DEFAULT_LOCAL_STORAGE_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Per-identity local caching preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoragePreference {
    pub use_local_storage: bool,
    /// Drop the cached copy as soon as the store has confirmed the message.
    pub auto_delete_after_sync: bool,
    pub local_storage_timeout: Duration,
}

impl Default for StoragePreference {
    fn default() -> Self {
        Self {
            use_local_storage: true,
            auto_delete_after_sync: false,
            local_storage_timeout: DEFAULT_LOCAL_STORAGE_TIMEOUT,
        }
    }
}
