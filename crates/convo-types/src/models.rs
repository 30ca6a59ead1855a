use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Server-assigned message id. Never generated on the client.
    MessageId
);
string_id!(UserId);
string_id!(ConversationId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub url: String,
    pub mime_type: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image")
    }
}

/// Canonical chat message, whatever source it was first observed from.
///
/// Ordering within a conversation is `(created_at, id)`; see [`Message::order_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    /// Grows monotonically; entries are never removed.
    pub seen_by: BTreeSet<UserId>,
    /// Display names of acknowledgers, falling back to the user id when a
    /// receipt carried no username.
    pub seen_by_usernames: BTreeSet<String>,
}

impl Message {
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id.clone())
    }

    pub fn is_seen_by(&self, user_id: &UserId) -> bool {
        self.seen_by.contains(user_id)
    }

    /// Message body, treating an empty string as absent.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.is_empty())
    }
}

/// A single "user X has seen message Y" fact, ready to be unioned into a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenPatch {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub username: Option<String>,
}

/// Sidebar projection of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub display_name: String,
    /// At most three entries, in member order.
    pub avatar_refs: Vec<String>,
    pub preview_text: String,
    pub last_activity_at: DateTime<Utc>,
    pub unread_count: u32,
    pub is_group: bool,
}
