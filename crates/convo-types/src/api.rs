use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Access token --

/// Claims read from the backend-issued access token. Only `id` is relied on;
/// the backend owns signature and expiry checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: String,
    pub username: Option<String>,
    pub exp: Option<usize>,
}

// -- Conversations --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub user_id: String,
    pub role: Option<String>,
}

/// `lastMessageId` is either a bare id or, when the backend populates it,
/// the message document itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LastMessageRef {
    Populated { content: Option<String> },
    Id(String),
}

impl LastMessageRef {
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Populated { content } => content.as_deref().filter(|c| !c.is_empty()),
            Self::Id(_) => None,
        }
    }
}

/// One entry of `conversation/user-conversations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub name: String,
    pub image: Option<String>,
    #[serde(default)]
    pub members: Vec<GroupMember>,
    pub last_message_id: Option<LastMessageRef>,
    pub updated_at: DateTime<Utc>,
    pub unread_count: Option<u32>,
}

impl ConversationRecord {
    /// For a 1:1 conversation, the member that is not `viewer_id`.
    pub fn other_member(&self, viewer_id: &str) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.user_id != viewer_id)
    }
}

// -- Users --

/// Response of `users/friend/id/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Option<String>,
    pub username: String,
    pub media_id: Option<String>,
}
