use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ConversationId, MessageId};

// -- Channel names --

/// Server -> client: a message was posted in a conversation the user belongs to.
pub const MESSAGE_FROM_SERVER: &str = "message-from-server";
/// Both directions: a message was seen (inbound receipt / outbound mark).
pub const MESSAGE_SEEN: &str = "message-seen";
/// Client -> server: post a message into a conversation.
pub const MESSAGE_FROM_CLIENT_PRIVATE: &str = "message-from-client-private";
/// Client -> server: start receiving room-scoped events for a conversation.
pub const JOIN_ROOM: &str = "join-room";

/// Inbound logical channels a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundChannel {
    LiveMessage,
    SeenReceipt,
}

impl InboundChannel {
    pub fn name(self) -> &'static str {
        match self {
            Self::LiveMessage => MESSAGE_FROM_SERVER,
            Self::SeenReceipt => MESSAGE_SEEN,
        }
    }
}

// -- Inbound payloads --

/// Attachment as the backend serializes it. `id` is absent on history items,
/// which carry it separately as `attachmentId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub id: Option<String>,
    pub url: String,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
}

/// One element of a `get-messages` page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPageItem {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub conversation_id: Option<String>,
    pub sender_id: Option<String>,
    pub content: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub seen_by: Option<Vec<String>>,
    pub seen_by_usernames: Option<Vec<String>>,
    pub attachment_id: Option<String>,
    pub attachment: Option<AttachmentPayload>,
}

/// A message pushed over `message-from-server`.
///
/// The backend has been observed to put the body in either `text` or
/// `message`; both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveMessageEvent {
    pub id: Option<String>,
    pub conversation_id: Option<String>,
    #[serde(alias = "senderId")]
    pub sender: Option<String>,
    pub text: Option<String>,
    pub message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub seen_by: Option<Vec<String>>,
    pub seen_by_usernames: Option<Vec<String>>,
    pub attachment: Option<AttachmentPayload>,
}

/// A receipt pushed over `message-seen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenReceipt {
    pub message_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub conversation_id: Option<String>,
}

// -- Outbound intents --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendKind {
    Text,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    pub message: String,
    pub conversation_id: ConversationId,
    #[serde(rename = "type")]
    pub kind: SendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSeenPayload {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
}

/// Fire-and-forget commands emitted towards the backend. None of them are
/// acknowledged; confirmation, if any, arrives later as an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundIntent {
    Send(SendPayload),
    MarkSeen(MarkSeenPayload),
    JoinRoom(ConversationId),
}

impl OutboundIntent {
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Send(_) => MESSAGE_FROM_CLIENT_PRIVATE,
            Self::MarkSeen(_) => MESSAGE_SEEN,
            Self::JoinRoom(_) => JOIN_ROOM,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        // Serializing these plain structs cannot fail.
        match self {
            Self::Send(payload) => serde_json::to_value(payload).unwrap_or_default(),
            Self::MarkSeen(payload) => serde_json::to_value(payload).unwrap_or_default(),
            Self::JoinRoom(conversation_id) => serde_json::Value::String(conversation_id.to_string()),
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::Send(payload) => &payload.conversation_id,
            Self::MarkSeen(payload) => &payload.conversation_id,
            Self::JoinRoom(conversation_id) => conversation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_payload_matches_backend_shape() {
        let intent = OutboundIntent::Send(SendPayload {
            message: "hola".into(),
            conversation_id: "c1".into(),
            kind: SendKind::Text,
            attachment_id: None,
        });
        assert_eq!(intent.channel(), MESSAGE_FROM_CLIENT_PRIVATE);
        assert_eq!(
            intent.payload(),
            json!({"message": "hola", "conversationId": "c1", "type": "text"})
        );
    }

    #[test]
    fn history_item_reads_mongo_field_names() {
        let item: HistoryPageItem = serde_json::from_value(json!({
            "_id": "m1",
            "senderId": "u1",
            "content": "hi",
            "createdAt": "2024-05-01T10:00:00Z",
            "attachmentId": "a1",
            "attachment": {"url": "https://cdn/a1.png", "type": "image/png"}
        }))
        .unwrap();
        assert_eq!(item.id.as_deref(), Some("m1"));
        assert_eq!(item.attachment_id.as_deref(), Some("a1"));
        assert!(item.seen_by.is_none());
    }

    #[test]
    fn live_event_accepts_sender_id_alias() {
        let event: LiveMessageEvent = serde_json::from_value(json!({
            "id": "m3",
            "senderId": "u2",
            "message": "body",
            "createdAt": "2024-05-01T10:02:00Z"
        }))
        .unwrap();
        assert_eq!(event.sender.as_deref(), Some("u2"));
        assert_eq!(event.message.as_deref(), Some("body"));
    }
}
