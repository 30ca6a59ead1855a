/// Conversion of inbound payloads into canonical records.
///
/// Everything here is a pure transform. Anything that cannot yield a message
/// with a real id and a server timestamp is rejected with a [`DecodeError`]
/// instead of being patched up with placeholders, since a guessed timestamp
/// would corrupt ordering.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use convo_types::events::{
    AttachmentPayload, HistoryPageItem, LiveMessageEvent, OutboundIntent, SeenReceipt, SendKind,
    SendPayload,
};
use convo_types::{Attachment, ConversationId, Message, SeenPatch, UserId};

use crate::error::{DecodeError, StoreError};

/// Where a message sighting came from. Live sightings are authoritative
/// for every field; history sightings only ever add information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    History,
    Live,
}

fn decode<T: DeserializeOwned>(kind: &'static str, value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|source| DecodeError::Shape { kind, source })
}

fn required<T>(kind: &'static str, field: &'static str, value: Option<T>) -> Result<T, DecodeError> {
    value.ok_or(DecodeError::MissingField { kind, field })
}

fn user_set(ids: Option<Vec<String>>) -> BTreeSet<UserId> {
    ids.unwrap_or_default().into_iter().map(UserId::from).collect()
}

fn attachment_from(payload: AttachmentPayload, fallback_id: Option<String>) -> Attachment {
    Attachment {
        id: payload.id.or(fallback_id).unwrap_or_default(),
        url: payload.url,
        mime_type: payload.mime_type.unwrap_or_default(),
    }
}

/// Decode one element of a history page. Items without a `conversationId`
/// belong to the conversation the page was requested for.
pub fn history_item(value: Value, conversation_id: &ConversationId) -> Result<Message, DecodeError> {
    const KIND: &str = "history item";
    let item: HistoryPageItem = decode(KIND, value)?;

    let id = required(KIND, "_id", item.id)?;
    let created_at: DateTime<Utc> = required(KIND, "createdAt", item.created_at)?;
    let sender_id = required(KIND, "senderId", item.sender_id)?;

    // A populated attachment without its id is still renderable; an id without
    // the populated document is not.
    let attachment = item
        .attachment
        .map(|payload| attachment_from(payload, item.attachment_id));

    Ok(Message {
        id: id.into(),
        conversation_id: item
            .conversation_id
            .map(ConversationId::from)
            .unwrap_or_else(|| conversation_id.clone()),
        sender_id: sender_id.into(),
        text: item.content,
        attachment,
        created_at,
        seen_by: user_set(item.seen_by),
        seen_by_usernames: item.seen_by_usernames.unwrap_or_default().into_iter().collect(),
    })
}

/// Decode a `message-from-server` event.
pub fn live_message(value: Value) -> Result<Message, DecodeError> {
    const KIND: &str = "live message";
    let event: LiveMessageEvent = decode(KIND, value)?;

    let id = required(KIND, "id", event.id)?;
    let created_at = required(KIND, "createdAt", event.created_at)?;
    let conversation_id = required(KIND, "conversationId", event.conversation_id)?;
    let sender = required(KIND, "sender", event.sender)?;

    // Prefer `text`, fall back to `message`. The chosen body is kept verbatim.
    let text = match event.text {
        Some(text) if !text.is_empty() => Some(text),
        _ => event.message,
    };

    Ok(Message {
        id: id.into(),
        conversation_id: conversation_id.into(),
        sender_id: sender.into(),
        text,
        attachment: event.attachment.map(|payload| attachment_from(payload, None)),
        created_at,
        seen_by: user_set(event.seen_by),
        seen_by_usernames: event.seen_by_usernames.unwrap_or_default().into_iter().collect(),
    })
}

/// Decode a `message-seen` receipt. The conversation is only present when
/// the backend scopes the receipt.
pub fn seen_receipt(value: Value) -> Result<(SeenPatch, Option<ConversationId>), DecodeError> {
    let receipt: SeenReceipt = decode("seen receipt", value)?;
    let patch = SeenPatch {
        message_id: receipt.message_id.into(),
        user_id: receipt.user_id.into(),
        username: receipt.username,
    };
    Ok((patch, receipt.conversation_id.map(ConversationId::from)))
}

// -- Optimistic sends --

/// What the user typed or attached.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
}

/// A message shown locally before the server echoes it back.
///
/// It never enters an ordered set: the backend does not echo client ids, so
/// the only link to the eventual live message is the body it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticSend {
    pub local_id: Uuid,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub queued_at: DateTime<Utc>,
}

impl OptimisticSend {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        draft: Draft,
    ) -> Result<Self, StoreError> {
        let text = draft.text.unwrap_or_default();
        if text.trim().is_empty() && draft.attachment.is_none() {
            return Err(StoreError::EmptyMessage);
        }
        Ok(Self {
            local_id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            text,
            attachment: draft.attachment,
            queued_at: Utc::now(),
        })
    }

    pub fn to_intent(&self) -> OutboundIntent {
        OutboundIntent::Send(SendPayload {
            message: self.text.clone(),
            conversation_id: self.conversation_id.clone(),
            kind: if self.attachment.is_some() {
                SendKind::File
            } else {
                SendKind::Text
            },
            attachment_id: self.attachment.as_ref().map(|a| a.id.clone()),
        })
    }

    /// Whether `message` is the server's echo of this send.
    pub fn matches_echo(&self, message: &Message) -> bool {
        if message.conversation_id != self.conversation_id || message.sender_id != self.sender_id {
            return false;
        }
        if message.body().unwrap_or_default() != self.text {
            return false;
        }
        match (&self.attachment, &message.attachment) {
            (None, _) => true,
            (Some(mine), Some(theirs)) => mine.id == theirs.id,
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conv() -> ConversationId {
        ConversationId::from("c1")
    }

    #[test]
    fn history_item_maps_server_fields() {
        let msg = history_item(
            json!({
                "_id": "m1",
                "senderId": "u1",
                "content": "hola",
                "createdAt": "2024-05-01T10:00:00Z",
                "seenBy": ["u2"],
                "attachmentId": "a1",
                "attachment": {"url": "https://cdn/a1.png", "type": "image/png"}
            }),
            &conv(),
        )
        .unwrap();

        assert_eq!(msg.id.as_str(), "m1");
        assert_eq!(msg.conversation_id, conv());
        assert_eq!(msg.text.as_deref(), Some("hola"));
        assert!(msg.is_seen_by(&"u2".into()));
        let attachment = msg.attachment.unwrap();
        assert_eq!(attachment.id, "a1");
        assert!(attachment.is_image());
    }

    #[test]
    fn history_item_defaults_seen_by_to_empty() {
        let msg = history_item(
            json!({"_id": "m1", "senderId": "u1", "createdAt": "2024-05-01T10:00:00Z"}),
            &conv(),
        )
        .unwrap();
        assert!(msg.seen_by.is_empty());
        assert!(msg.text.is_none());
    }

    #[test]
    fn missing_id_or_timestamp_is_rejected() {
        let no_id = history_item(
            json!({"senderId": "u1", "createdAt": "2024-05-01T10:00:00Z"}),
            &conv(),
        );
        assert!(matches!(
            no_id,
            Err(DecodeError::MissingField { field: "_id", .. })
        ));

        let no_ts = live_message(json!({"id": "m1", "conversationId": "c1", "sender": "u1"}));
        assert!(matches!(
            no_ts,
            Err(DecodeError::MissingField { field: "createdAt", .. })
        ));

        let bad_ts = live_message(json!({
            "id": "m1", "conversationId": "c1", "sender": "u1", "createdAt": "yesterday"
        }));
        assert!(matches!(bad_ts, Err(DecodeError::Shape { .. })));
    }

    #[test]
    fn live_message_accepts_either_body_field() {
        let with_text = live_message(json!({
            "id": "m1", "conversationId": "c1", "sender": "u1",
            "createdAt": "2024-05-01T10:00:00Z", "text": "a"
        }))
        .unwrap();
        assert_eq!(with_text.text.as_deref(), Some("a"));

        let with_message = live_message(json!({
            "id": "m2", "conversationId": "c1", "sender": "u1",
            "createdAt": "2024-05-01T10:00:00Z", "message": "  b  "
        }))
        .unwrap();
        assert_eq!(with_message.text.as_deref(), Some("  b  "));
    }

    #[test]
    fn seen_receipt_passes_through() {
        let (patch, conversation) =
            seen_receipt(json!({"messageId": "m1", "userId": "u2", "username": "ana"})).unwrap();
        assert_eq!(patch.message_id.as_str(), "m1");
        assert_eq!(patch.username.as_deref(), Some("ana"));
        assert!(conversation.is_none());
    }

    #[test]
    fn blank_draft_is_refused() {
        let draft = Draft {
            text: Some("   ".into()),
            attachment: None,
        };
        assert!(matches!(
            OptimisticSend::new(conv(), "me".into(), draft),
            Err(StoreError::EmptyMessage)
        ));
    }

    #[test]
    fn optimistic_send_matches_its_echo() {
        let pending = OptimisticSend::new(
            conv(),
            "me".into(),
            Draft {
                text: Some("hi".into()),
                attachment: None,
            },
        )
        .unwrap();

        let echo = live_message(json!({
            "id": "m9", "conversationId": "c1", "sender": "me",
            "createdAt": "2024-05-01T10:00:00Z", "message": "hi"
        }))
        .unwrap();
        assert!(pending.matches_echo(&echo));

        let other = Message {
            sender_id: "someone".into(),
            ..echo
        };
        assert!(!pending.matches_echo(&other));
    }
}
