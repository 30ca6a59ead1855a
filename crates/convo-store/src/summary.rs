use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};

use tracing::debug;

use convo_types::api::{ConversationRecord, UserProfile};
use convo_types::{ConversationId, ConversationSummary, Message, MessageId, UserId};

use crate::config::{MAX_AVATAR_REFS, RECENT_LIVE_IDS, StoreConfig};

/// Build the sidebar entry for a conversation list record.
///
/// `peer` is the profile of the other member of a 1:1 conversation. Groups
/// keep their own name and image; without an image they show one default
/// avatar per leading member.
pub fn summary_from_record(
    record: &ConversationRecord,
    peer: Option<&UserProfile>,
    config: &StoreConfig,
) -> ConversationSummary {
    let (display_name, avatar_refs) = if record.is_group {
        let avatars = match record.image.as_deref().filter(|image| !image.is_empty()) {
            Some(image) => vec![image.to_string()],
            None => record
                .members
                .iter()
                .take(MAX_AVATAR_REFS)
                .map(|_| config.default_avatar.clone())
                .collect(),
        };
        (record.name.clone(), avatars)
    } else {
        match peer {
            Some(profile) => (
                profile.username.clone(),
                vec![
                    profile
                        .media_id
                        .clone()
                        .unwrap_or_else(|| config.default_avatar.clone()),
                ],
            ),
            None => (record.name.clone(), vec![config.default_avatar.clone()]),
        }
    };

    ConversationSummary {
        conversation_id: record.id.as_str().into(),
        display_name,
        avatar_refs,
        preview_text: record
            .last_message_id
            .as_ref()
            .and_then(|last| last.content())
            .map(str::to_string)
            .unwrap_or_else(|| config.empty_preview.clone()),
        last_activity_at: record.updated_at,
        unread_count: record.unread_count.unwrap_or(0),
        is_group: record.is_group,
    }
}

/// Whether a live message bumped the unread counter of its conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadChange {
    Incremented(u32),
    Unchanged,
    /// The message was already projected; the summary was left alone.
    Repeated,
}

/// Sidebar state for every conversation the viewer belongs to, fed by the
/// same live stream as the open conversation.
pub struct SummaryProjector {
    viewer: UserId,
    attachment_placeholder: String,
    open: Option<ConversationId>,
    summaries: HashMap<ConversationId, ConversationSummary>,
    recent: HashMap<ConversationId, VecDeque<MessageId>>,
}

impl SummaryProjector {
    pub fn new(viewer: UserId, config: &StoreConfig) -> Self {
        Self {
            viewer,
            attachment_placeholder: config.attachment_placeholder.clone(),
            open: None,
            summaries: HashMap::new(),
            recent: HashMap::new(),
        }
    }

    /// Load (or reload) summaries from the conversation list. A reload keeps
    /// live-derived activity that is newer than the record.
    pub fn seed(&mut self, summaries: impl IntoIterator<Item = ConversationSummary>) {
        for mut incoming in summaries {
            incoming.avatar_refs.truncate(MAX_AVATAR_REFS);
            if self.open.as_ref() == Some(&incoming.conversation_id) {
                incoming.unread_count = 0;
            }
            match self.summaries.get_mut(&incoming.conversation_id) {
                Some(existing) => {
                    existing.display_name = incoming.display_name;
                    existing.avatar_refs = incoming.avatar_refs;
                    existing.is_group = incoming.is_group;
                    if incoming.last_activity_at > existing.last_activity_at {
                        existing.preview_text = incoming.preview_text;
                        existing.last_activity_at = incoming.last_activity_at;
                        existing.unread_count = incoming.unread_count;
                    }
                }
                None => {
                    self.summaries
                        .insert(incoming.conversation_id.clone(), incoming);
                }
            }
        }
    }

    pub fn open_conversation(&self) -> Option<&ConversationId> {
        self.open.as_ref()
    }

    /// Mark a conversation as the open one; its unread counter drops to zero.
    pub fn open(&mut self, conversation_id: ConversationId) {
        if let Some(summary) = self.summaries.get_mut(&conversation_id) {
            summary.unread_count = 0;
        }
        self.open = Some(conversation_id);
    }

    pub fn close(&mut self) {
        self.open = None;
    }

    fn preview_for(&self, message: &Message) -> String {
        match (message.body(), &message.attachment) {
            (Some(body), _) => body.to_string(),
            (None, Some(_)) => self.attachment_placeholder.clone(),
            (None, None) => String::new(),
        }
    }

    /// Project one live message onto its conversation's summary.
    pub fn on_live_message(&mut self, message: &Message) -> UnreadChange {
        let recent = self.recent.entry(message.conversation_id.clone()).or_default();
        if recent.contains(&message.id) {
            debug!(message_id = %message.id, "Live message already projected");
            return UnreadChange::Repeated;
        }
        if recent.len() == RECENT_LIVE_IDS {
            recent.pop_front();
        }
        recent.push_back(message.id.clone());

        let preview = self.preview_for(message);
        let counts_as_unread =
            self.open.as_ref() != Some(&message.conversation_id) && message.sender_id != self.viewer;

        let summary = self
            .summaries
            .entry(message.conversation_id.clone())
            .or_insert_with(|| {
                debug!(conversation_id = %message.conversation_id, "Live message for unlisted conversation");
                ConversationSummary {
                    conversation_id: message.conversation_id.clone(),
                    display_name: message.conversation_id.to_string(),
                    avatar_refs: Vec::new(),
                    preview_text: String::new(),
                    last_activity_at: message.created_at,
                    unread_count: 0,
                    is_group: false,
                }
            });

        summary.preview_text = preview;
        summary.last_activity_at = message.created_at;
        if counts_as_unread {
            summary.unread_count += 1;
            UnreadChange::Incremented(summary.unread_count)
        } else {
            UnreadChange::Unchanged
        }
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<&ConversationSummary> {
        self.summaries.get(conversation_id)
    }

    /// Summaries by most recent activity, ties broken by conversation id.
    pub fn summaries(&self) -> Vec<ConversationSummary> {
        let mut list: Vec<ConversationSummary> = self.summaries.values().cloned().collect();
        list.sort_by(|a, b| {
            Reverse(a.last_activity_at)
                .cmp(&Reverse(b.last_activity_at))
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        list
    }

    pub fn total_unread(&self) -> u32 {
        self.summaries.values().map(|s| s.unread_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use convo_types::Attachment;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    fn summary(id: &str, minute: u32) -> ConversationSummary {
        ConversationSummary {
            conversation_id: id.into(),
            display_name: id.to_uppercase(),
            avatar_refs: vec![],
            preview_text: String::new(),
            last_activity_at: at(minute),
            unread_count: 0,
            is_group: false,
        }
    }

    fn live(conversation: &str, sender: &str, minute: u32) -> Message {
        Message {
            id: format!("{}-{}", conversation, minute).into(),
            conversation_id: conversation.into(),
            sender_id: sender.into(),
            text: Some("hey".into()),
            attachment: None,
            created_at: at(minute),
            seen_by: BTreeSet::new(),
            seen_by_usernames: BTreeSet::new(),
        }
    }

    fn projector() -> SummaryProjector {
        let mut p = SummaryProjector::new("me".into(), &StoreConfig::default());
        p.seed([summary("a", 0), summary("b", 1)]);
        p
    }

    #[test]
    fn counts_unread_only_for_closed_conversations_from_others() {
        let mut p = projector();
        p.open("a".into());

        assert_eq!(p.on_live_message(&live("b", "u2", 5)), UnreadChange::Incremented(1));
        assert_eq!(p.on_live_message(&live("a", "u2", 6)), UnreadChange::Unchanged);
        assert_eq!(p.on_live_message(&live("b", "me", 7)), UnreadChange::Unchanged);

        assert_eq!(p.get(&"a".into()).unwrap().unread_count, 0);
        assert_eq!(p.get(&"b".into()).unwrap().unread_count, 1);

        p.open("b".into());
        assert_eq!(p.get(&"b".into()).unwrap().unread_count, 0);
    }

    #[test]
    fn redelivered_message_is_projected_once() {
        let mut p = projector();
        let m = live("b", "u2", 5);
        assert_eq!(p.on_live_message(&m), UnreadChange::Incremented(1));

        let mut later = live("b", "u2", 6);
        later.text = Some("newer".into());
        p.on_live_message(&later);
        assert_eq!(p.on_live_message(&m), UnreadChange::Repeated);

        let s = p.get(&"b".into()).unwrap();
        assert_eq!(s.unread_count, 2);
        assert_eq!(s.preview_text, "newer");
        assert_eq!(s.last_activity_at, at(6));
    }

    #[test]
    fn preview_uses_placeholder_for_attachments() {
        let mut p = projector();
        let mut m = live("a", "u2", 3);
        m.text = Some(String::new());
        m.attachment = Some(Attachment {
            id: "f1".into(),
            url: "https://cdn/f1.pdf".into(),
            mime_type: "application/pdf".into(),
        });
        p.on_live_message(&m);
        let s = p.get(&"a".into()).unwrap();
        assert_eq!(s.preview_text, "Attachment");
        assert_eq!(s.last_activity_at, at(3));
    }

    #[test]
    fn sorted_by_activity_then_id() {
        let mut p = projector();
        p.seed([summary("c", 1)]);
        let ids: Vec<String> = p
            .summaries()
            .into_iter()
            .map(|s| s.conversation_id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        p.on_live_message(&live("a", "u2", 9));
        assert_eq!(p.summaries()[0].conversation_id.as_str(), "a");
    }

    #[test]
    fn unlisted_conversation_gets_a_summary() {
        let mut p = projector();
        p.on_live_message(&live("z", "u2", 2));
        assert_eq!(p.get(&"z".into()).unwrap().unread_count, 1);
        assert_eq!(p.total_unread(), 1);
    }

    #[test]
    fn record_for_direct_conversation_uses_peer_profile() {
        let record: ConversationRecord = serde_json::from_value(json!({
            "_id": "c1",
            "isGroup": false,
            "name": "",
            "members": [{"userId": "me"}, {"userId": "u2"}],
            "lastMessageId": {"content": "see you"},
            "updatedAt": "2024-05-01T10:00:00Z",
            "unreadCount": 2
        }))
        .unwrap();
        let peer = UserProfile {
            id: Some("u2".into()),
            username: "ana".into(),
            media_id: None,
        };
        let s = summary_from_record(&record, Some(&peer), &StoreConfig::default());
        assert_eq!(s.display_name, "ana");
        assert_eq!(s.avatar_refs, vec!["/avatars/default.jpg".to_string()]);
        assert_eq!(s.preview_text, "see you");
        assert_eq!(s.unread_count, 2);
    }

    #[test]
    fn group_record_caps_avatars() {
        let record: ConversationRecord = serde_json::from_value(json!({
            "_id": "g1",
            "isGroup": true,
            "name": "team",
            "members": [{"userId": "a"}, {"userId": "b"}, {"userId": "c"}, {"userId": "d"}],
            "lastMessageId": null,
            "updatedAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        let s = summary_from_record(&record, None, &StoreConfig::default());
        assert_eq!(s.display_name, "team");
        assert_eq!(s.avatar_refs.len(), 3);
        assert_eq!(s.preview_text, "No messages yet");
    }

    #[test]
    fn group_image_replaces_member_avatars() {
        let record: ConversationRecord = serde_json::from_value(json!({
            "_id": "g2",
            "isGroup": true,
            "name": "crew",
            "image": "https://cdn/crew.png",
            "members": [{"userId": "a"}, {"userId": "b"}],
            "updatedAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        let s = summary_from_record(&record, None, &StoreConfig::default());
        assert_eq!(s.avatar_refs, vec!["https://cdn/crew.png".to_string()]);
    }
}
