use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use convo_types::events::OutboundIntent;
use convo_types::{ConversationId, ConversationSummary, Message, UserId};

use crate::config::StoreConfig;
use crate::cursor::{LoadState, PageRequest, PaginationCursor, RequestDecision};
use crate::error::{DecodeError, MergeOutcome, NetworkError, StoreError};
use crate::normalize::{self, Draft, OptimisticSend, Source};
use crate::ordered_set::OrderedMessageSet;
use crate::seen::{SeenOutcome, SeenReconciler};
use crate::summary::{SummaryProjector, UnreadChange};

/// Everything the store keeps for one conversation whose history has been touched.
pub struct ConversationState {
    messages: OrderedMessageSet,
    cursor: PaginationCursor,
    pending_sends: Vec<OptimisticSend>,
    last_error: Option<NetworkError>,
}

impl ConversationState {
    fn new(config: &StoreConfig) -> Self {
        Self {
            messages: OrderedMessageSet::with_config(config),
            cursor: PaginationCursor::new(config.page_size),
            pending_sends: Vec::new(),
            last_error: None,
        }
    }

    pub fn messages(&self) -> &OrderedMessageSet {
        &self.messages
    }

    pub fn cursor(&self) -> &PaginationCursor {
        &self.cursor
    }

    pub fn pending_sends(&self) -> &[OptimisticSend] {
        &self.pending_sends
    }

    pub fn last_error(&self) -> Option<&NetworkError> {
        self.last_error.as_ref()
    }

    fn retire_echoed_send(&mut self, echo: &Message) {
        if let Some(pos) = self.pending_sends.iter().position(|p| p.matches_echo(echo)) {
            let sent = self.pending_sends.remove(pos);
            debug!(local_id = %sent.local_id, message_id = %echo.id, "Optimistic send confirmed");
        }
    }
}

/// Proof that a history fetch was started for a conversation. Hand it back
/// with the response to [`ConversationStore::apply_history_page`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    pub conversation_id: ConversationId,
    pub request: PageRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryRequest {
    Started(HistoryTicket),
    AlreadyInFlight,
    NoMore,
}

impl HistoryRequest {
    pub fn ticket(self) -> Option<HistoryTicket> {
        match self {
            Self::Started(ticket) => Some(ticket),
            _ => None,
        }
    }
}

/// What applying a history response did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    Applied {
        inserted: usize,
        absorbed: usize,
        rejected: usize,
        intents: Vec<OutboundIntent>,
    },
    Exhausted,
    Failed,
    /// The request was abandoned (conversation switched); nothing was applied.
    Stale,
}

/// What applying one live message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveApplied {
    pub conversation_id: ConversationId,
    /// How the message merged into its set; `None` when the conversation
    /// keeps no message state.
    pub merge: Option<MergeOutcome>,
    pub unread: UnreadChange,
    /// Mark-seen for the message, when one is due.
    pub intents: Vec<OutboundIntent>,
}

impl LiveApplied {
    pub fn messages_changed(&self) -> bool {
        matches!(self.merge, Some(MergeOutcome::Inserted | MergeOutcome::Updated))
    }

    pub fn summary_changed(&self) -> bool {
        self.unread != UnreadChange::Repeated
    }
}

/// Result of opening a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// `join-room` followed by catch-up mark-seen intents.
    pub intents: Vec<OutboundIntent>,
    /// First history page to fetch when nothing is loaded yet.
    pub initial_request: Option<HistoryTicket>,
}

/// The reconciliation core: one authoritative, ordered view per
/// conversation plus the sidebar projection, driven one event at a time.
///
/// The store performs no I/O. Every operation returns the outbound intents
/// the caller has to emit.
pub struct ConversationStore {
    config: StoreConfig,
    conversations: HashMap<ConversationId, ConversationState>,
    open: Option<ConversationId>,
    projector: SummaryProjector,
    reconciler: SeenReconciler,
}

impl ConversationStore {
    pub fn new(viewer: UserId, config: StoreConfig) -> Self {
        Self {
            projector: SummaryProjector::new(viewer.clone(), &config),
            reconciler: SeenReconciler::new(viewer),
            conversations: HashMap::new(),
            open: None,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn viewer(&self) -> &UserId {
        self.reconciler.viewer()
    }

    pub fn open_conversation_id(&self) -> Option<&ConversationId> {
        self.open.as_ref()
    }

    fn state_mut(&mut self, conversation_id: &ConversationId) -> &mut ConversationState {
        let config = &self.config;
        self.conversations
            .entry(conversation_id.clone())
            .or_insert_with(|| ConversationState::new(config))
    }

    pub fn conversation(&self, conversation_id: &ConversationId) -> Option<&ConversationState> {
        self.conversations.get(conversation_id)
    }

    // -- Reads --

    pub fn snapshot(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.conversations
            .get(conversation_id)
            .map(|state| state.messages.snapshot())
            .unwrap_or_default()
    }

    pub fn summaries(&self) -> Vec<ConversationSummary> {
        self.projector.summaries()
    }

    pub fn summary(&self, conversation_id: &ConversationId) -> Option<&ConversationSummary> {
        self.projector.get(conversation_id)
    }

    pub fn load_state(&self, conversation_id: &ConversationId) -> LoadState {
        self.conversations
            .get(conversation_id)
            .map(|state| state.cursor.load_state())
            .unwrap_or(LoadState::Idle)
    }

    pub fn pending_sends(&self, conversation_id: &ConversationId) -> &[OptimisticSend] {
        self.conversations
            .get(conversation_id)
            .map(|state| state.pending_sends.as_slice())
            .unwrap_or_default()
    }

    /// Scroll-position decision: should the next older page be requested?
    pub fn should_load_more(&self, conversation_id: &ConversationId, proximity_to_top: f64) -> bool {
        let threshold = self.config.load_more_threshold;
        match self.conversations.get(conversation_id) {
            Some(state) => state.cursor.should_load_more(proximity_to_top, threshold),
            None => proximity_to_top < threshold,
        }
    }

    // -- Conversation list --

    pub fn seed_summaries(&mut self, summaries: impl IntoIterator<Item = ConversationSummary>) {
        self.projector.seed(summaries);
    }

    // -- Open / close --

    pub fn open_conversation(&mut self, conversation_id: ConversationId) -> Opened {
        if self.open.as_ref() != Some(&conversation_id) {
            self.abandon_open_request();
            info!(conversation_id = %conversation_id, "Opening conversation");
        }
        self.open = Some(conversation_id.clone());
        self.projector.open(conversation_id.clone());

        let mut intents = vec![OutboundIntent::JoinRoom(conversation_id.clone())];

        let config = &self.config;
        let state = self
            .conversations
            .entry(conversation_id.clone())
            .or_insert_with(|| ConversationState::new(config));
        intents.extend(self.reconciler.catch_up(state.messages.iter()));

        // Live messages may already sit in the set; only the cursor knows
        // whether history was ever fetched.
        let initial_request = if state.cursor.loaded_count() == 0 {
            match state.cursor.request_more() {
                RequestDecision::Start(request) => Some(HistoryTicket {
                    conversation_id,
                    request,
                }),
                _ => None,
            }
        } else {
            None
        };

        Opened {
            intents,
            initial_request,
        }
    }

    /// Close the open conversation. Its in-flight history request, if any,
    /// is abandoned. Returns the conversation that was open.
    pub fn close_conversation(&mut self) -> Option<ConversationId> {
        self.abandon_open_request();
        self.projector.close();
        let closed = self.open.take();
        if let Some(id) = &closed {
            info!(conversation_id = %id, "Closed conversation");
        }
        closed
    }

    fn abandon_open_request(&mut self) {
        let Some(open) = self.open.clone() else {
            return;
        };
        if let Some(state) = self.conversations.get_mut(&open) {
            if state.cursor.in_flight() {
                debug!(conversation_id = %open, "Abandoning in-flight history request");
                state.cursor.abandon();
            }
        }
    }

    // -- History --

    pub fn request_older_messages(&mut self, conversation_id: &ConversationId) -> HistoryRequest {
        let state = self.state_mut(conversation_id);
        match state.cursor.request_more() {
            RequestDecision::Start(request) => {
                debug!(
                    conversation_id = %conversation_id,
                    skip = request.skip,
                    limit = request.limit,
                    "Requesting history page"
                );
                HistoryRequest::Started(HistoryTicket {
                    conversation_id: conversation_id.clone(),
                    request,
                })
            }
            RequestDecision::AlreadyInFlight => HistoryRequest::AlreadyInFlight,
            RequestDecision::NoMore => HistoryRequest::NoMore,
        }
    }

    /// Apply the response to a history request. `items` is the page as the
    /// backend returns it, newest first.
    pub fn apply_history_page(
        &mut self,
        ticket: &HistoryTicket,
        response: Result<Vec<Value>, NetworkError>,
    ) -> HistoryOutcome {
        let is_open = self.open.as_ref() == Some(&ticket.conversation_id);
        let Some(state) = self.conversations.get_mut(&ticket.conversation_id) else {
            return HistoryOutcome::Stale;
        };
        if !state.cursor.is_current(&ticket.request) {
            debug!(conversation_id = %ticket.conversation_id, "Ignoring stale history response");
            return HistoryOutcome::Stale;
        }

        let items = match response {
            Ok(items) => items,
            Err(err) => {
                warn!(conversation_id = %ticket.conversation_id, error = %err, "History load failed");
                state.cursor.fail(&ticket.request);
                state.last_error = Some(err);
                return HistoryOutcome::Failed;
            }
        };
        state.last_error = None;

        let page_len = items.len();
        if page_len == 0 {
            state.cursor.complete(&ticket.request, 0);
            info!(conversation_id = %ticket.conversation_id, "History exhausted");
            return HistoryOutcome::Exhausted;
        }

        let mut rejected = 0;
        let messages: Vec<Message> = items
            .into_iter()
            .filter_map(|item| {
                match normalize::history_item(item, &ticket.conversation_id) {
                    Ok(message) => Some(message),
                    Err(err) => {
                        warn!(conversation_id = %ticket.conversation_id, error = %err, "Dropping history item");
                        rejected += 1;
                        None
                    }
                }
            })
            .collect();

        let merge = state.messages.prepend_page(messages, false);
        state.cursor.complete(&ticket.request, page_len);

        let intents = if is_open {
            self.reconciler.catch_up(state.messages.iter())
        } else {
            Vec::new()
        };

        debug!(
            conversation_id = %ticket.conversation_id,
            inserted = merge.inserted,
            absorbed = merge.absorbed,
            rejected,
            "History page applied"
        );

        HistoryOutcome::Applied {
            inserted: merge.inserted,
            absorbed: merge.absorbed + merge.updated,
            rejected,
            intents,
        }
    }

    // -- Live events --

    /// Apply a `message-from-server` payload. A re-delivered message leaves
    /// both the set and the sidebar untouched.
    pub fn handle_live_message(&mut self, payload: Value) -> Result<LiveApplied, DecodeError> {
        let message = normalize::live_message(payload)?;
        let conversation_id = message.conversation_id.clone();
        let is_open = self.open.as_ref() == Some(&conversation_id);

        // Conversations never loaded keep no message state; their history
        // fetch will bring this message in.
        if !is_open && !self.conversations.contains_key(&conversation_id) {
            let unread = self.projector.on_live_message(&message);
            return Ok(LiveApplied {
                conversation_id,
                merge: None,
                unread,
                intents: Vec::new(),
            });
        }

        let from_viewer = message.sender_id == *self.viewer();
        let id = message.id.clone();
        let config = &self.config;
        let state = self
            .conversations
            .entry(conversation_id.clone())
            .or_insert_with(|| ConversationState::new(config));
        if from_viewer {
            state.retire_echoed_send(&message);
        }
        let merge = state.messages.insert_or_update(message, Source::Live);
        let mut applied = LiveApplied {
            conversation_id,
            merge: Some(merge),
            unread: UnreadChange::Repeated,
            intents: Vec::new(),
        };
        if merge == MergeOutcome::DuplicateSuppressed {
            debug!(message_id = %id, "Live message re-delivered");
            return Ok(applied);
        }
        let Some(stored) = state.messages.get(&id) else {
            return Ok(applied);
        };

        // Only a message new to the set counts toward the sidebar.
        if merge == MergeOutcome::Inserted {
            applied.unread = self.projector.on_live_message(stored);
        }
        if is_open {
            applied.intents.extend(self.reconciler.observe(stored));
        }
        Ok(applied)
    }

    /// Apply a `message-seen` receipt to its conversation, or to the open
    /// one when the receipt is unscoped.
    pub fn handle_seen_receipt(&mut self, payload: Value) -> Result<SeenOutcome, DecodeError> {
        let (patch, scope) = normalize::seen_receipt(payload)?;
        let Some(conversation_id) = scope.or_else(|| self.open.clone()) else {
            debug!(message_id = %patch.message_id, "Seen receipt with no open conversation");
            return Ok(SeenOutcome::NoTarget);
        };

        let is_open = self.open.as_ref() == Some(&conversation_id);
        if !is_open && !self.conversations.contains_key(&conversation_id) {
            return Ok(SeenOutcome::NoTarget);
        }
        Ok(self.state_mut(&conversation_id).messages.apply_seen_patch(patch))
    }

    // -- Sending --

    /// Queue an optimistic send. The returned intent must be emitted; the
    /// message itself only enters the set when the server echoes it.
    pub fn send_message(
        &mut self,
        conversation_id: &ConversationId,
        draft: Draft,
    ) -> Result<(OptimisticSend, OutboundIntent), StoreError> {
        let known = self.conversations.contains_key(conversation_id)
            || self.projector.get(conversation_id).is_some();
        if !known {
            return Err(StoreError::UnknownConversation(conversation_id.clone()));
        }
        let pending = OptimisticSend::new(conversation_id.clone(), self.viewer().clone(), draft)?;
        let intent = pending.to_intent();
        self.state_mut(conversation_id)
            .pending_sends
            .push(pending.clone());
        Ok((pending, intent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ConversationStore {
        ConversationStore::new("me".into(), StoreConfig::default())
    }

    fn live(id: &str, conversation: &str, sender: &str, minute: u32) -> Value {
        json!({
            "id": id,
            "conversationId": conversation,
            "sender": sender,
            "message": format!("text {}", id),
            "createdAt": format!("2024-05-01T10:{:02}:00Z", minute),
        })
    }

    fn history(id: &str, sender: &str, minute: u32) -> Value {
        json!({
            "_id": id,
            "senderId": sender,
            "content": format!("text {}", id),
            "createdAt": format!("2024-05-01T10:{:02}:00Z", minute),
        })
    }

    #[test]
    fn opening_empty_conversation_requests_first_page() {
        let mut s = store();
        let opened = s.open_conversation("c1".into());
        assert_eq!(opened.intents, vec![OutboundIntent::JoinRoom("c1".into())]);
        let ticket = opened.initial_request.unwrap();
        assert_eq!(ticket.request.skip, 0);
        assert_eq!(s.load_state(&"c1".into()), LoadState::Loading);
    }

    #[test]
    fn stale_page_after_switch_is_ignored() {
        let mut s = store();
        let ticket = s.open_conversation("c1".into()).initial_request.unwrap();
        s.open_conversation("c2".into());

        let outcome = s.apply_history_page(&ticket, Ok(vec![history("m1", "u2", 0)]));
        assert_eq!(outcome, HistoryOutcome::Stale);
        assert!(s.snapshot(&"c1".into()).is_empty());
        assert_eq!(s.load_state(&"c1".into()), LoadState::Idle);
    }

    #[test]
    fn bad_items_are_skipped_not_fatal() {
        let mut s = store();
        let ticket = s.open_conversation("c1".into()).initial_request.unwrap();
        let outcome = s.apply_history_page(
            &ticket,
            Ok(vec![history("m2", "me", 1), json!({"senderId": "u2"}), history("m1", "me", 0)]),
        );
        match outcome {
            HistoryOutcome::Applied { inserted, rejected, .. } => {
                assert_eq!(inserted, 2);
                assert_eq!(rejected, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        // raw page length advances the offset, bad items included
        assert_eq!(s.conversation(&"c1".into()).unwrap().cursor().loaded_count(), 3);
    }

    #[test]
    fn network_failure_surfaces_as_state() {
        let mut s = store();
        let ticket = s.open_conversation("c1".into()).initial_request.unwrap();
        let outcome = s.apply_history_page(&ticket, Err(NetworkError("timeout".into())));
        assert_eq!(outcome, HistoryOutcome::Failed);
        assert_eq!(s.load_state(&"c1".into()), LoadState::Failed);
        assert!(s.conversation(&"c1".into()).unwrap().last_error().is_some());

        let retry = s.request_older_messages(&"c1".into()).ticket().unwrap();
        assert_eq!(retry.request.skip, 0);
    }

    #[test]
    fn live_message_in_open_conversation_is_marked_once() {
        let mut s = store();
        s.open_conversation("c1".into());
        let applied = s.handle_live_message(live("m1", "c1", "u2", 0)).unwrap();
        assert_eq!(applied.intents.len(), 1);
        assert!(applied.messages_changed());
        let again = s.handle_live_message(live("m1", "c1", "u2", 0)).unwrap();
        assert!(again.intents.is_empty());
        assert!(!again.messages_changed());
        assert!(!again.summary_changed());
        assert_eq!(s.snapshot(&"c1".into()).len(), 1);
    }

    #[test]
    fn live_message_for_unloaded_conversation_only_touches_sidebar() {
        let mut s = store();
        s.open_conversation("c1".into());
        let applied = s.handle_live_message(live("m1", "c2", "u2", 0)).unwrap();
        assert!(applied.intents.is_empty());
        assert_eq!(applied.merge, None);
        assert!(!applied.messages_changed());
        assert_eq!(applied.unread, UnreadChange::Incremented(1));
        assert!(s.conversation(&"c2".into()).is_none());
        assert_eq!(s.summary(&"c2".into()).unwrap().unread_count, 1);
    }

    #[test]
    fn malformed_live_message_is_reported() {
        let mut s = store();
        let err = s.handle_live_message(json!({"conversationId": "c1"})).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { .. }));
    }

    #[test]
    fn echo_retires_optimistic_send() {
        let mut s = store();
        s.open_conversation("c1".into());
        let (pending, intent) = s
            .send_message(
                &"c1".into(),
                Draft {
                    text: Some("text m5".into()),
                    attachment: None,
                },
            )
            .unwrap();
        assert!(matches!(intent, OutboundIntent::Send(_)));
        assert_eq!(s.pending_sends(&"c1".into()), &[pending]);
        assert!(s.snapshot(&"c1".into()).is_empty());

        let applied = s.handle_live_message(live("m5", "c1", "me", 5)).unwrap();
        assert!(applied.intents.is_empty());
        assert!(s.pending_sends(&"c1".into()).is_empty());
        assert_eq!(s.snapshot(&"c1".into()).len(), 1);
    }

    #[test]
    fn sending_to_unknown_conversation_is_refused() {
        let mut s = store();
        let draft = Draft {
            text: Some("hi".into()),
            attachment: None,
        };
        assert!(matches!(
            s.send_message(&"nope".into(), draft),
            Err(StoreError::UnknownConversation(_))
        ));
    }

    #[test]
    fn unscoped_receipt_without_open_conversation_has_no_target() {
        let mut s = store();
        let outcome = s
            .handle_seen_receipt(json!({"messageId": "m1", "userId": "u2"}))
            .unwrap();
        assert_eq!(outcome, SeenOutcome::NoTarget);
    }
}
