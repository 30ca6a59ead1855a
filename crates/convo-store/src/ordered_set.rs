use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use convo_types::{Message, MessageId, SeenPatch};

use crate::config::StoreConfig;
use crate::error::MergeOutcome;
use crate::normalize::Source;
use crate::seen::{SeenOutcome, SeenPatchBuffer, log_eviction};

type OrderKey = (DateTime<Utc>, MessageId);

/// Counts from merging one page of history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageMerge {
    pub inserted: usize,
    pub updated: usize,
    pub absorbed: usize,
}

/// The deduplicated, `(created_at, id)`-ordered messages of one conversation.
///
/// Order is a pure function of the keys, never of arrival order, so any
/// interleaving of pages and live inserts over the same messages yields the
/// same snapshot.
pub struct OrderedMessageSet {
    entries: BTreeMap<OrderKey, Message>,
    /// id -> current timestamp component of its key
    positions: HashMap<MessageId, DateTime<Utc>>,
    pending_seen: SeenPatchBuffer,
}

impl OrderedMessageSet {
    pub fn new(pending_seen: SeenPatchBuffer) -> Self {
        Self {
            entries: BTreeMap::new(),
            positions: HashMap::new(),
            pending_seen,
        }
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self::new(SeenPatchBuffer::new(
            config.seen_buffer_capacity,
            config.seen_buffer_max_age,
        ))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let created_at = self.positions.get(id)?;
        self.entries.get(&(*created_at, id.clone()))
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        let created_at = self.positions.get(id)?;
        self.entries.get_mut(&(*created_at, id.clone()))
    }

    /// Messages in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.values()
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.entries.values().next()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.entries.values().next_back()
    }

    /// Owned copy of the whole ordered sequence.
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.values().cloned().collect()
    }

    pub fn pending_seen_len(&self) -> usize {
        self.pending_seen.len()
    }

    /// Insert a new message or merge into the known copy with the same id.
    ///
    /// Seen sets are always unioned. Other fields are replaced only by a live
    /// sighting; a history sighting may fill gaps but never overwrites.
    pub fn insert_or_update(&mut self, message: Message, source: Source) -> MergeOutcome {
        let id = message.id.clone();
        let outcome = match self.positions.get(&id).copied() {
            None => {
                self.positions.insert(id.clone(), message.created_at);
                self.entries.insert(message.order_key(), message);
                MergeOutcome::Inserted
            }
            Some(created_at) => self.merge_existing(created_at, message, source),
        };

        for patch in self.pending_seen.take_for(&id) {
            trace!(message_id = %id, user_id = %patch.user_id, "Applying buffered seen patch");
            self.union_seen(&patch);
        }
        self.pending_seen.tick();

        if outcome == MergeOutcome::DuplicateSuppressed {
            debug!(message_id = %id, "Duplicate message absorbed");
        }
        outcome
    }

    fn merge_existing(
        &mut self,
        created_at: DateTime<Utc>,
        incoming: Message,
        source: Source,
    ) -> MergeOutcome {
        let key = (created_at, incoming.id.clone());
        let Some(mut existing) = self.entries.remove(&key) else {
            // positions and entries are kept in lockstep
            self.positions.insert(incoming.id.clone(), incoming.created_at);
            self.entries.insert(incoming.order_key(), incoming);
            return MergeOutcome::Inserted;
        };

        let before = existing.clone();
        existing.seen_by.extend(incoming.seen_by);
        existing.seen_by_usernames.extend(incoming.seen_by_usernames);

        match source {
            Source::Live => {
                existing.sender_id = incoming.sender_id;
                existing.created_at = incoming.created_at;
                if incoming.text.is_some() {
                    existing.text = incoming.text;
                }
                if incoming.attachment.is_some() {
                    existing.attachment = incoming.attachment;
                }
            }
            Source::History => {
                if existing.text.is_none() {
                    existing.text = incoming.text;
                }
                if existing.attachment.is_none() {
                    existing.attachment = incoming.attachment;
                }
            }
        }

        let changed = existing != before;
        self.positions.insert(existing.id.clone(), existing.created_at);
        self.entries.insert(existing.order_key(), existing);

        if changed {
            MergeOutcome::Updated
        } else {
            MergeOutcome::DuplicateSuppressed
        }
    }

    /// Merge a batch of older messages. Known ids are absorbed without
    /// creating a second copy or moving the existing entry.
    pub fn prepend_page(&mut self, mut messages: Vec<Message>, oldest_first: bool) -> PageMerge {
        if !oldest_first {
            messages.reverse();
        }
        let mut merge = PageMerge::default();
        for message in messages {
            match self.insert_or_update(message, Source::History) {
                MergeOutcome::Inserted => merge.inserted += 1,
                MergeOutcome::Updated => merge.updated += 1,
                MergeOutcome::DuplicateSuppressed => merge.absorbed += 1,
            }
        }
        merge
    }

    /// Record that `patch.user_id` has seen `patch.message_id`. Patches for
    /// messages not loaded yet are buffered and replayed on insert.
    pub fn apply_seen_patch(&mut self, patch: SeenPatch) -> SeenOutcome {
        if !self.contains(&patch.message_id) {
            debug!(message_id = %patch.message_id, "Seen patch ahead of its message, buffering");
            log_eviction(self.pending_seen.push(patch));
            return SeenOutcome::Buffered;
        }
        if self.union_seen(&patch) {
            SeenOutcome::Applied
        } else {
            SeenOutcome::AlreadyKnown
        }
    }

    fn union_seen(&mut self, patch: &SeenPatch) -> bool {
        let Some(message) = self.get_mut(&patch.message_id) else {
            return false;
        };
        let added = message.seen_by.insert(patch.user_id.clone());
        let name = patch
            .username
            .clone()
            .unwrap_or_else(|| patch.user_id.to_string());
        let named = message.seen_by_usernames.insert(name);
        added || named
    }
}
