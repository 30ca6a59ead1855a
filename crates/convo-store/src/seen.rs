use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use convo_types::events::{MarkSeenPayload, OutboundIntent};
use convo_types::{Message, MessageId, SeenPatch, UserId};

/// What happened to a seen patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenOutcome {
    /// The acknowledger was added to the message.
    Applied,
    /// The message already listed the acknowledger.
    AlreadyKnown,
    /// The message is not loaded yet; the patch waits for it.
    Buffered,
    /// No conversation could be resolved for the receipt.
    NoTarget,
}

struct PendingPatch {
    patch: SeenPatch,
    age: u32,
}

/// Seen patches that raced ahead of their message.
///
/// Bounded two ways: at most `capacity` entries (oldest evicted first), and
/// each entry survives `max_age` ticks. The owning set ticks once per insert.
pub struct SeenPatchBuffer {
    capacity: usize,
    max_age: u32,
    pending: VecDeque<PendingPatch>,
}

impl SeenPatchBuffer {
    pub fn new(capacity: usize, max_age: u32) -> Self {
        Self {
            capacity,
            max_age,
            pending: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    /// Hold a patch. Returns the patch that had to be evicted to make room, if any.
    pub fn push(&mut self, patch: SeenPatch) -> Option<SeenPatch> {
        if self.capacity == 0 {
            return Some(patch);
        }
        let evicted = if self.pending.len() >= self.capacity {
            self.pending.pop_front().map(|p| p.patch)
        } else {
            None
        };
        self.pending.push_back(PendingPatch { patch, age: 0 });
        evicted
    }

    /// Remove and return every pending patch for `message_id`.
    pub fn take_for(&mut self, message_id: &MessageId) -> Vec<SeenPatch> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let mut taken = Vec::new();
        self.pending.retain(|p| {
            if p.patch.message_id == *message_id {
                taken.push(p.patch.clone());
                false
            } else {
                true
            }
        });
        taken
    }

    /// Age every entry by one and drop the expired ones. Returns how many were dropped.
    pub fn tick(&mut self) -> usize {
        let before = self.pending.len();
        let max_age = self.max_age;
        self.pending.retain_mut(|p| {
            p.age += 1;
            p.age <= max_age
        });
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(dropped, "Expired buffered seen patches");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Decides when to tell the backend the viewer has seen a message.
///
/// Each `(message, conversation)` pair is marked at most once per session,
/// however many times the message is observed.
pub struct SeenReconciler {
    viewer: UserId,
    emitted: HashSet<MarkSeenPayload>,
}

impl SeenReconciler {
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            emitted: HashSet::new(),
        }
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    fn needs_mark(&self, message: &Message) -> bool {
        message.sender_id != self.viewer && !message.is_seen_by(&self.viewer)
    }

    /// Observe one message. Returns the mark-seen intent the first time an
    /// unseen message from someone else goes by.
    pub fn observe(&mut self, message: &Message) -> Option<OutboundIntent> {
        if !self.needs_mark(message) {
            return None;
        }
        let payload = MarkSeenPayload {
            message_id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
        };
        if !self.emitted.insert(payload.clone()) {
            return None;
        }
        Some(OutboundIntent::MarkSeen(payload))
    }

    /// Catch-up marking over everything currently loaded for a conversation.
    pub fn catch_up<'a>(&mut self, messages: impl IntoIterator<Item = &'a Message>) -> Vec<OutboundIntent> {
        let intents: Vec<OutboundIntent> = messages
            .into_iter()
            .filter_map(|m| self.observe(m))
            .collect();
        if !intents.is_empty() {
            debug!(count = intents.len(), "Catch-up marking");
        }
        intents
    }

    pub fn emitted_count(&self) -> usize {
        self.emitted.len()
    }
}

pub(crate) fn log_eviction(evicted: Option<SeenPatch>) {
    if let Some(patch) = evicted {
        warn!(
            message_id = %patch.message_id,
            user_id = %patch.user_id,
            "Seen buffer full, dropping oldest pending patch"
        );
    }
}
