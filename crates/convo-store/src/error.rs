use thiserror::Error;

use convo_types::ConversationId;

/// A record from the transport or a history page that could not be turned
/// into a canonical message. The record is dropped; processing continues.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {kind} payload: {source}")]
    Shape {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} is missing required field `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

/// History fetch failed. The cursor keeps its position so a retry resumes
/// from the same offset.
#[derive(Debug, Clone, Error)]
#[error("history fetch failed: {0}")]
pub struct NetworkError(pub String);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("message has neither text nor attachment")]
    EmptyMessage,

    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),
}

/// Result of merging one message into an ordered set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// Already known with nothing new to merge. Expected, not a failure.
    DuplicateSuppressed,
}
