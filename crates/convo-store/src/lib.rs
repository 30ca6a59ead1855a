//! Client-side message store for direct and group conversations.
//!
//! Merges paginated history, live pushes and seen receipts into one ordered,
//! duplicate-free view per conversation, and keeps the sidebar summaries in
//! step with the same stream.

pub mod config;
pub mod cursor;
pub mod error;
pub mod normalize;
pub mod ordered_set;
pub mod seen;
pub mod store;
pub mod summary;

pub use config::StoreConfig;
pub use cursor::{LoadState, PageRequest, PaginationCursor, RequestDecision};
pub use error::{DecodeError, MergeOutcome, NetworkError, StoreError};
pub use normalize::{Draft, OptimisticSend, Source};
pub use ordered_set::{OrderedMessageSet, PageMerge};
pub use seen::{SeenOutcome, SeenPatchBuffer, SeenReconciler};
pub use store::{ConversationState, ConversationStore, HistoryOutcome, HistoryRequest, HistoryTicket, LiveApplied, Opened};
pub use summary::{SummaryProjector, UnreadChange, summary_from_record};
