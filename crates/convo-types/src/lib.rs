/// Shared types for the conversation client.
///
/// - `models`: canonical domain records the store reconciles into
/// - `events`: inbound payload shapes and outbound intents on the real-time channel
/// - `api`: REST records and access-token claims

pub mod api;
pub mod events;
pub mod models;

pub use models::{
    Attachment, ConversationId, ConversationSummary, Message, MessageId, SeenPatch, UserId,
};
