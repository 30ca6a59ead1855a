//! Async driver for the conversation store: connects a [`ConversationStore`]
//! to a real-time [`Transport`] and a REST [`Backend`] on a single task.
//!
//! [`ConversationStore`]: convo_store::ConversationStore

pub mod backend;
pub mod claims;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use backend::{Backend, HttpBackend};
pub use claims::{claims_from_token, viewer_from_token};
pub use config::SessionConfig;
pub use error::{BackendError, SessionError};
pub use session::{Session, SessionEvent, SessionHandle};
pub use transport::{ChannelTransport, Subscription, SubscriptionId, Transport};
