use reqwest::StatusCode;
use thiserror::Error;

use convo_store::{NetworkError, StoreError};

/// A failed call against the REST backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend answered {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("unexpected response body: {0}")]
    Body(#[from] serde_json::Error),
}

impl From<BackendError> for NetworkError {
    fn from(err: BackendError) -> Self {
        NetworkError(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has shut down")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unreadable access token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
