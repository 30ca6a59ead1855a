use std::future::Future;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use convo_types::api::{ConversationRecord, UserProfile};
use convo_types::{ConversationId, UserId};

use crate::error::BackendError;

/// The REST side of the backend.
pub trait Backend: Send + Sync + 'static {
    /// One page of history, newest first, as raw records.
    fn fetch_history(
        &self,
        conversation_id: &ConversationId,
        skip: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Value>, BackendError>> + Send;

    /// Every conversation the viewer belongs to.
    fn fetch_conversations(&self) -> impl Future<Output = Result<Vec<ConversationRecord>, BackendError>> + Send;

    fn fetch_profile(&self, user_id: &UserId) -> impl Future<Output = Result<UserProfile, BackendError>> + Send;
}

/// [`Backend`] over HTTP with bearer auth.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(client: Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String, query: &[(&str, String)]) -> Result<T, BackendError> {
        debug!(%url, "GET");
        let resp = self
            .client
            .get(&url)
            .query(query)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl Backend for HttpBackend {
    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Value>, BackendError> {
        let url = self.url(&format!("conversation/get-messages/{}", conversation_id));
        self.get_json(url, &[("limit", limit.to_string()), ("skip", skip.to_string())])
            .await
    }

    async fn fetch_conversations(&self) -> Result<Vec<ConversationRecord>, BackendError> {
        self.get_json(self.url("conversation/user-conversations"), &[])
            .await
    }

    async fn fetch_profile(&self, user_id: &UserId) -> Result<UserProfile, BackendError> {
        let url = self.url(&format!("users/friend/id/{}", user_id));
        self.get_json(url, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let backend = HttpBackend::new("https://api.test/v1/", "tok");
        assert_eq!(
            backend.url("conversation/user-conversations"),
            "https://api.test/v1/conversation/user-conversations"
        );
    }
}
