use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use openice_shared::{Chat, MessageRequest};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result, StreamingError};

pub const TRACING_TARGET: &str = "openice_envoy::client";

/// Raw body of a streamed message response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Sends a user message and hands back the response body.
///
/// [`ApiClient`] is the HTTP implementation; sessions only depend on this
/// trait.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn create_message(&self, chat_id: Uuid, request: &MessageRequest) -> Result<ByteStream>;
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "server URL must start with http:// or https://, got '{}'",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.timeout)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /chat`
    pub async fn create_chat(&self) -> Result<Chat> {
        let url = format!("{}/chat", self.base_url);
        tracing::debug!(target: TRACING_TARGET, %url, "Creating chat");

        let response = self.client.post(&url).send().await?;
        let chat = check(response).await?.json::<Chat>().await?;
        Ok(chat)
    }

    /// `GET /chat/{id}`
    pub async fn get_chat(&self, chat_id: Uuid) -> Result<Chat> {
        let url = format!("{}/chat/{}", self.base_url, chat_id);
        tracing::debug!(target: TRACING_TARGET, %url, "Fetching chat");

        let response = self.client.get(&url).send().await?;
        let chat = check(response).await?.json::<Chat>().await?;
        Ok(chat)
    }

    /// `POST /chat/{id}/messages`, returning the streamed body unread.
    pub async fn create_message(&self, chat_id: Uuid, request: &MessageRequest) -> Result<ByteStream> {
        let url = format!("{}/chat/{}/messages", self.base_url, chat_id);
        tracing::debug!(target: TRACING_TARGET, %url, "Sending message");

        let response = self.client.post(&url).json(request).send().await?;
        let response = check(response).await?;

        // Stands in for a response without a body.
        if response.content_length() == Some(0) {
            let status = response.status();
            return Err(StreamingError::new(
                status.as_u16(),
                status.canonical_reason().unwrap_or_default(),
            )
            .with_detail("Empty response body")
            .into());
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from));
        Ok(Box::pin(body))
    }
}

#[async_trait]
impl MessageTransport for ApiClient {
    async fn create_message(&self, chat_id: Uuid, request: &MessageRequest) -> Result<ByteStream> {
        ApiClient::create_message(self, chat_id, request).await
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let error = StreamingError::from_response(response).await;
    tracing::warn!(
        target: TRACING_TARGET,
        status = error.status,
        detail = ?error.detail,
        "Request failed"
    );
    Err(error.into())
}
