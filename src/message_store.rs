use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time;
use tokio::sync::RwLock;

const REQUEST_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Where the mail edge stored a received message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MessageLocation {
    pub bucket: String,
    pub key: String,
}

impl std::fmt::Display for MessageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MessageStoreError {
    #[error("Message {0} was not found.")]
    NotFound(MessageLocation),
    #[error("Failed to download the message.")]
    Request(#[from] reqwest::Error),
}

#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Raw RFC 5322 bytes of the message.
    async fn fetch(&self, location: &MessageLocation) -> Result<Vec<u8>, MessageStoreError>;
}

pub struct HttpMessageStore {
    http_client: Client,
    base_url: String,
}

impl HttpMessageStore {
    pub fn new(base_url: String, timeout: Option<time::Duration>) -> HttpMessageStore {
        let http_client = Client::builder()
            .timeout(timeout.unwrap_or(REQUEST_TIMEOUT))
            .build()
            .expect("Failed to build the HTTP client.");

        HttpMessageStore {
            http_client,
            base_url,
        }
    }
}

#[async_trait::async_trait]
impl MessageStore for HttpMessageStore {
    #[tracing::instrument(name = "Download a raw message", skip(self), fields(location = %location))]
    async fn fetch(&self, location: &MessageLocation) -> Result<Vec<u8>, MessageStoreError> {
        let url = format!("{}/{}/{}", self.base_url, location.bucket, location.key);
        let response = self.http_client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(MessageStoreError::NotFound(location.clone()));
        }

        let body = response.error_for_status()?.bytes().await?;

        Ok(body.to_vec())
    }
}

#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<HashMap<MessageLocation, Vec<u8>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> InMemoryMessageStore {
        InMemoryMessageStore::default()
    }

    pub async fn put(&self, location: MessageLocation, raw: Vec<u8>) {
        self.messages.write().await.insert(location, raw);
    }
}

#[async_trait::async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn fetch(&self, location: &MessageLocation) -> Result<Vec<u8>, MessageStoreError> {
        self.messages
            .read()
            .await
            .get(location)
            .cloned()
            .ok_or_else(|| MessageStoreError::NotFound(location.clone()))
    }
}
