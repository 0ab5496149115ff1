mod gemini;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;

pub use gemini::{parse_sse_data, GeminiProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderModel {
    pub id: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API key not set")]
    MissingApiKey,

    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("stream error: {0}")]
    Stream(String),
}

/// Text deltas of one completion, in arrival order.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// A hosted inference service.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Opens a streamed completion. Errors may surface either here or as items of the stream.
    async fn stream_completion(&self, model: &str, messages: &[PromptMessage]) -> Result<DeltaStream, ProviderError>;

    async fn list_models(&self, api_key: &str) -> Result<Vec<ProviderModel>, ProviderError>;
}
