use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::errors::LlmError;

/// One turn of a conversation, serialized in the OpenAI `{role, content}` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "lowercase")]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant(String),
}

impl ChatMessage {
    #[inline]
    pub fn text(&self) -> &str {
        match self {
            Self::System(text) | Self::User(text) | Self::Assistant(text) => text,
        }
    }

    #[inline]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    #[inline]
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }

    #[inline]
    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Non-streaming chat result. `content` is `None` when the API returned no choices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: Option<String>,
    pub usage: Option<Usage>,
}

/// One increment of a streamed chat completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatDelta {
    pub content: String,
    pub refusal: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl ChatDelta {
    #[inline]
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Self::default()
        }
    }
}

pub type DeltaStream = BoxStream<'static, Result<ChatDelta, LlmError>>;

/// An OpenAI-compatible endpoint.
///
/// Cancellation is cooperative: callers race these futures against a
/// cancellation token and drop them when it fires.
#[async_trait]
pub trait LlmClient: Send + Sync + fmt::Debug {
    /// Normalized base URL this client talks to
    fn base_url(&self) -> &str;

    /// Model ids served by the endpoint
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;

    /// Embed a single input
    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, LlmError>;

    /// Embed a batch. Vectors come back in input order; the count is not checked here.
    async fn embed_batch(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    async fn chat(&self, request: &ChatRequest) -> Result<Completion, LlmError>;

    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError>;

    /// Release pooled resources. Idempotent.
    #[inline]
    fn close(&self) {}
}
