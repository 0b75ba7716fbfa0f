use std::error::Error as StdError;

use thiserror::Error;

/// Errors raised by LLM clients and chat sessions
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no model selected")]
    NoModelSelected,

    #[error("empty completion response")]
    EmptyCompletionResponse,

    #[error("no embedding returned")]
    NoEmbeddingReturned,

    #[error("model refused: {0}")]
    ModelRefused(String),

    #[error("no provider found for: {0:?}")]
    NoProviderFor(String),

    #[error("invalid base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("request cancelled")]
    Cancelled,
}

/// Non-success response from an OpenAI-compatible endpoint
#[derive(Debug, Error)]
#[error(
    "API error: status={status_code}, message={message:?}{}",
    .source.as_ref().map_or_else(String::new, |e| format!(", cause={e}"))
)]
pub struct ApiError {
    pub status_code: u16,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ApiError {
    #[inline]
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
            source: None,
        }
    }
}

/// True for timeouts and for HTTP statuses worth retrying
#[inline]
pub fn is_retryable(err: &LlmError) -> bool {
    match err {
        LlmError::Api(api) => matches!(api.status_code, 409 | 429 | 500 | 502 | 503 | 504),
        LlmError::Transport(e) => e.is_timeout(),
        _ => false,
    }
}
