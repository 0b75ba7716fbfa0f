// LLM module
// OpenAI-compatible clients, chat sessions and the provider registry

pub mod chat;
pub mod client;
pub mod errors;
pub mod openai;
pub mod providers;

#[cfg(test)]
pub mod testing;

pub use chat::{
    ChatResponse, ChatSession, ChatStream, SendRequest, SessionOptions, TokenCounter,
    approx_token_count, truncate_history,
};
pub use client::{ChatDelta, ChatMessage, ChatRequest, Completion, DeltaStream, LlmClient, Usage};
pub use errors::{ApiError, LlmError, is_retryable};
pub use openai::OpenAiClient;
pub use providers::{Provider, ProviderSettings, Providers};
