use thiserror::Error;

use crate::config::ConfigError;
use crate::index::IndexError;
use crate::ingest::{ChunkError, DiscoveryError, PipelineError};
use crate::lifecycle::CleanupError;
use crate::llm::LlmError;
use crate::rag::PromptError;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("missing LLM model: set --model or llm.default_model")]
    MissingChatModel,

    #[error("missing embedding model: set --embedding-model or embedding.embedding_model")]
    MissingEmbeddingModel,

    #[error("selected model not found in available models: {}", .0.join(", "))]
    InvalidSelectedModel(Vec<String>),

    #[error("nothing to embed: pass paths or pipe data on stdin")]
    NoEmbedInput,

    #[error("cannot embed piped data and paths together")]
    ConflictingEmbedInputs,

    #[error("missing query: use -q or `-- <QUERY>`")]
    MissingQuery,

    #[error("missing query after --")]
    MissingQueryAfterSeparator,

    #[error("embed query: {0}")]
    EmbedQuery(#[source] LlmError),

    #[error("logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// True when the failure was caused by the user cancelling
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Llm(LlmError::Cancelled) | Self::Pipeline(PipelineError::Cancelled)
        )
    }
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod index;
pub mod ingest;
pub mod lifecycle;
pub mod llm;
pub mod progress;
pub mod rag;
