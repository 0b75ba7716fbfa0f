
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::prompt::{build_user_prompt, decode_chunk_meta};
use super::reasoning::{Filtered, ReasoningFilter, split_reasoning};
use super::stream::{StreamChunk, stream};
use crate::config::ModelConfig;
use crate::index::{SearchHit, VectorIndex};
use crate::ingest::StatusFn;
use crate::llm::{LlmError, Providers, SendRequest, Usage};
use crate::{RagError, Result};

/// Retrieval and prompting knobs for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySettings {
    pub embedding_model: String,
    /// Number of chunks to retrieve; zero disables retrieval
    pub top_k: usize,
    pub user_prompt_template: Option<String>,
    /// Per-model context and temperature overrides
    pub models: Vec<ModelConfig>,
}

/// What a consumer of an answer stream observes
#[derive(Debug)]
pub enum AnswerEvent {
    Answer(String),
    Reasoning(String),
    ThinkingStarted,
    ThinkingEnded,
    Done,
    Failed(LlmError),
}

/// A streamed answer with reasoning sections split out
#[derive(Debug)]
pub struct AnswerStream {
    rx: mpsc::Receiver<StreamChunk>,
    filter: ReasoningFilter,
    finished: bool,
}

impl AnswerStream {
    #[inline]
    pub fn new(rx: mpsc::Receiver<StreamChunk>) -> Self {
        Self {
            rx,
            filter: ReasoningFilter::new(),
            finished: false,
        }
    }

    /// Next event. `Done` or `Failed` is always the last one.
    #[inline]
    pub async fn next(&mut self) -> Option<AnswerEvent> {
        loop {
            if self.finished {
                return None;
            }

            let Some(chunk) = self.rx.recv().await else {
                self.finished = true;
                return None;
            };

            match chunk {
                StreamChunk::Content(delta) => match self.filter.push(&delta) {
                    Filtered::Answer(text) => return Some(AnswerEvent::Answer(text)),
                    Filtered::Reasoning(text) => return Some(AnswerEvent::Reasoning(text)),
                    Filtered::ReasoningStarted => return Some(AnswerEvent::ThinkingStarted),
                    Filtered::ReasoningEnded => return Some(AnswerEvent::ThinkingEnded),
                    Filtered::Skipped => {}
                },
                StreamChunk::End => {
                    self.finished = true;
                    return Some(AnswerEvent::Done);
                }
                StreamChunk::Error(error) => {
                    self.finished = true;
                    self.filter.discard();
                    return Some(AnswerEvent::Failed(error));
                }
            }
        }
    }

    /// Reasoning text seen so far
    #[inline]
    pub fn reasoning(&self) -> &str {
        self.filter.reasoning()
    }

    /// Drain the stream and return only the answer text
    #[inline]
    pub async fn collect_answer(mut self) -> std::result::Result<String, LlmError> {
        let mut answer = String::new();
        while let Some(event) = self.next().await {
            match event {
                AnswerEvent::Answer(text) => answer.push_str(&text),
                AnswerEvent::Failed(error) => return Err(error),
                AnswerEvent::Done => break,
                AnswerEvent::Reasoning(_)
                | AnswerEvent::ThinkingStarted
                | AnswerEvent::ThinkingEnded => {}
            }
        }
        Ok(answer)
    }
}

/// A complete, non-streamed answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub reasoning: String,
    pub usage: Option<Usage>,
}

/// Ties retrieval, prompt assembly and chat together
#[derive(Clone)]
pub struct RagEngine {
    providers: Arc<Providers>,
    index: Arc<VectorIndex>,
    settings: QuerySettings,
    status: StatusFn,
}

impl std::fmt::Debug for RagEngine {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagEngine")
            .field("settings", &self.settings)
            .field("rows", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl RagEngine {
    #[inline]
    pub fn new(providers: Arc<Providers>, index: Arc<VectorIndex>, settings: QuerySettings) -> Self {
        Self {
            providers,
            index,
            settings,
            status: Arc::new(|_: &str| {}),
        }
    }

    /// Report progress ("embedding query", "search knn", ...) through `status`
    #[inline]
    pub fn with_status(mut self, status: StatusFn) -> Self {
        self.status = status;
        self
    }

    #[inline]
    pub fn providers(&self) -> &Arc<Providers> {
        &self.providers
    }

    #[inline]
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    #[inline]
    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    /// Embed the query and return the nearest chunks
    #[inline]
    pub async fn retrieve(&self, query: &str, cancel: &CancellationToken) -> Result<Vec<SearchHit>> {
        let top_k = self.settings.top_k;
        if top_k == 0 {
            debug!("Retrieval disabled");
            return Ok(Vec::new());
        }

        let model = &self.settings.embedding_model;
        let provider = self.providers.provider_for(model)?;

        (self.status)("embedding query");
        let vector = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::Cancelled.into()),
            result = provider.client.embed(model, query) => result.map_err(RagError::EmbedQuery)?,
        };

        (self.status)(&format!("search knn (topK={})", top_k));
        let hits = self.index.search_knn(&vector, top_k)?;
        debug!("Retrieved {} chunks for query", hits.len());
        Ok(hits)
    }

    /// Retrieve context and render the user prompt
    #[inline]
    pub async fn build_prompt(&self, query: &str, cancel: &CancellationToken) -> Result<String> {
        let hits = self.retrieve(query, cancel).await?;
        let prompt = build_user_prompt(
            query,
            &hits,
            Some(decode_chunk_meta),
            self.settings.user_prompt_template.as_deref(),
        )?;
        Ok(prompt)
    }

    /// Request for `model`, applying any per-model overrides
    #[inline]
    pub fn request_for(&self, model: &str, prompt: String) -> SendRequest {
        let overrides = self.settings.models.iter().find(|m| m.id == model);
        SendRequest {
            model: model.to_string(),
            prompt,
            temperature: overrides.and_then(|m| m.temperature),
            context_tokens: overrides.and_then(|m| m.context_tokens),
        }
    }

    /// Run a query and stream the answer from `model`
    #[inline]
    pub async fn query(
        &self,
        query: &str,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<AnswerStream> {
        let prompt = self.build_prompt(query, cancel).await?;
        let provider = self.providers.provider_for(model)?;

        (self.status)(&format!("sending to {}", model));
        info!("Sending query to {} via {}", model, provider.base_url());
        let rx = stream(
            Arc::clone(&provider.session),
            self.request_for(model, prompt),
            cancel.clone(),
        );
        Ok(AnswerStream::new(rx))
    }

    /// Run a query and wait for the complete answer from `model`
    #[inline]
    pub async fn answer(&self, query: &str, model: &str, cancel: &CancellationToken) -> Result<Answer> {
        let prompt = self.build_prompt(query, cancel).await?;
        let provider = self.providers.provider_for(model)?;

        (self.status)(&format!("sending to {}", model));
        let response = {
            let mut session = provider.session.lock().await;
            session.send(self.request_for(model, prompt), cancel).await?
        };

        let (text, reasoning) = split_reasoning(&response.content);
        Ok(Answer {
            text,
            reasoning,
            usage: response.usage,
        })
    }

    /// Forget the conversation held for `model`
    #[inline]
    pub async fn reset_conversation(&self, model: &str) -> Result<()> {
        let provider = self.providers.provider_for(model)?;
        provider.session.lock().await.reset();
        Ok(())
    }
}
