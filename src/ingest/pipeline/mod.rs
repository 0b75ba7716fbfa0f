
use std::ops::Range;
use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chunking::SourceChunks;
use crate::index::{IndexError, NewRow, VectorIndex};
use crate::llm::{LlmError, Providers};

/// Chunks sent per embedding request
pub const EMBED_BATCH_SIZE: usize = 64;

/// Sources embedded at the same time
pub const EMBED_CONCURRENCY: usize = 8;

/// Source name used for text read from standard input
pub const PIPED_SOURCE: &str = "piped-data";

/// Receives human-readable progress lines
pub type StatusFn = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("embed batch {source_name:?} [{}:{}]: {error}", .range.start, .range.end)]
    EmbedBatch {
        source_name: String,
        range: Range<usize>,
        #[source]
        error: LlmError,
    },
    #[error(
        "embed batch {source_name:?} [{}:{}]: want {want}, got {got} vectors",
        .range.start,
        .range.end
    )]
    EmbedCountMismatch {
        source_name: String,
        range: Range<usize>,
        want: usize,
        got: usize,
    },
    #[error("vectordb insert {source_name:?} [{}:{}]: {error}", .range.start, .range.end)]
    Insert {
        source_name: String,
        range: Range<usize>,
        #[source]
        error: IndexError,
    },
    #[error(transparent)]
    Provider(LlmError),
    #[error("embedding cancelled")]
    Cancelled,
    #[error("embedding worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// Embeds chunked sources with one model and stores them in the index
#[derive(Debug, Clone)]
pub struct EmbeddingPipeline {
    providers: Arc<Providers>,
    index: Arc<VectorIndex>,
    model: String,
    batch_size: usize,
    concurrency: usize,
}

impl EmbeddingPipeline {
    #[inline]
    pub fn new(providers: Arc<Providers>, index: Arc<VectorIndex>, model: impl Into<String>) -> Self {
        Self {
            providers,
            index,
            model: model.into(),
            batch_size: EMBED_BATCH_SIZE,
            concurrency: EMBED_CONCURRENCY,
        }
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Embed one source batch by batch, in order. Returns the number of rows stored.
    ///
    /// Each batch is inserted atomically; batches stored before a failure stay stored.
    #[inline]
    pub async fn embed_source(
        &self,
        source: &SourceChunks,
        cancel: &CancellationToken,
    ) -> Result<usize, PipelineError> {
        let provider = self
            .providers
            .provider_for(&self.model)
            .map_err(PipelineError::Provider)?;

        let total = source.chunks.len();
        let mut stored = 0;

        for start in (0..total).step_by(self.batch_size) {
            let range = start..(start + self.batch_size).min(total);
            let batch = &source.chunks[range.clone()];

            let vectors = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineError::Cancelled),
                result = provider.client.embed_batch(&self.model, batch) => {
                    result.map_err(|error| PipelineError::EmbedBatch {
                        source_name: source.source.clone(),
                        range: range.clone(),
                        error,
                    })?
                }
            };

            if vectors.len() != batch.len() {
                return Err(PipelineError::EmbedCountMismatch {
                    source_name: source.source.clone(),
                    range,
                    want: batch.len(),
                    got: vectors.len(),
                });
            }

            let rows = batch
                .iter()
                .zip(vectors)
                .enumerate()
                .map(|(offset, (content, vector))| NewRow {
                    content: content.clone(),
                    meta: json!({ "source": source.source, "ordinal": start + offset }),
                    vector,
                })
                .collect();

            let ids = self.index.insert(rows).map_err(|error| PipelineError::Insert {
                source_name: source.source.clone(),
                range: range.clone(),
                error,
            })?;

            stored += ids.len();
            debug!(
                "Stored {} [{}:{}] ({} rows)",
                source.source,
                range.start,
                range.end,
                ids.len()
            );
        }

        Ok(stored)
    }

    /// Embed many sources with bounded concurrency.
    ///
    /// The first failure cancels every other worker; once they have drained
    /// that failure is returned. Returns the total number of rows stored.
    #[inline]
    pub async fn embed_all(
        &self,
        sources: Vec<SourceChunks>,
        status: StatusFn,
        cancel: &CancellationToken,
    ) -> Result<usize, PipelineError> {
        let total = sources.len();
        let token = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        let mut first_error = None;
        let mut stored = 0;
        let mut scheduled = 0;

        for (i, source) in sources.into_iter().enumerate() {
            while let Some(result) = workers.try_join_next() {
                record(result, &mut stored, &mut first_error, &token);
            }
            if first_error.is_some() {
                break;
            }

            let permit = tokio::select! {
                biased;
                () = token.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            // A worker that failed while we waited released its permit after cancelling
            if token.is_cancelled() {
                break;
            }

            let pipeline = self.clone();
            let token = token.clone();
            let status = Arc::clone(&status);
            scheduled += 1;

            workers.spawn(async move {
                let _permit = permit;
                status(&format!("embedding [{}/{}] {}", i + 1, total, source.source));
                let result = pipeline.embed_source(&source, &token).await;
                // Cancel before the permit is released so no queued source starts
                if result.is_err() {
                    token.cancel();
                }
                result
            });
        }

        while let Some(result) = workers.join_next().await {
            record(result, &mut stored, &mut first_error, &token);
        }

        if let Some(error) = first_error {
            warn!("Embedding stopped after {} rows: {}", stored, error);
            return Err(error);
        }
        if scheduled < total {
            return Err(PipelineError::Cancelled);
        }

        info!("Embedded {} sources into {} rows", total, stored);
        Ok(stored)
    }
}

fn record(
    result: Result<Result<usize, PipelineError>, JoinError>,
    stored: &mut usize,
    first_error: &mut Option<PipelineError>,
    token: &CancellationToken,
) {
    let error = match result {
        Ok(Ok(rows)) => {
            *stored += rows;
            return;
        }
        Ok(Err(error)) => error,
        Err(join) => PipelineError::Worker(join),
    };

    token.cancel();
    // Workers stopped by the cancellation report `Cancelled`; keep the cause instead
    let replace = match first_error {
        None => true,
        Some(PipelineError::Cancelled) => !matches!(error, PipelineError::Cancelled),
        Some(_) => false,
    };
    if replace {
        *first_error = Some(error);
    }
}
