
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use itertools::Itertools;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::index::VectorIndex;
use crate::ingest::{EmbeddingPipeline, MatchPatterns, StatusFn};
use crate::llm::Providers;
use crate::rag::RagEngine;
use crate::{RagError, Result};

type CleanupFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Every failure from one cleanup run
#[derive(Debug, Error)]
#[error("cleanup: {}", .errors.iter().map(|e| format!("{e:#}")).join("; "))]
pub struct CleanupError {
    pub errors: Vec<anyhow::Error>,
}

/// Deferred shutdown callbacks, run newest first
#[derive(Default)]
pub struct Cleanup {
    callbacks: Vec<(String, CleanupFn)>,
}

impl fmt::Debug for Cleanup {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.callbacks.iter().map(|(name, _)| name))
            .finish()
    }
}

impl Cleanup {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.callbacks.push((name.into(), Box::new(callback)));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Run every callback in reverse registration order, even after failures
    #[inline]
    pub fn run(&mut self) -> std::result::Result<(), CleanupError> {
        let mut errors = Vec::new();
        while let Some((name, callback)) = self.callbacks.pop() {
            debug!("Running cleanup: {}", name);
            if let Err(e) = callback() {
                errors.push(e.context(name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CleanupError { errors })
        }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if let Err(e) = self.run() {
            warn!("{}", e);
        }
    }
}

/// Open `<dir>/<file>` for appending, creating the directory if needed
#[inline]
pub fn open_log_file(dir: &Path, file: &str) -> Result<(File, PathBuf)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file);
    let handle = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((handle, path))
}

/// Send `tracing` output to the configured log file.
/// Syncing the file is registered as a cleanup.
#[inline]
pub fn init_logging(config: &Config, cleanup: &mut Cleanup) -> Result<PathBuf> {
    let (file, path) = open_log_file(&config.log_dir()?, &config.logging.log_file)?;
    let sync = file.try_clone()?;

    let filter = EnvFilter::try_new(&config.logging.log_level)
        .map_err(|e| RagError::Logging(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| RagError::Logging(e.to_string()))?;

    cleanup.push("sync log file", move || {
        sync.sync_all()?;
        Ok(())
    });
    info!("Logging to {}", path.display());
    Ok(path)
}

/// Providers, index and validated model selection for one run
#[derive(Debug)]
pub struct RagEnvironment {
    pub config: Config,
    pub providers: Arc<Providers>,
    pub index: Arc<VectorIndex>,
    pub chat_model: String,
    pub embedding_model: String,
    pub patterns: MatchPatterns,
}

impl RagEnvironment {
    /// Build providers from `config` and run the startup sequence
    #[inline]
    pub async fn start(
        config: Config,
        cleanup: &mut Cleanup,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let (chat_model, embedding_model, patterns) = validate_selection(&config)?;
        let providers =
            Providers::from_settings(&config.provider_settings(), &config.session_options())?;
        Self::assemble(
            config,
            providers,
            (chat_model, embedding_model, patterns),
            cleanup,
            cancel,
        )
        .await
    }

    /// Run the startup sequence with already constructed providers
    #[inline]
    pub async fn start_with(
        config: Config,
        providers: Providers,
        cleanup: &mut Cleanup,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let selection = validate_selection(&config)?;
        Self::assemble(config, providers, selection, cleanup, cancel).await
    }

    async fn assemble(
        config: Config,
        mut providers: Providers,
        (chat_model, embedding_model, patterns): (String, String, MatchPatterns),
        cleanup: &mut Cleanup,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        providers.fetch_models(cancel).await?;
        let providers = Arc::new(providers);
        let closing = Arc::clone(&providers);
        cleanup.push("close providers", move || {
            closing.close();
            Ok(())
        });

        let missing = [&chat_model, &embedding_model]
            .into_iter()
            .filter(|m| providers.provider_for(m).is_err())
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(RagError::InvalidSelectedModel(missing));
        }

        let dim = providers.embedding_dim(&embedding_model, cancel).await?;
        let index = Arc::new(VectorIndex::create(dim, &config.index_options())?);
        let closing = Arc::clone(&index);
        cleanup.push("close vector index", move || {
            closing.close()?;
            Ok(())
        });
        info!(
            "Ready: chat model {}, embedding model {} (dim {})",
            chat_model, embedding_model, dim
        );

        Ok(Self {
            config,
            providers,
            index,
            chat_model,
            embedding_model,
            patterns,
        })
    }

    /// Pipeline that embeds into this environment's index
    #[inline]
    pub fn pipeline(&self) -> EmbeddingPipeline {
        EmbeddingPipeline::new(
            Arc::clone(&self.providers),
            Arc::clone(&self.index),
            self.embedding_model.clone(),
        )
    }

    /// Query engine reporting progress through `status`
    #[inline]
    pub fn engine(&self, status: StatusFn) -> RagEngine {
        RagEngine::new(
            Arc::clone(&self.providers),
            Arc::clone(&self.index),
            self.config.query_settings(),
        )
        .with_status(status)
    }
}

fn validate_selection(config: &Config) -> Result<(String, String, MatchPatterns)> {
    let chat_model = config.chat_model().ok_or(RagError::MissingChatModel)?;
    let embedding_model = config
        .embedding_model()
        .ok_or(RagError::MissingEmbeddingModel)?;
    let patterns = MatchPatterns::compile(&config.embedding.match_patterns)?;
    Ok((chat_model.to_string(), embedding_model.to_string(), patterns))
}
