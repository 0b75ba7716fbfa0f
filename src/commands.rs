use anyhow::{Context, Result};
use console::style;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::RagError;
use crate::chat::{ChatState, run_chat};
use crate::config::Config;
use crate::ingest::pipeline::PIPED_SOURCE;
use crate::ingest::{StatusFn, chunk_files, chunk_reader, discover};
use crate::lifecycle::RagEnvironment;
use crate::llm::Providers;
use crate::progress::Spinner;
use crate::rag::AnswerEvent;

/// Where the documents to embed come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedInput {
    Paths(Vec<PathBuf>),
    Stdin,
}

impl EmbedInput {
    /// Paths and piped data are mutually exclusive, and one of them is required
    #[inline]
    pub fn select(paths: Vec<PathBuf>, stdin_piped: bool) -> crate::Result<Self> {
        match (paths.is_empty(), stdin_piped) {
            (false, true) => Err(RagError::ConflictingEmbedInputs),
            (true, false) => Err(RagError::NoEmbedInput),
            (true, true) => Ok(Self::Stdin),
            (false, false) => Ok(Self::Paths(paths)),
        }
    }
}

/// `chat` reads questions from stdin, so its documents must come from paths
#[inline]
pub fn require_chat_paths(paths: &[PathBuf]) -> crate::Result<()> {
    if paths.is_empty() {
        return Err(RagError::NoEmbedInput);
    }
    Ok(())
}

/// True when stdin is a pipe or file rather than a terminal
#[inline]
pub fn stdin_is_piped() -> bool {
    !io::stdin().is_terminal()
}

/// Pick the query: `-q` first, then the words after `--`, then the last
/// positional argument. Whatever positionals remain are paths.
#[inline]
pub fn resolve_query(
    flag: Option<String>,
    trailing: &[String],
    separator: bool,
    positionals: &mut Vec<String>,
) -> crate::Result<String> {
    if let Some(query) = flag.filter(|q| !q.trim().is_empty()) {
        return Ok(query);
    }
    if separator {
        if trailing.is_empty() {
            return Err(RagError::MissingQueryAfterSeparator);
        }
        return Ok(trailing.join(" "));
    }
    positionals
        .pop()
        .filter(|q| !q.trim().is_empty())
        .ok_or(RagError::MissingQuery)
}

/// Cancel `cancel` when Ctrl-C is pressed
#[inline]
pub fn cancel_on_interrupt(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}

/// Discover, chunk and embed `input` into the environment's index.
/// Returns the number of chunks stored.
#[inline]
pub async fn ingest(
    env: &RagEnvironment,
    input: EmbedInput,
    status: StatusFn,
    cancel: &CancellationToken,
) -> crate::Result<usize> {
    let size = env.config.embedding.chunk_size;
    let overlap = env.config.embedding.chunk_overlap;

    let sources = match input {
        EmbedInput::Paths(paths) => {
            let files = discover(&paths, &env.patterns)?;
            info!("Discovered {} files", files.len());
            chunk_files(&files, size, overlap)?
        }
        EmbedInput::Stdin => {
            let source = tokio::task::spawn_blocking(move || {
                chunk_reader(PIPED_SOURCE, io::stdin().lock(), size, overlap)
            })
            .await
            .map_err(anyhow::Error::from)??;
            vec![source]
        }
    };

    let stored = env.pipeline().embed_all(sources, status, cancel).await?;
    info!("Embedded {} chunks", stored);
    Ok(stored)
}

/// Options of a single query run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Print the rendered prompt instead of asking the model
    pub dry_run: bool,
    /// Wait for the whole answer instead of streaming it
    pub no_stream: bool,
}

/// Embed the input, ask one question and print the answer
#[inline]
pub async fn run_query(
    env: &RagEnvironment,
    input: EmbedInput,
    query: &str,
    options: QueryOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let spinner = Spinner::new();
    ingest(env, input, spinner.status_fn(), cancel)
        .await
        .context("Failed to embed documents")?;

    let engine = env.engine(spinner.status_fn());
    let model = env.chat_model.as_str();

    if options.dry_run {
        let prompt = engine.build_prompt(query, cancel).await?;
        spinner.clear();
        println!("{prompt}");
        return Ok(());
    }

    if options.no_stream {
        let answer = engine.answer(query, model, cancel).await?;
        spinner.clear();
        if let Some(usage) = answer.usage {
            debug!("Token usage: {:?}", usage);
        }
        println!("{}", answer.text);
        return Ok(());
    }

    let mut answer = engine.query(query, model, cancel).await?;
    let mut stdout = io::stdout();
    let mut started = false;
    while let Some(event) = answer.next().await {
        match event {
            AnswerEvent::Answer(text) => {
                if !started {
                    spinner.clear();
                    started = true;
                }
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            AnswerEvent::ThinkingStarted => spinner.set_message("thinking"),
            AnswerEvent::Reasoning(_) | AnswerEvent::ThinkingEnded => {}
            AnswerEvent::Done => {
                spinner.clear();
                writeln!(stdout)?;
            }
            AnswerEvent::Failed(e) => {
                spinner.clear();
                if started {
                    writeln!(stdout)?;
                }
                return Err(RagError::from(e)).context("Answer stream failed");
            }
        }
    }

    Ok(())
}

/// Embed the paths in the background and start the interactive chat
#[inline]
pub async fn run_chat_session(
    env: &RagEnvironment,
    paths: Vec<PathBuf>,
    cancel: &CancellationToken,
) -> Result<()> {
    require_chat_paths(&paths)?;

    let spinner = Spinner::new();
    let status = spinner.status_fn();
    let progress = spinner.clone();
    let ingesting = async move {
        let result = ingest(env, EmbedInput::Paths(paths), status, cancel).await;
        progress.clear();
        result
    };

    let engine = env.engine(Arc::new(|message: &str| debug!("status: {}", message)));
    let state = ChatState::new(env.chat_model.clone(), env.providers.all_models());
    run_chat(engine, state, ingesting, cancel).await?;
    Ok(())
}

/// Print every provider's base URL followed by the models it serves
#[inline]
pub async fn list_models(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let mut providers =
        Providers::from_settings(&config.provider_settings(), &config.session_options())
            .context("Failed to create providers")?;
    providers
        .fetch_models(cancel)
        .await
        .context("Failed to list models")?;

    for provider in &providers {
        println!("{}", style(provider.base_url()).bold().cyan());
        for model in &provider.available_models {
            println!("  {model}");
        }
    }

    providers.close();
    Ok(())
}

/// Print the resolved configuration as JSON
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    let json = config
        .to_json()
        .context("Failed to serialize configuration")?;
    println!("{json}");
    Ok(())
}

/// Print a commented default configuration file
#[inline]
pub fn generate_config() {
    print!("{}", Config::generate_default());
}

/// Report a configuration that loaded and validated
#[inline]
pub fn report_valid_config(path: &std::path::Path) {
    eprintln!(
        "{} {}",
        style("Configuration is valid:").bold().green(),
        style(path.display()).dim()
    );
}
