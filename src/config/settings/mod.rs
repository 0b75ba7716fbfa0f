
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::index::{IndexOptions, Metric};
use crate::llm::{ProviderSettings, SessionOptions};
use crate::rag::{DEFAULT_SYSTEM_PROMPT, QuerySettings};

pub const CONFIG_FILE_NAME: &str = ".ragterm.toml";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_CHUNK_SIZE: usize = 600;
pub const DEFAULT_CHUNK_OVERLAP: usize = 60;
pub const DEFAULT_TOP_K: usize = 10;
pub const DEFAULT_LOG_FILE: &str = "ragterm.log";
pub const DEFAULT_LOG_LEVEL: &str = "info";
const APP_DIR: &str = "ragterm";
const MAX_TEMPERATURE: f64 = 2.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub prompt: PromptConfig,
    pub embedding: EmbeddingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    /// Context window used when a model has no override; zero disables truncation
    pub default_context_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_temperature: Option<f64>,
    pub providers: Vec<ProviderConfig>,
    pub models: Vec<ModelConfig>,
}

/// One OpenAI-compatible endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Per-model request overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default, alias = "context", skip_serializing_if = "Option::is_none")]
    pub context_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_prompt_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    pub chunk_size: usize,
    #[serde(alias = "overlap")]
    pub chunk_overlap: usize,
    #[serde(alias = "retrieval_top_k")]
    pub top_k: usize,
    pub metric: Metric,
    /// Append embedded rows to this file instead of keeping them only in memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_path: Option<PathBuf>,
    /// Regular expressions a discovered path must match
    pub match_patterns: Vec<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            embedding_model: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            metric: Metric::default(),
            index_path: None,
            match_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    pub log_file: String,
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_file: DEFAULT_LOG_FILE.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("Invalid temperature for {field}: {value} (must be between 0 and 2)")]
    InvalidTemperature { field: String, value: f64 },
    #[error("Invalid model id: {0} (cannot be empty)")]
    EmptyModelId(String),
    #[error("Invalid chunk size: {0} (must be greater than 0)")]
    InvalidChunkSize(usize),
    #[error("Invalid chunk overlap: {overlap} (must be less than chunk size {size})")]
    InvalidChunkOverlap { overlap: usize, size: usize },
    #[error("Invalid log file name: {0:?} (must not contain '/')")]
    InvalidLogFile(String),
    #[error("Invalid log level: {0:?}")]
    InvalidLogLevel(String),
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Home directory could not be determined")]
    HomeDirectory,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Config {
    /// `~/.ragterm.toml`
    #[inline]
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::HomeDirectory)
    }

    /// Parse a TOML document without validating it
    #[inline]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read the file at `path`. A missing file is an error when `required`,
    /// otherwise it yields the defaults.
    #[inline]
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        if !path.exists() {
            if required {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    #[inline]
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Pretty JSON with API keys masked
    #[inline]
    pub fn to_json(&self) -> Result<String, ConfigError> {
        let mut shown = self.clone();
        for provider in &mut shown.llm.providers {
            if provider.api_key.is_some() {
                provider.api_key = Some("********".to_string());
            }
        }
        Ok(serde_json::to_string_pretty(&shown)?)
    }

    /// Add the local default provider when none is configured
    #[inline]
    pub fn ensure_default_provider(&mut self) {
        if self.llm.providers.is_empty() {
            self.llm.providers.push(ProviderConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                api_key: None,
                temperature: None,
            });
        }
    }

    /// Check every value, returning the first problem found
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.llm.validate()?;
        self.embedding.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// The chat model, if one was selected
    #[inline]
    pub fn chat_model(&self) -> Option<&str> {
        non_empty(self.llm.default_model.as_deref())
    }

    #[inline]
    pub fn embedding_model(&self) -> Option<&str> {
        non_empty(self.embedding.embedding_model.as_deref())
    }

    /// Directory holding the log file
    #[inline]
    pub fn log_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.logging.log_dir {
            return Ok(dir.clone());
        }
        dirs::state_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
            .map(|state| state.join(APP_DIR))
            .ok_or(ConfigError::HomeDirectory)
    }

    #[inline]
    pub fn log_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.log_dir()?.join(&self.logging.log_file))
    }

    #[inline]
    pub fn provider_settings(&self) -> Vec<ProviderSettings> {
        self.llm
            .providers
            .iter()
            .map(|p| ProviderSettings {
                base_url: p.base_url.clone(),
                api_key: p.api_key.clone().filter(|k| !k.is_empty()),
                temperature: p.temperature,
            })
            .collect()
    }

    #[inline]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            system_prompt: self
                .prompt
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            context_tokens: self.llm.default_context_tokens,
            temperature: self.llm.default_temperature,
            ..SessionOptions::default()
        }
    }

    #[inline]
    pub fn query_settings(&self) -> QuerySettings {
        QuerySettings {
            embedding_model: self.embedding_model().unwrap_or_default().to_string(),
            top_k: self.embedding.top_k,
            user_prompt_template: self.prompt.user_prompt_template.clone(),
            models: self.llm.models.clone(),
        }
    }

    #[inline]
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            path: self.embedding.index_path.clone(),
            metric: self.embedding.metric,
        }
    }

    /// A commented configuration file holding the defaults
    #[inline]
    pub fn generate_default() -> String {
        format!(
            r#"# ragterm configuration

[llm]
# Chat model used when --model is not given
# default_model = "llama3.1"
# Context window in tokens; 0 sends the whole history
default_context_tokens = 0
# default_temperature = 0.7

# OpenAI-compatible endpoints, tried in order when looking up a model
[[llm.providers]]
base_url = "{DEFAULT_BASE_URL}"
# api_key = "sk-..."
# temperature = 0.7

# Per-model overrides
# [[llm.models]]
# id = "llama3.1"
# context = 8192
# temperature = 0.2

[prompt]
# system_prompt = "You are a helpful assistant."
# user_prompt_template = "{{{{ Query }}}}"

[embedding]
# embedding_model = "nomic-embed-text"
chunk_size = {DEFAULT_CHUNK_SIZE}
chunk_overlap = {DEFAULT_CHUNK_OVERLAP}
# Chunks retrieved per query; 0 disables retrieval
top_k = {DEFAULT_TOP_K}
# "l2" or "cosine"
metric = "l2"
# index_path = "/tmp/ragterm-index.jsonl"
# Only embed paths matching one of these regular expressions
match_patterns = []

[logging]
# log_dir = "~/.local/state/ragterm"
log_file = "{DEFAULT_LOG_FILE}"
log_level = "{DEFAULT_LOG_LEVEL}"
"#
        )
    }
}

impl LlmConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_temperature("llm.default_temperature", self.default_temperature)?;

        for provider in &self.providers {
            validate_base_url(&provider.base_url)?;
            validate_temperature(
                &format!("provider {}", provider.base_url),
                provider.temperature,
            )?;
        }

        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(ConfigError::EmptyModelId(model.id.clone()));
            }
            validate_temperature(&format!("model {}", model.id), model.temperature)?;
        }

        if let Some(model) = self.default_model.as_ref().filter(|m| m.trim().is_empty()) {
            return Err(ConfigError::EmptyModelId(model.clone()));
        }

        Ok(())
    }
}

impl EmbeddingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::InvalidChunkOverlap {
                overlap: self.chunk_overlap,
                size: self.chunk_size,
            });
        }
        Ok(())
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_file.is_empty() || self.log_file.contains('/') {
            return Err(ConfigError::InvalidLogFile(self.log_file.clone()));
        }
        self.log_level
            .parse::<LevelFilter>()
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))?;
        Ok(())
    }
}

/// A base URL must parse, name a host, carry no query or fragment and end in `/v1`
#[inline]
pub fn validate_base_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query and fragment are not allowed"));
    }
    if !url.path().trim_end_matches('/').ends_with("/v1") {
        return Err(invalid("path must end with /v1"));
    }
    Ok(())
}

fn validate_temperature(field: &str, value: Option<f64>) -> Result<(), ConfigError> {
    match value {
        Some(t) if !(0.0..=MAX_TEMPERATURE).contains(&t) => Err(ConfigError::InvalidTemperature {
            field: field.to_string(),
            value: t,
        }),
        _ => Ok(()),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
