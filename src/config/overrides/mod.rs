#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use tracing::debug;

use super::settings::{Config, ConfigError, ModelConfig, ProviderConfig};

pub const CONFIG_PATH_ENV: &str = "RAGTERM_CONFIG_PATH";
pub const API_BASE_ENV: &str = "OPENAI_API_BASE";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Settings taken from the process environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub config_path: Option<PathBuf>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub log_level: Option<String>,
}

impl EnvOverrides {
    /// Read the recognised variables, ignoring empty ones
    #[inline]
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            config_path: var(CONFIG_PATH_ENV).map(PathBuf::from),
            api_base: var(API_BASE_ENV),
            api_key: var(API_KEY_ENV),
            log_level: var(LOG_LEVEL_ENV),
        }
    }

    /// Add the environment provider and log level to `config`
    #[inline]
    pub fn apply(&self, config: &mut Config) {
        if let Some(base_url) = &self.api_base {
            debug!("Adding provider {} from {}", base_url, API_BASE_ENV);
            config.llm.providers.push(ProviderConfig {
                base_url: base_url.clone(),
                api_key: self.api_key.clone(),
                temperature: None,
            });
        }
        if let Some(level) = &self.log_level {
            config.logging.log_level.clone_from(level);
        }
    }
}

/// Values given on the command line; they win over the file and the environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub temperature: Option<f64>,
    pub context_tokens: Option<usize>,
    pub log_dir: Option<PathBuf>,
    pub log_file: Option<String>,
    pub log_level: Option<String>,
    pub match_patterns: Vec<String>,
}

impl Overrides {
    /// Apply to `config`. Temperature and context attach to the selected
    /// chat model's override entry, or to the defaults when no model is set.
    #[inline]
    pub fn apply(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.llm.default_model = Some(model.clone());
        }
        if let Some(model) = &self.embedding_model {
            config.embedding.embedding_model = Some(model.clone());
        }

        if self.temperature.is_some() || self.context_tokens.is_some() {
            match config.chat_model().map(str::to_string) {
                Some(id) => {
                    let entry = model_entry(&mut config.llm.models, &id);
                    if self.temperature.is_some() {
                        entry.temperature = self.temperature;
                    }
                    if self.context_tokens.is_some() {
                        entry.context_tokens = self.context_tokens;
                    }
                }
                None => {
                    if self.temperature.is_some() {
                        config.llm.default_temperature = self.temperature;
                    }
                    if let Some(context) = self.context_tokens {
                        config.llm.default_context_tokens = context;
                    }
                }
            }
        }

        if let Some(dir) = &self.log_dir {
            config.logging.log_dir = Some(dir.clone());
        }
        if let Some(file) = &self.log_file {
            config.logging.log_file.clone_from(file);
        }
        if let Some(level) = &self.log_level {
            config.logging.log_level.clone_from(level);
        }
        if !self.match_patterns.is_empty() {
            config.embedding.match_patterns.clone_from(&self.match_patterns);
        }
    }
}

fn model_entry<'a>(models: &'a mut Vec<ModelConfig>, id: &str) -> &'a mut ModelConfig {
    let pos = models.iter().position(|m| m.id == id).unwrap_or_else(|| {
        models.push(ModelConfig {
            id: id.to_string(),
            ..ModelConfig::default()
        });
        models.len() - 1
    });
    &mut models[pos]
}

/// Config file to read and whether it must exist: the explicit path, then
/// the environment, then `~/.ragterm.toml`.
#[inline]
pub fn resolve_config_path(
    explicit: Option<&Path>,
    env: &EnvOverrides,
) -> Result<(PathBuf, bool), ConfigError> {
    if let Some(path) = explicit.map(Path::to_path_buf).or_else(|| env.config_path.clone()) {
        return Ok((path, true));
    }
    Ok((Config::default_path()?, false))
}

/// Load the config file and layer the environment, then the command line, on top.
/// The result is validated.
#[inline]
pub fn resolve(
    explicit: Option<&Path>,
    env: &EnvOverrides,
    overrides: &Overrides,
) -> Result<Config, ConfigError> {
    let (path, required) = resolve_config_path(explicit, env)?;
    debug!("Loading configuration from {}", path.display());

    let mut config = Config::load(&path, required)?;
    env.apply(&mut config);
    overrides.apply(&mut config);
    config.ensure_default_provider();
    config.validate()?;
    Ok(config)
}
