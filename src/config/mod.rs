// Configuration management module
// TOML settings plus environment and command-line overrides

pub mod overrides;
pub mod settings;

pub use overrides::{EnvOverrides, Overrides, resolve, resolve_config_path};
pub use settings::{
    Config, ConfigError, EmbeddingConfig, LlmConfig, LoggingConfig, ModelConfig, PromptConfig,
    ProviderConfig,
};
