use super::*;
use serial_test::serial;
use tempfile::TempDir;

fn clear_env() {
    // SAFETY: env-touching tests are serialized
    unsafe {
        for name in [CONFIG_PATH_ENV, API_BASE_ENV, API_KEY_ENV, LOG_LEVEL_ENV] {
            std::env::remove_var(name);
        }
    }
}

#[test]
#[serial]
fn reads_environment() {
    clear_env();
    // SAFETY: env-touching tests are serialized
    unsafe {
        std::env::set_var(API_BASE_ENV, "https://api.example.com/v1");
        std::env::set_var(API_KEY_ENV, "sk-test");
        std::env::set_var(LOG_LEVEL_ENV, "debug");
        std::env::set_var(CONFIG_PATH_ENV, "");
    }

    let env = EnvOverrides::from_env();
    clear_env();

    assert_eq!(env.api_base.as_deref(), Some("https://api.example.com/v1"));
    assert_eq!(env.api_key.as_deref(), Some("sk-test"));
    assert_eq!(env.log_level.as_deref(), Some("debug"));
    assert_eq!(env.config_path, None);
}

#[test]
fn environment_adds_provider() {
    let env = EnvOverrides {
        api_base: Some("https://api.example.com/v1".to_string()),
        api_key: Some("sk-test".to_string()),
        log_level: Some("warn".to_string()),
        ..EnvOverrides::default()
    };

    let mut config = Config::default();
    env.apply(&mut config);
    config.ensure_default_provider();

    assert_eq!(config.llm.providers.len(), 1);
    assert_eq!(config.llm.providers[0].base_url, "https://api.example.com/v1");
    assert_eq!(config.llm.providers[0].api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.logging.log_level, "warn");
}

#[test]
fn command_line_overrides() {
    let overrides = Overrides {
        model: Some("llama3".to_string()),
        embedding_model: Some("nomic".to_string()),
        temperature: Some(0.2),
        context_tokens: Some(1024),
        log_file: Some("run.log".to_string()),
        match_patterns: vec![r"\.md$".to_string()],
        ..Overrides::default()
    };

    let mut config = Config::default();
    config.llm.models.push(ModelConfig {
        id: "llama3".to_string(),
        context_tokens: Some(8192),
        temperature: None,
    });
    overrides.apply(&mut config);

    assert_eq!(config.chat_model(), Some("llama3"));
    assert_eq!(config.embedding_model(), Some("nomic"));
    assert_eq!(config.llm.models.len(), 1);
    assert_eq!(config.llm.models[0].context_tokens, Some(1024));
    assert_eq!(config.llm.models[0].temperature, Some(0.2));
    assert_eq!(config.llm.default_temperature, None);
    assert_eq!(config.logging.log_file, "run.log");
    assert_eq!(config.embedding.match_patterns, vec![r"\.md$".to_string()]);
}

#[test]
fn overrides_without_model_set_defaults() {
    let overrides = Overrides {
        temperature: Some(1.5),
        context_tokens: Some(512),
        ..Overrides::default()
    };

    let mut config = Config::default();
    overrides.apply(&mut config);

    assert!(config.llm.models.is_empty());
    assert_eq!(config.llm.default_temperature, Some(1.5));
    assert_eq!(config.llm.default_context_tokens, 512);
}

#[test]
fn config_path_precedence() {
    let env = EnvOverrides {
        config_path: Some(PathBuf::from("/from/env.toml")),
        ..EnvOverrides::default()
    };

    let (path, required) = resolve_config_path(Some(Path::new("/from/flag.toml")), &env)
        .expect("should resolve path");
    assert_eq!(path, PathBuf::from("/from/flag.toml"));
    assert!(required);

    let (path, required) = resolve_config_path(None, &env).expect("should resolve path");
    assert_eq!(path, PathBuf::from("/from/env.toml"));
    assert!(required);
}

#[test]
fn resolve_layers_and_validates() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[llm]
default_model = "from-file"

[logging]
log_level = "error"
"#,
    )
    .expect("should write config");

    let env = EnvOverrides {
        log_level: Some("debug".to_string()),
        ..EnvOverrides::default()
    };
    let overrides = Overrides {
        model: Some("from-flag".to_string()),
        ..Overrides::default()
    };

    let config = resolve(Some(&path), &env, &overrides).expect("should resolve config");
    assert_eq!(config.chat_model(), Some("from-flag"));
    assert_eq!(config.logging.log_level, "debug");
    assert_eq!(config.llm.providers.len(), 1);
}

#[test]
fn resolve_reports_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[[llm.providers]]\nbase_url = \"http://localhost:11434\"\n")
        .expect("should write config");

    let err = resolve(Some(&path), &EnvOverrides::default(), &Overrides::default())
        .expect_err("should reject base url");
    assert!(matches!(err, ConfigError::InvalidBaseUrl { .. }));
}

#[test]
fn resolve_requires_explicit_file() {
    let temp_dir = TempDir::new().expect("should create temp directory");
    let path = temp_dir.path().join("missing.toml");

    let err = resolve(Some(&path), &EnvOverrides::default(), &Overrides::default())
        .expect_err("should require file");
    assert!(matches!(err, ConfigError::NotFound(_)));
}
