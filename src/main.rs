use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ragterm::commands::{
    EmbedInput, QueryOptions, cancel_on_interrupt, generate_config, list_models,
    report_valid_config, require_chat_paths, resolve_query, run_chat_session, run_query,
    show_config, stdin_is_piped,
};
use ragterm::config::{self, Config, EnvOverrides, Overrides};
use ragterm::lifecycle::{Cleanup, RagEnvironment, init_logging};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "ragterm")]
#[command(about = "Ask questions about local documents with any OpenAI-compatible model")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Configuration file (default: $RAGTERM_CONFIG_PATH or ~/.ragterm.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Chat model
    #[arg(short, long, global = true)]
    model: Option<String>,
    /// Embedding model
    #[arg(short, long, global = true)]
    embedding_model: Option<String>,
    /// Sampling temperature for the chat model
    #[arg(long, global = true)]
    temp: Option<f64>,
    /// Context window of the chat model in tokens
    #[arg(long, global = true)]
    context: Option<usize>,
    /// Directory for the log file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    /// Log file name
    #[arg(long, global = true)]
    log_file: Option<String>,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Only embed paths matching this regular expression (repeatable)
    #[arg(short = 'M', long = "match", global = true)]
    match_patterns: Vec<String>,
}

impl GlobalArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            model: self.model.clone(),
            embedding_model: self.embedding_model.clone(),
            temperature: self.temp,
            context_tokens: self.context,
            log_dir: self.log_dir.clone(),
            log_file: self.log_file.clone(),
            log_level: self.log_level.clone(),
            match_patterns: self.match_patterns.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Embed documents and answer one question about them
    #[command(visible_alias = "q")]
    Query {
        /// Files or directories to embed; the last one is the query when no -q or -- is given
        paths: Vec<String>,
        /// The question to ask
        #[arg(short, long)]
        query: Option<String>,
        /// Print the prompt that would be sent and exit
        #[arg(long)]
        dry_run: bool,
        /// Print the answer once it is complete instead of streaming it
        #[arg(long)]
        no_stream: bool,
        /// The question, as the words after --
        #[arg(last = true)]
        rest: Vec<String>,
    },
    /// Embed documents and chat about them interactively
    Chat {
        /// Files or directories to embed
        paths: Vec<PathBuf>,
    },
    /// List the models served by each provider
    List,
    /// Show, generate or validate the configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum ConfigAction {
    /// Print the resolved configuration as JSON
    Show,
    /// Print a commented default configuration file
    Generate,
    /// Load the configuration file and check every value
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let separator = std::env::args().any(|arg| arg == "--");
    let cli = Cli::parse();

    let mut cleanup = Cleanup::new();
    let result = run(cli, separator, &mut cleanup).await;
    let cleanup_result = cleanup.run();

    let mut code = ExitCode::SUCCESS;
    if let Err(e) = result {
        eprintln!("ragterm: {e:#}");
        code = ExitCode::FAILURE;
    }
    if let Err(e) = cleanup_result {
        eprintln!("ragterm: {e}");
        code = ExitCode::FAILURE;
    }
    code
}

async fn run(cli: Cli, separator: bool, cleanup: &mut Cleanup) -> Result<()> {
    if let Commands::Config {
        action: Some(ConfigAction::Generate),
    } = cli.command
    {
        generate_config();
        return Ok(());
    }

    let env = EnvOverrides::from_env();
    let config_path = cli.global.config.as_deref();
    let config = config::resolve(config_path, &env, &cli.global.overrides())
        .context("Failed to load configuration")?;
    init_logging(&config, cleanup).context("Failed to open log file")?;

    let cancel = CancellationToken::new();
    match cli.command {
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => show_config(&config)?,
            ConfigAction::Generate => generate_config(),
            ConfigAction::Validate => {
                let (path, _) = config::resolve_config_path(config_path, &env)?;
                report_valid_config(&path);
            }
        },
        Commands::List => {
            cancel_on_interrupt(&cancel);
            list_models(&config, &cancel).await?;
        }
        Commands::Query {
            mut paths,
            query,
            dry_run,
            no_stream,
            rest,
        } => {
            let query = resolve_query(query, &rest, separator, &mut paths)?;
            let paths = paths.into_iter().map(PathBuf::from).collect();
            let input = EmbedInput::select(paths, stdin_is_piped())?;

            cancel_on_interrupt(&cancel);
            let env = start(config, cleanup, &cancel).await?;
            let options = QueryOptions { dry_run, no_stream };
            run_query(&env, input, &query, options, &cancel).await?;
        }
        Commands::Chat { paths } => {
            require_chat_paths(&paths)?;
            let env = start(config, cleanup, &cancel).await?;
            run_chat_session(&env, paths, &cancel).await?;
        }
    }

    Ok(())
}

async fn start(
    config: Config,
    cleanup: &mut Cleanup,
    cancel: &CancellationToken,
) -> Result<RagEnvironment> {
    RagEnvironment::start(config, cleanup, cancel)
        .await
        .context("Failed to start")
}
