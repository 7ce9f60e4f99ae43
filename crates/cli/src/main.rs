mod chat_commands;
mod check_commands;
mod handler_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    catmandu_config::CatmanduConfig,
    catmandu_mcp::{HandlerRegistry, RetryPolicy, SessionOrchestrator},
    catmandu_routing::ChatLogger,
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "catmandu", about = "Catmandu, a chat bot driving MCP handlers", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (overrides discovery of ./catmandu.{toml,yaml,yml,json}).
    #[arg(long, global = true, env = "CATMANDU_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat on the console: stdin lines are messages, replies go to stdout
    /// (default when no subcommand is provided).
    Chat(chat_commands::ChatArgs),
    /// List discovered handlers and their commands.
    Handlers,
    /// Call a handler tool directly and print its raw result.
    Invoke(handler_commands::InvokeArgs),
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

/// Logs go to stderr so stdout carries only replies and results.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<CatmanduConfig> {
    let Some(path) = path else {
        return Ok(catmandu_config::discover_and_load());
    };
    let mut config = catmandu_config::load_config(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    catmandu_config::apply_env_overrides(&mut config);
    Ok(config)
}

/// Scan the configured handlers directory. Unusable manifests are logged and
/// skipped; an empty registry is not an error.
fn load_registry(config: &CatmanduConfig) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    let loaded = registry.scan(&config.handlers.dir, &config.handlers.manifest_name);
    for warning in registry.warnings() {
        warn!("{warning}");
    }
    info!(
        dir = %config.handlers.dir.display(),
        handlers = loaded,
        "handler registry loaded"
    );
    registry
}

fn orchestrator(config: &CatmanduConfig) -> Arc<SessionOrchestrator> {
    let policy = RetryPolicy::new(config.retry.backoff_base());
    Arc::new(SessionOrchestrator::new(
        Arc::new(catmandu_mcp::McpSessionFactory),
        policy,
    ))
}

/// The chat log is optional; a directory that cannot be created disables it.
fn chat_log(config: &CatmanduConfig) -> Option<ChatLogger> {
    if !config.chat_log.enabled {
        return None;
    }
    match ChatLogger::new(&config.chat_log.dir) {
        Ok(logger) => Some(logger),
        Err(e) => {
            warn!(
                dir = %config.chat_log.dir.display(),
                error = %e,
                "chat log disabled"
            );
            None
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "catmandu starting");

    if let Some(Commands::Check { verbose }) = cli.command {
        return check_commands::check(cli.config.as_deref(), verbose);
    }

    let config = load_config(cli.config.as_deref())?;
    let registry = load_registry(&config);

    match cli.command {
        None => chat_commands::run(&config, registry, chat_commands::ChatArgs::default()).await,
        Some(Commands::Chat(args)) => chat_commands::run(&config, registry, args).await,
        Some(Commands::Handlers) => {
            handler_commands::list(&registry);
            Ok(())
        },
        Some(Commands::Invoke(args)) => {
            handler_commands::invoke(&registry, orchestrator(&config), args).await
        },
        Some(Commands::Check { .. }) => Ok(()),
    }
}
