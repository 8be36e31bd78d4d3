mod config_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    secrecy::Secret,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    commbridge_config::BridgeConfig,
    commbridge_engine::ProxyEngine,
    commbridge_gateway::{ActionRegistry, BridgeState, ChannelManager},
};

#[derive(Parser)]
#[command(
    name = "commbridge",
    about = "Comm bridge between notebook clients and a MATLAB engine proxy"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Engine proxy base URL (overrides config value).
    #[arg(long, global = true, env = "COMMBRIDGE_ENGINE_URL")]
    engine_url: Option<String>,
    /// Engine proxy auth token (overrides config value).
    #[arg(long, global = true, env = "COMMBRIDGE_ENGINE_TOKEN", hide_env_values = true)]
    engine_token: Option<String>,
    /// Explicit config file (skips discovery).
    #[arg(long, global = true, env = "COMMBRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge server (default when no subcommand is provided).
    Serve,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Command-line flags win over file and environment config.
fn apply_overrides(cli: &Cli, mut config: BridgeConfig) -> BridgeConfig {
    if let Some(ref bind) = cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref url) = cli.engine_url {
        config.engine.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(ref token) = cli.engine_token {
        config.engine.auth_token = Some(Secret::new(token.clone()));
    }
    config
}

fn load(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let config = commbridge_config::load_or_discover(cli.config.as_deref())?;
    Ok(apply_overrides(cli, config))
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let config = load(cli)?;

    let engine = Arc::new(ProxyEngine::new(&config.engine)?);
    info!(engine_url = %config.engine.base_url, "engine proxy configured");

    let state = BridgeState::new(engine.clone(), engine.clone(), config.actions.clone());
    let manager = ChannelManager::new(state, ActionRegistry::new());

    let shutdown_engine = Arc::clone(&engine);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
        shutdown_engine.shutdown();
    };

    commbridge_gateway::server::start_server(
        &config.server.bind,
        config.server.port,
        manager,
        shutdown,
    )
    .await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "commbridge starting");

    match cli.command.take() {
        None | Some(Commands::Serve) => serve(&cli).await,
        Some(Commands::Config { action }) => {
            let effective = load(&cli);
            config_commands::handle_config(action, cli.config.as_deref(), effective)
        },
    }
}
