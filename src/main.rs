use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use protogate_config::{Config, LogConfig};
use protogate_proxy::AppState;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(Parser, Debug)]
#[command(name = "protogate", about = "protogate: LLM API protocol translation gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway server.
    Serve {
        /// Path to the YAML configuration file.
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Override the listening port (default: 8318).
        #[arg(short, long)]
        port: Option<u16>,
        /// Override the listening address (default: 127.0.0.1).
        #[arg(long)]
        host: Option<String>,
    },
    /// Print every registered conversion pair.
    Pairs {
        /// Path to the YAML configuration file.
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, host } => cmd_serve(config, port, host).await,
        Commands::Pairs { config } => cmd_pairs(config),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    Config::load(path.map(PathBuf::as_path)).context("config error")
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn cmd_serve(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    host: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path.as_ref())?;
    if let Some(p) = port {
        config.port = p;
    }
    if let Some(h) = host {
        config.host = h;
    }
    init_tracing(&config.log);

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config).context("failed to build converter registry")?;
    let app = protogate_proxy::make_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "protogate listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn cmd_pairs(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_ref())?;
    let registry =
        protogate_proxy::build_registry(&config).context("failed to build converter registry")?;
    for key in registry.keys() {
        let routed = config.route(&key.source) == Some(&key.target);
        println!("{key}{}", if routed { "  (routed)" } else { "" });
    }
    Ok(())
}
