//! a3s-link - messaging session lifecycle and credential relay
//!
//! Serves the HTTP control surface over a messaging client, either through
//! the protocol bridge sidecar or the in-process memory provider.

use a3s_link::api::build_app;
use a3s_link::config::{load_config, LinkConfig};
use a3s_link::provider::bridge::BridgeProvider;
use a3s_link::provider::memory::MemoryProvider;
use a3s_link::provider::MessagingProvider;
use a3s_link::service::LinkService;
use a3s_link::store::FileCredentialStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "a3s-link")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Messaging session lifecycle and credential relay")]
struct Cli {
    /// Configuration file path (.hcl)
    #[arg(short, long, env = "A3S_LINK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP control surface
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// Base URL of the protocol bridge
        #[arg(long)]
        bridge_url: Option<String>,

        /// Directory holding per-session credentials
        #[arg(long)]
        sessions_dir: Option<PathBuf>,

        /// Messaging backend
        #[arg(long, value_enum, default_value_t = ProviderKind::Bridge)]
        provider: ProviderKind,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    /// HTTP bridge to the protocol sidecar
    Bridge,
    /// In-process fake, nothing leaves the machine
    Memory,
}

#[tokio::main]
async fn main() -> Result<()> {
    a3s_link::command::process_start();
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("a3s_link={},tower_http={}", log_level, log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let (mut config, _config_path) = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            bridge_url,
            sessions_dir,
            provider,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(url) = bridge_url {
                config.bridge.url = url;
            }
            if let Some(dir) = sessions_dir {
                config.sessions.dir = dir;
            }
            run_server(config, provider).await?;
        }
        Commands::Config { default } => {
            let config = if default {
                LinkConfig::default()
            } else {
                config
            };
            println!("{}", config.to_hcl()?);
        }
    }

    Ok(())
}

/// Serve until Ctrl-C, then close every session
async fn run_server(config: LinkConfig, kind: ProviderKind) -> Result<()> {
    std::fs::create_dir_all(&config.sessions.dir).with_context(|| {
        format!(
            "Failed to create sessions directory {}",
            config.sessions.dir.display()
        )
    })?;
    let store = Arc::new(FileCredentialStore::new(config.sessions.dir.clone()));
    let sessions_dir = store.root().display().to_string();

    let provider: Arc<dyn MessagingProvider> = match kind {
        ProviderKind::Bridge => Arc::new(
            BridgeProvider::new(config.bridge.clone())
                .context("Failed to create bridge provider")?,
        ),
        ProviderKind::Memory => Arc::new(MemoryProvider::default()),
    };

    let service = Arc::new(LinkService::from_config(&config, provider, store));
    let app = build_app(service.clone(), &config.server.cors_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        addr = %addr,
        provider = %service.provider_name(),
        sessions_dir = %sessions_dir,
        "a3s-link listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .context("HTTP server error")?;

    tracing::info!("Shutting down");
    service.shutdown().await;
    Ok(())
}
