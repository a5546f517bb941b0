//! opsdeck server
//!
//! Hosts the toolkit management API, serves installed bundle assets and
//! routes requests to enabled toolkits.
//!
//! Usage:
//!   opsdeck-server --config opsdeck.toml
//!   opsdeck-server --listen 0.0.0.0:8080 --storage-root /var/lib/opsdeck/toolkits

use anyhow::{Context, Result};
use clap::Parser;
use opsdeck_registry::InMemoryTaskEngine;
use opsdeck_server::config::ServerConfig;
use opsdeck_server::{build_router, modules, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "opsdeck-server")]
#[command(about = "opsdeck toolkit host")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Directory installed bundles live under
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Directory of builtin bundle archives installed at startup
    #[arg(long)]
    builtin_bundles: Option<PathBuf>,

    /// Authorization policy file
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Local source tree tried before published assets when resolving components
    #[arg(long)]
    dev_source_root: Option<PathBuf>,

    /// Base URL published assets are fetched from
    #[arg(long)]
    public_base_url: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(root) = self.storage_root {
            config.storage_root_path = root;
        }
        if self.builtin_bundles.is_some() {
            config.builtin_bundles_path = self.builtin_bundles;
        }
        if self.policy.is_some() {
            config.policy_path = self.policy;
        }
        if self.dev_source_root.is_some() {
            config.dev_source_root = self.dev_source_root;
        }
        if self.public_base_url.is_some() {
            config.public_base_url = self.public_base_url;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load config")?;
    config
        .apply_process_env()
        .context("Invalid OPSDECK_* environment")?;
    args.apply(&mut config);

    info!(
        listen = %config.listen,
        storage = %config.storage_root_path.display(),
        "opsdeck starting..."
    );

    let state = AppState::from_config(
        &config,
        Arc::new(modules::host_catalog()),
        Arc::new(InMemoryTaskEngine::new()),
    )
    .await
    .context("Failed to initialize services")?;
    let registry = state.registry.clone();

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("HTTP API listening on {}", listener.local_addr()?);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("HTTP server failed")?;

    info!("Shutting down, unmounting toolkits");
    registry.shutdown().await.context("Failed to persist registry state")?;
    Ok(())
}
