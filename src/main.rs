// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! SpatialNVR — realtime event distribution and live coordination core.
//!
//! Usage:
//!   spatialnvr run   --config config.toml
//!   spatialnvr check --config config.toml

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use spatialnvr::api;
use spatialnvr::config::Config;
use spatialnvr::gateway::GatewayClient;
use spatialnvr::hub;
use spatialnvr::inference::InferenceClient;
use spatialnvr::manager::RecordingManager;
use spatialnvr::reactor::Reactor;
use spatialnvr::registry::{self, CameraRegistry};
use spatialnvr::store::Stores;

#[derive(Parser)]
#[command(name = "spatialnvr", about = "Realtime event distribution and live coordination core", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the hub, registry, detection pipelines, recorders and API.
    Run {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Validate a config file and exit without starting anything.
    Check {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Check { config } => check(config),
    }
}

fn check(config_path: PathBuf) {
    match Config::from_file(&config_path) {
        Ok(cfg) => {
            println!("config OK: {} camera(s), {} zone(s)", cfg.cameras.len(), cfg.zones.len());
        }
        Err(e) => {
            eprintln!("config invalid: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(config_path: PathBuf) {
    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        cameras = cfg.cameras.len(),
        base_path = ?cfg.storage.base_path,
        pool_size_mb = cfg.storage.chunk_size_mb,
        max_pools = cfg.storage.max_pools,
        segment_secs = cfg.storage.segment_duration_secs,
        "Starting SpatialNVR"
    );

    let manager = match RecordingManager::new(&cfg) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "Failed to start recording manager");
            std::process::exit(1);
        }
    };

    let root_cancel = CancellationToken::new();
    let (hub_handle, hub_join) = hub::spawn(root_cancel.clone());
    let registry = Arc::new(CameraRegistry::new());
    let gateway = GatewayClient::new(cfg.gateway.base_url.clone());
    let inference = InferenceClient::new(cfg.inference.base_url.clone());
    let stores = Stores::default();

    let mut reactor = Reactor::new(
        registry.clone(),
        gateway.clone(),
        inference,
        stores,
        hub_handle.clone(),
        manager.writer_tx.clone(),
        manager.segment_duration,
    );
    reactor.reconcile(&cfg);

    let reconciler_handle = registry::spawn_reconciler(registry.clone(), gateway, hub_handle.clone(), root_cancel.clone());

    let api_handle = if cfg.api.enabled {
        let state = Arc::new(api::AppState { registry: registry.clone(), hub: hub_handle.clone() });
        let port = cfg.api.port;
        Some(tokio::spawn(async move {
            api::start_server(state, port).await;
        }))
    } else {
        None
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL+C, shutting down…"),
        Err(e) => error!(error = %e, "Signal error"),
    }

    root_cancel.cancel();
    reactor.shutdown();
    if let Some(h) = api_handle {
        h.abort();
    }
    reconciler_handle.abort();
    hub_join.abort();
    manager.shutdown().await;
}
