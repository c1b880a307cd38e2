//! Swapline Relayer - cross-chain atomic swap order lifecycle engine
//!
//! Accepts signed swap orders over HTTP, runs their Dutch auctions, creates
//! hash-locked escrows on both chains, and discloses fill secrets once the
//! finality lock elapses.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use swapline_relayer::api;
use swapline_relayer::config::Settings;
use swapline_relayer::engine::LifecycleEngine;
use swapline_relayer::gateway::ChainManager;
use swapline_relayer::metrics::MetricsServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Swapline Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Initialize metrics server
    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Chain gateways are created lazily per chain; warm up the enabled ones
    // so misconfiguration surfaces at startup rather than mid-order
    let chain_manager = Arc::new(ChainManager::new(settings.clone()));
    for (_, chain) in settings.enabled_chains() {
        if let Err(e) = chain_manager.gateway(chain.chain_id).await {
            warn!(chain_id = chain.chain_id, "Gateway unavailable at startup: {}", e);
        }
    }
    info!(
        "Chain gateways initialized: {:?}",
        chain_manager.connected_chains()
    );

    // Initialize lifecycle engine
    let engine = LifecycleEngine::new(chain_manager.clone(), &settings)?;
    info!("Lifecycle engine initialized");

    // Start API server
    let api_handle = tokio::spawn({
        let settings = settings.clone();
        let engine = engine.clone();
        let chain_manager = chain_manager.clone();
        async move {
            if let Err(e) = api::run_server(settings.api, engine, chain_manager).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Start engine maintenance loop
    let engine_handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            if let Err(e) = engine.run().await {
                error!("Lifecycle engine error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let health = chain_manager.health_check().await;
                for (chain_id, healthy) in health {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }
            }
        }
    });

    info!("Swapline Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    engine.stop().await;

    api_handle.abort();
    engine_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Swapline Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,swapline_relayer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
