//! linkguard daemon
//!
//! Watches connectivity, fails over to backup networks, and delivers queued
//! outbound calls once the link is back.
//!
//! # Architecture Overview
//!
//! ```text
//!     ┌──────────────────┐   state    ┌─────────────────────┐   run()   ┌──────────────────────┐
//!     │ ConnectivitySource│──────────▶│ ConnectivityMonitor │──────────▶│ FailoverCoordinator  │
//!     │ (probe-driven)   │            │  history + quality  │           │ BackupNetworkStore   │
//!     └──────────────────┘            └─────────┬───────────┘           │ NetworkAttacher      │
//!                                               │ events                └──────────────────────┘
//!                                               ▼
//!     enqueue / call   ┌─────────────────────────────────────┐          ┌──────────────────────┐
//!     ────────────────▶│ ResilientDispatcher                 │─────────▶│ Transport (reqwest)  │
//!                      │ priority queue + backoff + persist  │          └──────────────────────┘
//!                      └─────────────────────────────────────┘
//!
//!     Cross-cutting: config (toml + notify), observability (tracing + metrics),
//!     storage (files + OS keyring), lifecycle (signals), admin API (axum)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use linkguard::admin::{setup_admin_router, AdminState};
use linkguard::config::{load_config, ConfigWatcher, LinkguardConfig};
use linkguard::lifecycle::{Collaborators, Services, SignalAction, Signals};
use linkguard::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "linkguard")]
#[command(about = "Connectivity monitor, failover coordinator and resilient call dispatcher", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "linkguard.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = if args.config.exists() {
        load_config(&args.config)?
    } else {
        LinkguardConfig::default()
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "linkguard starting");
    if !args.config.exists() {
        tracing::warn!(path = %args.config.display(), "Config file not found, using defaults");
    }

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let collaborators = Collaborators::from_config(&config)?;
    let services = Arc::new(Services::start(&config, collaborators).await?);
    let admin_state = AdminState::new(Arc::clone(&services), config.admin.api_key.clone());

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let router = setup_admin_router(admin_state.clone());
        let mut stop = services.shutdown.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API server failed");
            }
        });
    }

    // Keep the watcher alive for the life of the process.
    let _watcher = if args.config.exists() {
        let (watcher, mut updates) = ConfigWatcher::new(&args.config);
        let handle = watcher.run()?;
        let services = Arc::clone(&services);
        let admin_state = admin_state.clone();
        tokio::spawn(async move {
            while let Some(new_config) = updates.recv().await {
                services.apply_config(&new_config);
                admin_state.set_api_key(new_config.admin.api_key.clone());
            }
        });
        Some(handle)
    } else {
        None
    };

    let mut signals = Signals::new()?;
    loop {
        match signals.recv().await {
            SignalAction::Failover => {
                let monitor = Arc::clone(&services.monitor);
                tokio::spawn(async move {
                    let outcome = monitor.trigger_failover().await;
                    tracing::info!(outcome = outcome.label(), "Signal-requested failover finished");
                });
            }
            SignalAction::Shutdown => break,
        }
    }

    services.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
