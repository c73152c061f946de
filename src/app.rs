//! Host lifecycle: single-instance check, service launch, optional
//! auto-start, console relay and Ctrl-C shutdown.

use crate::cli::Cli;
use crate::console::{self, ConsoleSink};
use crate::instance;
use anyhow::{Context, Result};
use boxwarden_engine::engine::{EngineControl, EngineService, EngineServiceState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const RELAY_PERIOD: Duration = Duration::from_secs(1);
const AUTO_START_POLL: Duration = Duration::from_millis(500);

pub async fn run(cli: Cli) -> Result<()> {
    let _guard = match instance::try_acquire(instance::INSTANCE_ADDR) {
        Some(g) => g,
        None => {
            println!("Another instance of boxwarden is already running");
            return Ok(());
        }
    };

    let settings = cli.resolve_settings()?;
    let service = EngineService::new(settings, Arc::new(ConsoleSink))
        .context("Failed to initialise engine service")?;
    info!(
        "[BOOT] boxwarden v{} using {}",
        env!("CARGO_PKG_VERSION"),
        service.layout().root().display()
    );
    service.launch().await;

    if let Some(url) = &cli.subscription {
        if let Err(e) = service.update_subscription(url).await {
            warn!("subscription update failed: {}", e);
        }
    }

    let (relay_tx, relay_rx) = watch::channel(false);
    let relay = tokio::spawn(console::relay_engine_logs(
        service.clone(),
        service.layout().engine_name().to_string(),
        RELAY_PERIOD,
        relay_rx,
    ));
    let auto_start = cli
        .start
        .then(|| tokio::spawn(start_when_available(service.clone())));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");

    if let Some(task) = auto_start {
        task.abort();
    }
    service.shutdown().await;
    let _ = relay_tx.send(true);
    let _ = relay.await;
    Ok(())
}

async fn start_when_available(service: EngineServiceState) {
    while !service.is_available().await {
        tokio::time::sleep(AUTO_START_POLL).await;
    }
    if let Err(e) = service.start().await {
        service
            .events()
            .error(format!("Error starting engine: {}", e));
    }
}
