//! Subscription config watcher – periodically re-fetches the engine
//! configuration from the active subscription URL.

use crate::engine::layout::EngineLayout;
use crate::engine::manifest::RemoteSource;
use crate::engine::sink::EventLog;
use crate::engine::types::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

pub struct ConfigWatcher {
    layout: EngineLayout,
    remote: Arc<dyn RemoteSource>,
    events: EventLog,
    url: RwLock<String>,
}

impl ConfigWatcher {
    pub fn new(layout: EngineLayout, remote: Arc<dyn RemoteSource>, events: EventLog) -> Self {
        Self {
            layout,
            remote,
            events,
            url: RwLock::new(String::new()),
        }
    }

    /// Active subscription URL; empty when idle.
    pub async fn url(&self) -> String {
        self.url.read().await.clone()
    }

    pub async fn update_url(&self, url: &str) {
        let mut current = self.url.write().await;
        if !url.is_empty() && *current != url {
            self.events.info(format!(
                "Watching {} config: {}",
                self.layout.engine_name(),
                url
            ));
        }
        *current = url.to_string();
    }

    /// Fetch `url` and write it as the configuration artifact.
    pub async fn fetch_into_config(&self, url: &str) -> Result<u64, EngineError> {
        let body = self.remote.fetch_text(url).await?;
        tokio::fs::create_dir_all(self.layout.data_dir())
            .await
            .map_err(|e| EngineError::io("Failed to create data directory", &e))?;
        tokio::fs::write(self.layout.config_path(), body.as_bytes())
            .await
            .map_err(|e| EngineError::io("Failed to save config", &e))?;
        Ok(body.len() as u64)
    }

    /// Refresh from the active URL. `Ok(false)` when idle.
    pub async fn refresh(&self) -> Result<bool, EngineError> {
        let url = self.url().await;
        if url.is_empty() {
            return Ok(false);
        }
        self.fetch_into_config(&url).await?;
        Ok(true)
    }

    /// Refresh every `period`, the first time one period after start.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            match self.refresh().await {
                Ok(true) => log::debug!("config refreshed"),
                Ok(false) => {}
                Err(e) => self
                    .events
                    .error(format!("Config watcher: Error fetching config - {}", e)),
            }
        }
        self.events.info("Config watcher stopped");
    }
}
