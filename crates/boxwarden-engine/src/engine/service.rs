//! Engine service – composes every component and exposes the
//! status/control surface used by the host.
//!
//! Owns the shutdown signal and the background tasks: availability
//! reconciliation, log tailing and subscription config refresh. The
//! supervisor spawns its own liveness poller while an elevated engine runs.

use crate::engine::availability::AvailabilityMonitor;
use crate::engine::config_watch::ConfigWatcher;
use crate::engine::elevation::{self, ElevationGateway};
use crate::engine::layout::EngineLayout;
use crate::engine::log_tail::LogTailer;
use crate::engine::manifest::{ManifestClient, RemoteSource};
use crate::engine::process::{ProcessProbe, SysinfoProbe};
use crate::engine::settings::EngineSettings;
use crate::engine::sink::{EventLog, LogSink};
use crate::engine::supervisor::ProcessSupervisor;
use crate::engine::types::*;
use crate::engine::version_store::VersionStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Shared handle held by the host.
pub type EngineServiceState = Arc<EngineService>;

/// Control and status surface consumed by the presentation layer.
#[async_trait]
pub trait EngineControl: Send + Sync {
    async fn start(&self) -> Result<(), EngineError>;
    async fn stop(&self) -> Result<(), EngineError>;
    async fn is_running(&self) -> bool;
    async fn is_available(&self) -> bool;
    async fn status(&self) -> EngineStatus;
    async fn update_subscription(&self, url: &str) -> Result<(), EngineError>;
    /// Newly tailed log lines; empty when nothing arrived since last call.
    async fn drain_logs(&self) -> Vec<String>;
}

/// Swappable collaborators.
pub struct EngineParts {
    pub remote: Arc<dyn RemoteSource>,
    pub gateway: Arc<dyn ElevationGateway>,
    pub probe: Arc<dyn ProcessProbe>,
    pub sink: Arc<dyn LogSink>,
}

pub struct EngineService {
    settings: EngineSettings,
    layout: EngineLayout,
    events: EventLog,
    remote: Arc<dyn RemoteSource>,
    gateway: Arc<dyn ElevationGateway>,
    store: Arc<VersionStore>,
    availability: Arc<AvailabilityMonitor>,
    supervisor: ProcessSupervisor,
    tailer: Arc<LogTailer>,
    config: Arc<ConfigWatcher>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    launched: AtomicBool,
}

impl EngineService {
    /// Build with the production collaborators for this platform.
    pub fn new(
        settings: EngineSettings,
        sink: Arc<dyn LogSink>,
    ) -> Result<EngineServiceState, EngineError> {
        let remote = ManifestClient::new(settings.manifest_url.clone(), settings.http_timeout())?;
        Ok(Self::with_parts(
            settings,
            EngineParts {
                remote: Arc::new(remote),
                gateway: elevation::platform_gateway(),
                probe: Arc::new(SysinfoProbe),
                sink,
            },
        ))
    }

    pub fn with_parts(settings: EngineSettings, parts: EngineParts) -> EngineServiceState {
        let layout = EngineLayout::new(settings.resolved_install_root(), settings.engine_name.clone());
        let events = EventLog::new(parts.sink);
        let store = Arc::new(VersionStore::new(layout.version_record_path()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let availability = Arc::new(AvailabilityMonitor::new(
            layout.clone(),
            parts.remote.clone(),
            store.clone(),
            events.clone(),
        ));
        let supervisor = ProcessSupervisor::new(
            layout.clone(),
            parts.gateway.clone(),
            parts.probe,
            events.clone(),
            settings.liveness_interval(),
            shutdown_rx,
        );
        let tailer = Arc::new(LogTailer::new(layout.log_path(), layout.engine_name()));
        let config = Arc::new(ConfigWatcher::new(
            layout.clone(),
            parts.remote.clone(),
            events.clone(),
        ));

        Arc::new(Self {
            settings,
            layout,
            events,
            remote: parts.remote,
            gateway: parts.gateway,
            store,
            availability,
            supervisor,
            tailer,
            config,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            launched: AtomicBool::new(false),
        })
    }

    pub fn layout(&self) -> &EngineLayout {
        &self.layout
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Load the startup configuration and spawn the background tasks.
    /// Calling it again is a no-op.
    pub async fn launch(self: &Arc<Self>) {
        if self.launched.swap(true, Ordering::SeqCst) {
            return;
        }
        self.load_startup_config().await;

        let mut tasks = self.tasks.lock().await;

        let availability = self.availability.clone();
        let period = self.settings.availability_interval();
        let rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(availability.run(period, rx)));

        let tailer = self.tailer.clone();
        let period = self.settings.tail_interval();
        let rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move { tailer.run(period, rx).await }));

        let config = self.config.clone();
        let period = self.settings.config_refresh_interval();
        let rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move { config.run(period, rx).await }));

        log::info!("engine service launched at {}", self.layout.root().display());
    }

    /// Bootstrap the version record and resume watching the stored
    /// subscription, fetching it once in the background. An empty stored
    /// URL falls back to the manifest's default subscription.
    async fn load_startup_config(&self) {
        let mut default_subscription = None;
        let exists = tokio::fs::try_exists(self.store.path())
            .await
            .unwrap_or(false);
        if !exists {
            default_subscription = self.default_subscription().await;
            if let Err(e) = self
                .store
                .ensure_exists(default_subscription.as_deref())
                .await
            {
                self.events
                    .error(format!("Failed to create version record: {}", e));
            }
        }

        let mut url = match self.store.subscription_url().await {
            Ok(u) => u,
            Err(e) => {
                self.events
                    .error(format!("Failed to load version record: {}", e));
                return;
            }
        };
        if url.is_empty() {
            if exists {
                default_subscription = self.default_subscription().await;
            }
            url = default_subscription.unwrap_or_default();
        }
        if url.is_empty() {
            return;
        }

        self.config.update_url(&url).await;
        let config = self.config.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = config.fetch_into_config(&url).await {
                events.error(format!("Error auto-fetching config: {}", e));
            }
        });
        self.tasks.lock().await.push(handle);
    }

    async fn default_subscription(&self) -> Option<String> {
        match self.remote.fetch_manifest().await {
            Ok(m) if !m.default_subscription_url.is_empty() => Some(m.default_subscription_url),
            Ok(_) => None,
            Err(e) => {
                log::warn!("no manifest for default subscription: {}", e);
                None
            }
        }
    }

    /// Derived run state: the supervisor wins while it is not idle.
    pub async fn run_state(&self) -> RunState {
        if let Some(state) = self.supervisor.run_state().await {
            return state;
        }
        if self.availability.is_downloading().await {
            RunState::Downloading
        } else if self.availability.is_available().await {
            RunState::Available
        } else {
            RunState::Unavailable
        }
    }

    /// Stop the engine, signal every task and wait for them to finish.
    pub async fn shutdown(&self) {
        if let Err(e) = self.supervisor.stop().await {
            self.events.error(format!("Error stopping engine: {}", e));
        }
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for h in handles {
            if let Err(e) = h.await {
                log::warn!("background task ended abnormally: {}", e);
            }
        }
        self.supervisor.join_background().await;
        self.availability.join_acquisitions().await;
        log::info!("engine service stopped");
    }
}

#[async_trait]
impl EngineControl for EngineService {
    async fn start(&self) -> Result<(), EngineError> {
        let available = self.availability.is_available().await;
        self.supervisor.start(available).await
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.supervisor.stop().await
    }

    async fn is_running(&self) -> bool {
        self.supervisor.is_running().await
    }

    async fn is_available(&self) -> bool {
        self.availability.is_available().await
    }

    async fn status(&self) -> EngineStatus {
        let gateway = self.gateway.clone();
        let elevated = tokio::task::spawn_blocking(move || gateway.is_elevated())
            .await
            .unwrap_or(false);
        EngineStatus {
            run_state: self.run_state().await,
            available: self.availability.is_available().await,
            downloading: self.availability.is_downloading().await,
            running: self.supervisor.is_running().await,
            elevated,
            manifest_version: self.availability.manifest().await.map(|m| m.version),
            binary_path: self.layout.binary_path(),
        }
    }

    async fn update_subscription(&self, url: &str) -> Result<(), EngineError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(EngineError::new(
                EngineErrorKind::InvalidInput,
                "Please enter a subscription URL",
            ));
        }

        self.events
            .info(format!("Fetching configuration from: {}", url));
        if let Err(e) = self.config.fetch_into_config(url).await {
            self.events.error(format!("Error fetching config: {}", e));
            return Err(e);
        }
        if let Err(e) = self.store.set_subscription_url(url).await {
            self.events
                .warn(format!("Warning: Could not save subscription URL: {}", e));
        }
        self.config.update_url(url).await;
        self.events.info("Configuration updated successfully");
        Ok(())
    }

    async fn drain_logs(&self) -> Vec<String> {
        self.tailer.drain().await
    }
}
