//! Availability monitor – periodic reconciliation of the local binary
//! against the delivery manifest, driving acquisition when stale.

use crate::engine::acquisition::AcquisitionPipeline;
use crate::engine::layout::EngineLayout;
use crate::engine::manifest::RemoteSource;
use crate::engine::sink::EventLog;
use crate::engine::types::*;
use crate::engine::version_store::{version_mismatch, VersionStore};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

#[derive(Debug, Default, Clone)]
struct AvailabilityState {
    available: bool,
    downloading: bool,
    manifest: Option<DeliveryManifest>,
}

/// What a single reconciliation tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// An acquisition was already in flight.
    Skipped,
    /// Manifest unreachable, local binary trusted.
    AvailableOffline,
    /// Manifest unreachable and nothing installed.
    Unavailable,
    AcquisitionStarted,
    Available,
}

/// Acquisition rule, evaluated in order: binary absent → needed; no
/// manifest → not needed; installed version unknown (record unreadable)
/// → not needed; otherwise needed on any version mismatch.
pub fn acquisition_needed(
    binary_exists: bool,
    manifest: Option<&DeliveryManifest>,
    installed: Option<&str>,
) -> bool {
    if !binary_exists {
        return true;
    }
    let manifest = match manifest {
        Some(m) => m,
        None => return false,
    };
    match installed {
        Some(v) => version_mismatch(v, &manifest.version),
        None => false,
    }
}

pub struct AvailabilityMonitor {
    layout: EngineLayout,
    remote: Arc<dyn RemoteSource>,
    store: Arc<VersionStore>,
    pipeline: Arc<AcquisitionPipeline>,
    events: EventLog,
    state: Arc<RwLock<AvailabilityState>>,
    acquisitions: Mutex<Vec<JoinHandle<()>>>,
}

impl AvailabilityMonitor {
    pub fn new(
        layout: EngineLayout,
        remote: Arc<dyn RemoteSource>,
        store: Arc<VersionStore>,
        events: EventLog,
    ) -> Self {
        let pipeline = Arc::new(AcquisitionPipeline::new(
            layout.clone(),
            remote.clone(),
            store.clone(),
            events.clone(),
        ));
        Self {
            layout,
            remote,
            store,
            pipeline,
            events,
            state: Arc::new(RwLock::new(AvailabilityState::default())),
            acquisitions: Mutex::new(Vec::new()),
        }
    }

    pub async fn is_available(&self) -> bool {
        self.state.read().await.available
    }

    pub async fn is_downloading(&self) -> bool {
        self.state.read().await.downloading
    }

    /// Last successfully fetched manifest.
    pub async fn manifest(&self) -> Option<DeliveryManifest> {
        self.state.read().await.manifest.clone()
    }

    /// One reconciliation pass.
    pub async fn reconcile(&self) -> Reconciliation {
        let binary_exists = self.layout.binary_exists();
        if self.state.read().await.downloading {
            return Reconciliation::Skipped;
        }

        let manifest = match self.remote.fetch_manifest().await {
            Ok(m) => m,
            Err(e) => {
                log::warn!("manifest fetch failed: {}", e);
                let mut st = self.state.write().await;
                if st.downloading {
                    return Reconciliation::Skipped;
                }
                st.available = binary_exists;
                return if binary_exists {
                    Reconciliation::AvailableOffline
                } else {
                    Reconciliation::Unavailable
                };
            }
        };

        self.state.write().await.manifest = Some(manifest.clone());

        let installed = match self.store.installed_version().await {
            Ok(v) => Some(v),
            Err(e) => {
                self.events
                    .error(format!("Failed to read version record: {}", e));
                None
            }
        };
        if let Err(e) = self.store.set_installed_version(&manifest.version).await {
            self.events
                .error(format!("Failed to record manifest version: {}", e));
        }

        if acquisition_needed(binary_exists, Some(&manifest), installed.as_deref()) {
            if let Some(v) = installed.as_deref().filter(|v| !v.is_empty()) {
                self.events.info(format!(
                    "New {} version {} available (installed {})",
                    self.layout.engine_name(),
                    manifest.version,
                    v
                ));
            }
            return if self.trigger_acquisition(manifest).await {
                Reconciliation::AcquisitionStarted
            } else {
                Reconciliation::Skipped
            };
        }

        let mut st = self.state.write().await;
        if st.downloading {
            return Reconciliation::Skipped;
        }
        st.available = true;
        Reconciliation::Available
    }

    /// Launch the pipeline unless one is already running. Returns whether
    /// this call started it.
    pub async fn trigger_acquisition(&self, manifest: DeliveryManifest) -> bool {
        {
            let mut st = self.state.write().await;
            if st.downloading {
                return false;
            }
            st.downloading = true;
            st.available = false;
        }

        let pipeline = self.pipeline.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(pipeline.run(&manifest)).catch_unwind().await;
            if outcome.is_err() {
                log::error!("acquisition task panicked");
            }
            state.write().await.downloading = false;
        });

        let mut tasks = self.acquisitions.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
        true
    }

    /// Wait for any in-flight acquisition to finish.
    pub async fn join_acquisitions(&self) {
        let handles: Vec<_> = self.acquisitions.lock().await.drain(..).collect();
        for h in handles {
            let _ = h.await;
        }
    }

    /// Reconcile every `period`, first pass immediately, until shutdown.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            let outcome = self.reconcile().await;
            log::trace!("availability: {:?}", outcome);
        }
        log::debug!("availability monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sink::MemorySink;
    use crate::engine::testing::{sample_manifest, FakeRemote};

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: EngineLayout,
        store: Arc<VersionStore>,
        remote: Arc<FakeRemote>,
        monitor: Arc<AvailabilityMonitor>,
        sink: Arc<MemorySink>,
    }

    fn fixture(remote: Arc<FakeRemote>, installed_binary: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = EngineLayout::new(dir.path(), "sing-box");
        std::fs::create_dir_all(layout.data_dir()).unwrap();
        if installed_binary {
            std::fs::write(layout.binary_path(), b"engine v1").unwrap();
        }
        let store = Arc::new(VersionStore::new(layout.version_record_path()));
        let sink = MemorySink::new();
        let monitor = Arc::new(AvailabilityMonitor::new(
            layout.clone(),
            remote.clone(),
            store.clone(),
            EventLog::new(sink.clone()),
        ));
        Fixture {
            _dir: dir,
            layout,
            store,
            remote,
            monitor,
            sink,
        }
    }

    #[tokio::test]
    async fn newer_manifest_starts_download() {
        let manifest = sample_manifest("2.0.1", "pkg/sing-box");
        let remote = FakeRemote::with_release(&manifest, &[("pkg/sing-box", "engine v2", 0o755)]);
        remote.set_delay(Duration::from_millis(150));
        let f = fixture(remote, true);
        f.store.set_installed_version("2.0.0").await.unwrap();

        assert_eq!(f.monitor.reconcile().await, Reconciliation::AcquisitionStarted);
        assert!(f.monitor.is_downloading().await);
        assert!(!f.monitor.is_available().await);
        assert_eq!(f.store.installed_version().await.unwrap(), "2.0.1");

        f.monitor.join_acquisitions().await;
        assert!(!f.monitor.is_downloading().await);
        assert!(!f.monitor.is_available().await);
        assert_eq!(std::fs::read(f.layout.binary_path()).unwrap(), b"engine v2");

        assert_eq!(f.monitor.reconcile().await, Reconciliation::Available);
        assert!(f.monitor.is_available().await);
    }

    #[tokio::test]
    async fn matching_version_marks_available_without_download() {
        let manifest = sample_manifest("2.0.1", "pkg/sing-box");
        let f = fixture(FakeRemote::new(Ok(manifest.clone())), true);
        f.store.set_installed_version("2.0.1").await.unwrap();

        assert_eq!(f.monitor.reconcile().await, Reconciliation::Available);
        assert!(f.monitor.is_available().await);
        assert!(!f.monitor.is_downloading().await);
        assert_eq!(f.remote.download_count(&manifest.archive_url), 0);
        assert_eq!(f.monitor.manifest().await.unwrap().version, "2.0.1");
    }

    #[tokio::test]
    async fn unreachable_manifest_trusts_installed_binary() {
        let f = fixture(FakeRemote::unreachable(), true);
        assert_eq!(f.monitor.reconcile().await, Reconciliation::AvailableOffline);
        assert!(f.monitor.is_available().await);
        assert!(f.monitor.manifest().await.is_none());
    }

    #[tokio::test]
    async fn unreachable_manifest_without_binary_is_unavailable() {
        let f = fixture(FakeRemote::unreachable(), false);
        assert_eq!(f.monitor.reconcile().await, Reconciliation::Unavailable);
        assert!(!f.monitor.is_available().await);
        assert!(!f.monitor.is_downloading().await);
    }

    #[tokio::test]
    async fn missing_binary_always_downloads() {
        let manifest = sample_manifest("1.0", "sing-box");
        let remote = FakeRemote::with_release(&manifest, &[("sing-box", "x", 0o755)]);
        let f = fixture(remote, false);
        f.store.set_installed_version("1.0").await.unwrap();

        assert_eq!(f.monitor.reconcile().await, Reconciliation::AcquisitionStarted);
        f.monitor.join_acquisitions().await;
        assert!(f.layout.binary_exists());
    }

    #[tokio::test]
    async fn acquisition_is_single_flight() {
        let manifest = sample_manifest("3.0", "sing-box");
        let remote = FakeRemote::with_release(&manifest, &[("sing-box", "x", 0o755)]);
        remote.set_delay(Duration::from_millis(100));
        let f = fixture(remote, false);

        let (a, b) = tokio::join!(
            f.monitor.trigger_acquisition(manifest.clone()),
            f.monitor.trigger_acquisition(manifest.clone()),
        );
        assert!(a ^ b);
        assert_eq!(f.monitor.reconcile().await, Reconciliation::Skipped);

        f.monitor.join_acquisitions().await;
        assert_eq!(f.remote.download_count(&manifest.license_url), 1);
        assert_eq!(f.remote.download_count(&manifest.archive_url), 1);
        assert!(!f.monitor.is_downloading().await);
    }

    #[tokio::test]
    async fn reconcile_during_download_does_not_fetch() {
        let manifest = sample_manifest("3.0", "sing-box");
        let remote = FakeRemote::with_release(&manifest, &[("sing-box", "x", 0o755)]);
        remote.set_delay(Duration::from_millis(100));
        let f = fixture(remote, false);

        assert!(f.monitor.trigger_acquisition(manifest).await);
        let before = f.remote.manifest_fetches();
        assert_eq!(f.monitor.reconcile().await, Reconciliation::Skipped);
        assert_eq!(f.remote.manifest_fetches(), before);
        f.monitor.join_acquisitions().await;
    }

    #[tokio::test]
    async fn failed_acquisition_clears_downloading_flag() {
        let manifest = sample_manifest("4.0", "pkg/sing-box");
        let remote = FakeRemote::with_release(&manifest, &[("elsewhere/sing-box", "x", 0o755)]);
        let f = fixture(remote, true);
        f.store.set_installed_version("3.0").await.unwrap();

        assert_eq!(f.monitor.reconcile().await, Reconciliation::AcquisitionStarted);
        f.monitor.join_acquisitions().await;

        assert!(!f.monitor.is_downloading().await);
        assert!(!f.monitor.is_available().await);
        assert_eq!(std::fs::read(f.layout.binary_path()).unwrap(), b"engine v1");
        assert!(f.sink.contains("acquisition failed"));
    }

    #[tokio::test]
    async fn unreadable_record_does_not_trigger_download() {
        let manifest = sample_manifest("5.0", "sing-box");
        let f = fixture(FakeRemote::new(Ok(manifest)), true);
        std::fs::write(f.layout.version_record_path(), "garbage").unwrap();

        assert_eq!(f.monitor.reconcile().await, Reconciliation::Available);
        assert!(f.sink.contains("Failed to read version record"));
    }

    #[tokio::test]
    async fn run_loop_checks_immediately_and_stops_on_shutdown() {
        let manifest = sample_manifest("1", "sing-box");
        let f = fixture(FakeRemote::new(Ok(manifest)), true);
        f.store.set_installed_version("1").await.unwrap();
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(f.monitor.clone().run(Duration::from_secs(3600), rx));
        for _ in 0..100 {
            if f.monitor.is_available().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.monitor.is_available().await);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn acquisition_rule_order() {
        let m = sample_manifest("2", "x");
        assert!(acquisition_needed(false, None, None));
        assert!(!acquisition_needed(true, None, Some("1")));
        assert!(!acquisition_needed(true, Some(&m), None));
        assert!(acquisition_needed(true, Some(&m), Some("")));
        assert!(acquisition_needed(true, Some(&m), Some("1")));
        assert!(!acquisition_needed(true, Some(&m), Some("2")));
    }
}
