//! Test doubles shared by the engine's unit tests.

use crate::engine::elevation::{ElevationGateway, ElevationRequest};
use crate::engine::manifest::RemoteSource;
use crate::engine::process::{ProcessProbe, TerminateOutcome};
use crate::engine::types::*;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn sample_manifest(version: &str, in_archive_path: &str) -> DeliveryManifest {
    DeliveryManifest {
        default_subscription_url: "https://sub.example/default".into(),
        license_url: "https://dl.example/LICENSE".into(),
        archive_url: "https://dl.example/sing-box.zip".into(),
        version: version.into(),
        in_archive_exec_path: in_archive_path.into(),
    }
}

/// In-memory zip with stored entries and explicit unix modes.
pub fn zip_bytes(entries: &[(&str, &str, u32)]) -> Vec<u8> {
    let mut w = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content, mode) in entries {
        let opts = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(*mode);
        w.start_file(*name, opts).unwrap();
        w.write_all(content.as_bytes()).unwrap();
    }
    w.finish().unwrap().into_inner()
}

pub fn build_zip(path: &Path, entries: &[(&str, &str, u32)]) {
    std::fs::write(path, zip_bytes(entries)).unwrap();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Remote
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FakeRemote {
    manifest: Mutex<Result<DeliveryManifest, EngineError>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    texts: Mutex<HashMap<String, String>>,
    downloads: Mutex<HashMap<String, usize>>,
    text_fetches: AtomicUsize,
    manifest_fetches: AtomicUsize,
    delay: Mutex<Duration>,
}

impl FakeRemote {
    pub fn new(manifest: Result<DeliveryManifest, EngineError>) -> Arc<Self> {
        Arc::new(Self {
            manifest: Mutex::new(manifest),
            files: Mutex::new(HashMap::new()),
            texts: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
            text_fetches: AtomicUsize::new(0),
            manifest_fetches: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Serves `manifest` plus a license and an archive built from `entries`.
    pub fn with_release(manifest: &DeliveryManifest, entries: &[(&str, &str, u32)]) -> Arc<Self> {
        let remote = Self::new(Ok(manifest.clone()));
        remote.serve(&manifest.license_url, b"LICENSE TEXT".to_vec());
        remote.serve(&manifest.archive_url, zip_bytes(entries));
        remote
    }

    pub fn unreachable() -> Arc<Self> {
        Self::new(Err(EngineError::new(EngineErrorKind::Network, "connection refused")))
    }

    pub fn serve(&self, url: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(url.to_string(), bytes);
    }

    pub fn serve_text(&self, url: &str, text: &str) {
        self.texts.lock().unwrap().insert(url.to_string(), text.to_string());
    }

    /// Every download sleeps this long before completing.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn download_count(&self, url: &str) -> usize {
        self.downloads.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn text_fetches(&self) -> usize {
        self.text_fetches.load(Ordering::SeqCst)
    }

    pub fn manifest_fetches(&self) -> usize {
        self.manifest_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn fetch_manifest(&self) -> Result<DeliveryManifest, EngineError> {
        self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
        self.manifest.lock().unwrap().clone()
    }

    async fn fetch_text(&self, url: &str) -> Result<String, EngineError> {
        self.text_fetches.fetch_add(1, Ordering::SeqCst);
        self.texts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| EngineError::new(EngineErrorKind::Network, "HTTP 404").with_code(404))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, EngineError> {
        *self.downloads.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let bytes = self.files.lock().unwrap().get(url).cloned();
        match bytes {
            Some(b) => {
                tokio::fs::write(dest, &b)
                    .await
                    .map_err(|e| EngineError::io("fake write", &e))?;
                Ok(b.len() as u64)
            }
            None => Err(EngineError::new(EngineErrorKind::Network, "HTTP 404").with_code(404)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Elevation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Records requests; answers from a queue, then `Ok(())`.
pub struct FakeGateway {
    elevated: bool,
    results: Mutex<VecDeque<Result<(), EngineError>>>,
    requests: Mutex<Vec<ElevationRequest>>,
    delay: Mutex<Duration>,
}

impl FakeGateway {
    pub fn new(elevated: bool) -> Arc<Self> {
        Arc::new(Self {
            elevated,
            results: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn push_result(&self, result: Result<(), EngineError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn requests(&self) -> Vec<ElevationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Every request blocks this long, like a prompt left open.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

impl ElevationGateway for FakeGateway {
    fn is_elevated(&self) -> bool {
        self.elevated
    }

    fn run_elevated(&self, request: &ElevationRequest) -> Result<(), EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Process table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FakeProbe {
    running: AtomicBool,
    terminate_result: Mutex<Result<TerminateOutcome, EngineError>>,
    terminate_calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(running: bool) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(running),
            terminate_result: Mutex::new(Ok(TerminateOutcome::Terminated(1))),
            terminate_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_terminate_result(&self, result: Result<TerminateOutcome, EngineError>) {
        *self.terminate_result.lock().unwrap() = result;
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }
}

impl ProcessProbe for FakeProbe {
    fn is_running(&self, _image_name: &str) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn terminate(&self, _image_name: &str) -> Result<TerminateOutcome, EngineError> {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.terminate_result.lock().unwrap().clone();
        if result.is_ok() {
            self.running.store(false, Ordering::SeqCst);
        }
        result
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
