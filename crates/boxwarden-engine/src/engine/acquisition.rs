//! Acquisition pipeline: license + archive download, exact-path
//! extraction, atomic install and version bookkeeping.
//!
//! Steps run in order and abort on the first failure. The installed
//! binary is only ever replaced by an atomic rename, so a failed run
//! leaves the previous install untouched.

use crate::engine::layout::EngineLayout;
use crate::engine::manifest::RemoteSource;
use crate::engine::sink::EventLog;
use crate::engine::types::*;
use crate::engine::version_store::VersionStore;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Permissions applied when the archive entry carries none.
#[cfg(unix)]
const FALLBACK_MODE: u32 = 0o755;

pub struct AcquisitionPipeline {
    layout: EngineLayout,
    remote: Arc<dyn RemoteSource>,
    store: Arc<VersionStore>,
    events: EventLog,
}

impl AcquisitionPipeline {
    pub fn new(
        layout: EngineLayout,
        remote: Arc<dyn RemoteSource>,
        store: Arc<VersionStore>,
        events: EventLog,
    ) -> Self {
        Self {
            layout,
            remote,
            store,
            events,
        }
    }

    /// Run every step for `manifest`. Errors are logged before returning.
    pub async fn run(&self, manifest: &DeliveryManifest) -> Result<(), EngineError> {
        let result = self.run_steps(manifest).await;
        if let Err(e) = &result {
            self.events.error(format!("Engine acquisition failed: {}", e));
        }
        result
    }

    async fn run_steps(&self, manifest: &DeliveryManifest) -> Result<(), EngineError> {
        let data_dir = self.layout.data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| EngineError::io("Error creating data directory", &e))?;

        self.events
            .info(format!("Starting {} download...", self.layout.engine_name()));

        self.events.info("Downloading license file...");
        self.remote
            .download(&manifest.license_url, &self.layout.license_path())
            .await?;

        let archive_path = self.layout.archive_path();
        self.events.info(format!(
            "Downloading {}...",
            file_label(&archive_path)
        ));
        self.remote
            .download(&manifest.archive_url, &archive_path)
            .await?;

        self.events
            .info(format!("Extracting {}...", file_label(&archive_path)));
        let entry = manifest.in_archive_exec_path.clone();
        let target = self.layout.binary_path();
        let archive = archive_path.clone();
        let extracted = tokio::task::spawn_blocking(move || extract_entry(&archive, &entry, &target))
            .await
            .map_err(|e| {
                EngineError::new(EngineErrorKind::Internal, "Extraction task failed")
                    .with_detail(e.to_string())
            });
        // A failed extraction still leaves the archive on disk; drop it.
        let extracted = match extracted.and_then(|r| r) {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&archive_path).await {
                    self.events
                        .warn(format!("Warning: Could not delete archive: {}", rm));
                }
                return Err(e);
            }
        };
        log::debug!("installed {} bytes to {}", extracted, self.layout.binary_path().display());

        self.events
            .info(format!("Deleting {}...", file_label(&archive_path)));
        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            self.events
                .warn(format!("Warning: Could not delete archive: {}", e));
        }

        self.store.set_installed_version(&manifest.version).await?;

        self.events.info(format!(
            "{} {} download and extraction completed",
            self.layout.engine_name(),
            manifest.version
        ));
        Ok(())
    }
}

fn file_label(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Extract the archive entry named exactly `entry_path` to `target`.
///
/// The bytes land in a temporary file next to `target` which is renamed
/// over it only once fully written. No fuzzy matching: a missing entry is
/// an [`EngineErrorKind::EntryNotFound`] error and `target` is not touched.
pub fn extract_entry(archive: &Path, entry_path: &str, target: &Path) -> Result<u64, EngineError> {
    let file = File::open(archive)
        .map_err(|e| EngineError::io(format!("Cannot open {}", archive.display()), &e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| {
        EngineError::new(EngineErrorKind::InvalidArchive, "Archive is not a valid zip")
            .with_detail(e.to_string())
    })?;

    let mut entry = match zip.by_name(entry_path) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(EngineError::new(
                EngineErrorKind::EntryNotFound,
                format!("{} not found in {}", entry_path, archive.display()),
            ))
        }
        Err(e) => {
            return Err(
                EngineError::new(EngineErrorKind::InvalidArchive, "Cannot read archive entry")
                    .with_detail(e.to_string()),
            )
        }
    };
    if entry.is_dir() {
        return Err(EngineError::new(
            EngineErrorKind::EntryNotFound,
            format!("{} is a directory in {}", entry_path, archive.display()),
        ));
    }
    let mode = entry.unix_mode();

    let parent = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut staged = tempfile::NamedTempFile::new_in(&parent)
        .map_err(|e| EngineError::io("Cannot create staging file", &e))?;
    let written = std::io::copy(&mut entry, staged.as_file_mut())
        .map_err(|e| EngineError::io("Cannot extract archive entry", &e))?;
    staged
        .as_file_mut()
        .flush()
        .map_err(|e| EngineError::io("Cannot flush staging file", &e))?;
    apply_mode(staged.as_file(), mode)?;

    staged.persist(target).map_err(|e| {
        EngineError::io(format!("Cannot install {}", target.display()), &e.error)
    })?;
    Ok(written)
}

#[cfg(unix)]
fn apply_mode(file: &File, mode: Option<u32>) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = mode.map(|m| m & 0o7777).unwrap_or(FALLBACK_MODE);
    file.set_permissions(std::fs::Permissions::from_mode(mode))
        .map_err(|e| EngineError::io("Cannot set binary permissions", &e))
}

#[cfg(not(unix))]
fn apply_mode(_file: &File, _mode: Option<u32>) -> Result<(), EngineError> {
    Ok(())
}
