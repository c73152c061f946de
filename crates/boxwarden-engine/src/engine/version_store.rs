//! Persisted version record: active subscription URL and the installed
//! engine version.
//!
//! Every mutation is a read-modify-write of the whole JSON file,
//! serialized through an async mutex.

use crate::engine::types::*;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct VersionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl VersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record; an absent file yields an empty record.
    pub async fn load(&self) -> Result<VersionRecord, EngineError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VersionRecord::default())
            }
            Err(e) => return Err(EngineError::io("Failed to read version record", &e)),
        };
        serde_json::from_slice(&data).map_err(|e| {
            EngineError::new(EngineErrorKind::ParseError, "Failed to parse version record")
                .with_detail(e.to_string())
        })
    }

    pub async fn save(&self, record: &VersionRecord) -> Result<(), EngineError> {
        let _guard = self.write_lock.lock().await;
        self.write(record).await
    }

    async fn write(&self, record: &VersionRecord) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::io("Failed to create data directory", &e))?;
        }
        let data = serde_json::to_vec_pretty(record).map_err(|e| {
            EngineError::new(EngineErrorKind::Internal, "Failed to encode version record")
                .with_detail(e.to_string())
        })?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| EngineError::io("Failed to save version record", &e))
    }

    async fn update<F>(&self, apply: F) -> Result<VersionRecord, EngineError>
    where
        F: FnOnce(&mut VersionRecord),
    {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load().await?;
        apply(&mut record);
        self.write(&record).await?;
        Ok(record)
    }

    /// Create the record if it does not exist yet, seeding the subscription
    /// URL. Nothing is written without a default. Returns `true` when a
    /// file was written.
    pub async fn ensure_exists(&self, default_subscription: Option<&str>) -> Result<bool, EngineError> {
        let default_subscription = match default_subscription {
            Some(url) if !url.is_empty() => url,
            _ => return Ok(false),
        };
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(false);
        }
        let record = VersionRecord {
            subscription_url: default_subscription.to_string(),
            installed_version: String::new(),
        };
        self.write(&record).await?;
        Ok(true)
    }

    pub async fn installed_version(&self) -> Result<String, EngineError> {
        Ok(self.load().await?.installed_version)
    }

    pub async fn subscription_url(&self) -> Result<String, EngineError> {
        Ok(self.load().await?.subscription_url)
    }

    pub async fn set_installed_version(&self, version: &str) -> Result<(), EngineError> {
        self.update(|r| r.installed_version = version.to_string())
            .await
            .map(|_| ())
    }

    pub async fn set_subscription_url(&self, url: &str) -> Result<(), EngineError> {
        self.update(|r| r.subscription_url = url.to_string())
            .await
            .map(|_| ())
    }
}

/// Whether the installed version differs from the manifest's.
/// Nothing installed always counts as a mismatch.
pub fn version_mismatch(installed: &str, manifest_version: &str) -> bool {
    installed.is_empty() || installed != manifest_version
}
