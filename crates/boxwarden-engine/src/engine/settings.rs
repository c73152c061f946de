//! Tunable settings for the engine supervisor.

use crate::engine::types::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the delivery manifest is published.
pub const DEFAULT_MANIFEST_URL: &str = "https://raw.githubusercontent.com/pekashy/go-sing/a311c5534eeda63ab8c7c82ecbec5861ff1e2538/delivery/delivery_config.json";

/// Default engine image name (without platform extension).
pub const DEFAULT_ENGINE_NAME: &str = "sing-box";

/// Settings file looked up in the install root by the host.
pub const SETTINGS_FILE: &str = "boxwarden.json";

/// Supervisor settings. Every field has a default so partial files load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub manifest_url: String,
    /// Directory holding the data directory. Empty = executable's directory.
    pub install_root: PathBuf,
    pub engine_name: String,
    pub availability_interval_ms: u64,
    pub liveness_interval_ms: u64,
    pub tail_interval_ms: u64,
    pub config_refresh_interval_ms: u64,
    pub http_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.into(),
            install_root: PathBuf::new(),
            engine_name: DEFAULT_ENGINE_NAME.into(),
            availability_interval_ms: 5_000,
            liveness_interval_ms: 2_000,
            tail_interval_ms: 500,
            config_refresh_interval_ms: 60_000,
            http_timeout_secs: 30,
        }
    }
}

impl EngineSettings {
    /// Load settings from a JSON file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(EngineError::io(
                    format!("Cannot read settings {}", path.display()),
                    &e,
                ))
            }
        };
        serde_json::from_str(&data).map_err(|e| {
            EngineError::new(EngineErrorKind::ParseError, "Invalid settings file")
                .with_detail(e.to_string())
        })
    }

    pub fn with_install_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.install_root = root.into();
        self
    }

    /// The install root, falling back to the running executable's directory.
    pub fn resolved_install_root(&self) -> PathBuf {
        if !self.install_root.as_os_str().is_empty() {
            return rootify(self.install_root.clone());
        }
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        rootify(exe_dir)
    }

    pub fn availability_interval(&self) -> Duration {
        Duration::from_millis(self.availability_interval_ms.max(1))
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms.max(1))
    }

    pub fn tail_interval(&self) -> Duration {
        Duration::from_millis(self.tail_interval_ms.max(1))
    }

    pub fn config_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.config_refresh_interval_ms.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}

/// A bare drive like `C:` means "current dir on C", not the drive root.
fn rootify(p: PathBuf) -> PathBuf {
    let s = p.to_string_lossy();
    let bytes = s.as_bytes();
    if bytes.len() == 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return PathBuf::from(format!("{}\\", s));
    }
    p
}
