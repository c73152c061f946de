//! On-disk layout of the install root.
//!
//! ```text
//! <root>/
//!   boxwarden-data/
//!     <engine>[.exe]        installed binary
//!     config.json           active configuration artifact
//!     app_config.json       version record
//!     <engine>-license      license fetched with the binary
//!     <engine>.zip          archive, only while installing
//!     logs/
//!       <engine>.log        live log of an elevated run
//!       <engine>.log.<ts>   archived logs of prior runs
//! ```

use std::path::{Path, PathBuf};

pub const DATA_DIR: &str = "boxwarden-data";
pub const CONFIG_FILE: &str = "config.json";
pub const VERSION_RECORD_FILE: &str = "app_config.json";
pub const LOG_DIR: &str = "logs";

/// Resolved paths for one install root and engine name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLayout {
    root: PathBuf,
    engine_name: String,
}

impl EngineLayout {
    pub fn new(root: impl Into<PathBuf>, engine_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            engine_name: engine_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    /// Image name as it appears in the OS process table.
    pub fn binary_file_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.engine_name)
        } else {
            self.engine_name.clone()
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn binary_path(&self) -> PathBuf {
        self.data_dir().join(self.binary_file_name())
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir().join(CONFIG_FILE)
    }

    pub fn version_record_path(&self) -> PathBuf {
        self.data_dir().join(VERSION_RECORD_FILE)
    }

    pub fn license_path(&self) -> PathBuf {
        self.data_dir().join(format!("{}-license", self.engine_name))
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data_dir().join(format!("{}.zip", self.engine_name))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir().join(LOG_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir().join(format!("{}.log", self.engine_name))
    }

    pub fn binary_exists(&self) -> bool {
        self.binary_path().is_file()
    }

    pub fn config_exists(&self) -> bool {
        self.config_path().is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_data_dir() {
        let l = EngineLayout::new("/srv/bw", "sing-box");
        assert_eq!(l.data_dir(), PathBuf::from("/srv/bw/boxwarden-data"));
        assert_eq!(l.config_path(), l.data_dir().join("config.json"));
        assert_eq!(l.version_record_path(), l.data_dir().join("app_config.json"));
        assert_eq!(l.license_path(), l.data_dir().join("sing-box-license"));
        assert_eq!(l.archive_path(), l.data_dir().join("sing-box.zip"));
        assert_eq!(l.log_path(), l.data_dir().join("logs").join("sing-box.log"));
    }

    #[test]
    fn binary_name_has_platform_extension() {
        let l = EngineLayout::new("/srv/bw", "sing-box");
        if cfg!(windows) {
            assert_eq!(l.binary_file_name(), "sing-box.exe");
        } else {
            assert_eq!(l.binary_file_name(), "sing-box");
        }
        assert!(l.binary_path().ends_with(l.binary_file_name()));
    }

    #[test]
    fn existence_checks() {
        let dir = tempfile::tempdir().unwrap();
        let l = EngineLayout::new(dir.path(), "engine");
        assert!(!l.binary_exists());
        assert!(!l.config_exists());
        std::fs::create_dir_all(l.data_dir()).unwrap();
        std::fs::write(l.binary_path(), b"bin").unwrap();
        std::fs::write(l.config_path(), b"{}").unwrap();
        assert!(l.binary_exists());
        assert!(l.config_exists());
    }
}
