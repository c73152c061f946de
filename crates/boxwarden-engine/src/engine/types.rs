//! Shared types, enums, error types, and status payloads for the engine crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Run state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Externally visible lifecycle state of the engine.
///
/// Exactly one state is active at a time. The availability monitor moves
/// between `Unavailable`, `Downloading` and `Available`; the supervisor
/// moves between `Available`, `Starting`, `Running` and `Stopping`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No usable binary on disk and no way to fetch one right now.
    #[default]
    Unavailable,
    /// An acquisition is in flight.
    Downloading,
    /// Binary installed, engine not running.
    Available,
    /// Launch in progress.
    Starting,
    /// Engine process alive (owned or elevated).
    Running,
    /// Termination in progress.
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Available => write!(f, "Available"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Delivery manifest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Remote descriptor of the current distributable engine build.
///
/// Replaced wholesale on every successful fetch; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryManifest {
    #[serde(rename = "default_subscription_url", default)]
    pub default_subscription_url: String,
    #[serde(rename = "sing_box_license_file")]
    pub license_url: String,
    #[serde(rename = "sing_box_zip_url")]
    pub archive_url: String,
    /// Opaque identifier, compared by equality only.
    #[serde(rename = "sing_box_version")]
    pub version: String,
    /// Exact path of the engine binary inside the archive.
    #[serde(rename = "in_archive_exec_path")]
    pub in_archive_exec_path: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Version record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persisted record of the active subscription and installed build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub subscription_url: String,
    /// Empty means "never installed".
    #[serde(rename = "current_sing_box_version", alias = "installed_version", default)]
    pub installed_version: String,
}

impl VersionRecord {
    pub fn has_installed_version(&self) -> bool {
        !self.installed_version.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Status snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Point-in-time view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub run_state: RunState,
    pub available: bool,
    pub downloading: bool,
    pub running: bool,
    /// `true` when the running engine was launched through elevation.
    pub elevated: bool,
    pub manifest_version: Option<String>,
    pub binary_path: PathBuf,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Crate-level error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineErrorKind {
    /// Transport failure or non-success HTTP status.
    Network,
    ParseError,
    IoError,
    /// Engine binary not installed.
    BinaryMissing,
    /// Configuration artifact not present.
    ConfigMissing,
    /// Binary not marked available by the availability monitor.
    NotAvailable,
    /// Declared in-archive path has no matching archive entry.
    EntryNotFound,
    InvalidArchive,
    /// Elevation prompt cancelled by the user.
    AccessDenied,
    /// OS out of memory or resources.
    OutOfMemory,
    /// No application associated with the executable.
    NoAssociation,
    /// Any other elevation failure; `code` carries the raw result.
    ElevationFailed,
    ProcessSpawnFailed,
    TerminateFailed,
    /// Operation not legal in the current run state.
    InvalidState,
    InvalidInput,
    Internal,
}

/// Crate-level error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
    pub detail: Option<String>,
    /// Raw OS result code, when one exists.
    pub code: Option<i64>,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(d) = &self.detail {
            write!(f, " ({})", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    pub fn new(kind: EngineErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            detail: None,
            code: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn io(msg: impl Into<String>, err: &std::io::Error) -> Self {
        Self::new(EngineErrorKind::IoError, msg).with_detail(err.to_string())
    }

    /// Failures the availability monitor simply retries on its next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, EngineErrorKind::Network)
    }

    /// Failures caused by a missing prerequisite; state never advances.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self.kind,
            EngineErrorKind::BinaryMissing
                | EngineErrorKind::ConfigMissing
                | EngineErrorKind::NotAvailable
                | EngineErrorKind::EntryNotFound
                | EngineErrorKind::InvalidInput
        )
    }
}

impl From<EngineError> for String {
    fn from(e: EngineError) -> String {
        e.to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
