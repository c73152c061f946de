//! # boxwarden-engine
//!
//! Supervises an externally distributed VPN engine binary: keeps it
//! installed and current, launches it with the right privilege level,
//! tracks its liveness and streams its output.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **types** | Run state, manifest, version record, errors, status snapshot |
//! | **settings** | Tunable intervals, URLs and install root |
//! | **layout** | Filesystem layout of the data directory |
//! | **sink** | Log sink collaborator + paired `log` records |
//! | **manifest** | HTTP client – manifest, downloads, subscription text |
//! | **version_store** | Persisted installed version + subscription URL |
//! | **acquisition** | Download, extract and install the engine binary |
//! | **availability** | Periodic reconciliation against the manifest |
//! | **elevation** | Privilege detection and "run as" relaunch |
//! | **process** | Command lines, child spawning, process-table probe |
//! | **supervisor** | Start/stop state machine over the engine process |
//! | **log_tail** | Incremental tailing + sanitizing of the engine log |
//! | **config_watch** | Periodic subscription config refresh |
//! | **service** | Top-level service wiring all components and tasks |

pub mod engine;
