//! Engine module root – re-exports public API surface.

pub mod types;
pub mod settings;
pub mod layout;
pub mod sink;
pub mod manifest;
pub mod version_store;
pub mod acquisition;
pub mod availability;
pub mod elevation;
pub mod process;
pub mod supervisor;
pub mod log_tail;
pub mod config_watch;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use types::*;
pub use settings::EngineSettings;
pub use layout::EngineLayout;
pub use sink::{EventLog, LogSink};
pub use service::{EngineControl, EngineParts, EngineService, EngineServiceState};
