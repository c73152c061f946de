//! # boxwarden
//!
//! Console host for [`boxwarden_engine`]. Wires the engine service to a
//! timestamped console sink and handles process-level concerns.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **cli** | `clap` arguments and settings overrides |
//! | **console** | Console log sink and throttled engine-log relay |
//! | **instance** | Single-instance guard |
//! | **app** | Startup, auto-start and graceful shutdown |

pub mod app;
pub mod cli;
pub mod console;
pub mod instance;
