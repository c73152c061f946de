//! Command-line surface of the host binary.

use anyhow::{Context, Result};
use boxwarden_engine::engine::settings::SETTINGS_FILE;
use boxwarden_engine::engine::EngineSettings;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "boxwarden")]
#[command(about = "Keeps the sing-box engine installed, current and running", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Install root holding the data directory (default: executable's directory)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Settings file (default: <root>/boxwarden.json)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Override the delivery manifest URL
    #[arg(long)]
    pub manifest_url: Option<String>,

    /// Subscription URL to fetch and watch
    #[arg(long)]
    pub subscription: Option<String>,

    /// Start the engine as soon as it becomes available
    #[arg(long)]
    pub start: bool,
}

impl Cli {
    /// Settings file contents with command-line overrides applied.
    pub fn resolve_settings(&self) -> Result<EngineSettings> {
        let root = match &self.root {
            Some(r) => r.clone(),
            None => EngineSettings::default().resolved_install_root(),
        };
        let path = self
            .settings
            .clone()
            .unwrap_or_else(|| root.join(SETTINGS_FILE));

        let mut settings = EngineSettings::load(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(r) = &self.root {
            settings = settings.with_install_root(r);
        }
        if let Some(url) = &self.manifest_url {
            settings.manifest_url = url.clone();
        }
        Ok(settings)
    }
}
