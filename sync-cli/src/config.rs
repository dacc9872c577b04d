//! Configuration resolution for the outbox CLI.

use anyhow::{Context, Result};
use outbox_sync_client::SyncConfig;
use std::path::{Path, PathBuf};

/// File name of the configuration looked up in the data directory.
pub const CONFIG_FILE: &str = "outbox.toml";

/// Effective settings of one CLI invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Engine configuration.
    pub config: SyncConfig,
    /// Resolved queue database path.
    pub database: PathBuf,
}

impl Settings {
    /// Resolve settings from the command line.
    ///
    /// An explicit `--config` file must exist. Without one, `outbox.toml` in
    /// the data directory is used when present and the defaults otherwise.
    /// A relative `[storage].database` is taken relative to the data
    /// directory; an explicit `--database` is used as given.
    pub fn resolve(
        config_path: Option<&Path>,
        database: Option<PathBuf>,
        data_dir: &Path,
    ) -> Result<Self> {
        let config = match config_path {
            Some(path) => SyncConfig::load(path)?,
            None => {
                let path = data_dir.join(CONFIG_FILE);
                if path.exists() {
                    SyncConfig::load(&path)?
                } else {
                    tracing::debug!("No config at {}, using defaults", path.display());
                    SyncConfig::default()
                }
            }
        };

        let database = match database {
            Some(path) => path,
            None if config.storage.database.is_relative() => {
                data_dir.join(&config.storage.database)
            }
            None => config.storage.database.clone(),
        };

        Ok(Self { config, database })
    }
}

/// Get the default data directory for the outbox CLI.
pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "outbox", "outbox")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
