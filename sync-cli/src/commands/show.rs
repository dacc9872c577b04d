//! Print the effective configuration.

use anyhow::Result;

use crate::config::Settings;

/// Render the effective configuration as TOML.
///
/// `[storage].database` shows the resolved path.
pub fn run(settings: &Settings) -> Result<String> {
    let mut config = settings.config.clone();
    config.storage.database = settings.database.clone();
    Ok(config.to_toml_string()?)
}
