pub mod schema;

pub use schema::{
    ConnectivityConfig, LocalProviderConfig, ProviderConfig, RetryConfig, TroubleshooterConfig,
};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Config file name inside the home directory.
pub const CONFIG_FILE: &str = "troubleshooter.toml";

/// Default home directory (~/.troubleshooter).
pub fn default_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".troubleshooter"))
        .unwrap_or_else(|| PathBuf::from(".troubleshooter"))
}

/// Load config from the given path, or return defaults.
pub fn load_config(path: &Path) -> Result<TroubleshooterConfig> {
    if path.exists() {
        let contents =
            std::fs::read_to_string(path).context("Failed to read troubleshooter config file")?;
        let config: TroubleshooterConfig =
            toml::from_str(&contents).context("Failed to parse troubleshooter config (TOML)")?;
        Ok(config)
    } else {
        Ok(TroubleshooterConfig::default())
    }
}

/// Save config to the given path (TOML format).
pub fn save_config(config: &TroubleshooterConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).context("Failed to write config file")?;
    Ok(())
}
