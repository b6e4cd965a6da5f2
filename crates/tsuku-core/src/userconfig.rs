use std::fs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::TsukuHome;

/// User configuration stored at `$TSUKU_HOME/config.toml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default = "default_telemetry")]
    pub telemetry: bool,
}

fn default_telemetry() -> bool {
    true
}

impl Default for UserConfig {
    fn default() -> Self {
        Self { telemetry: true }
    }
}

impl UserConfig {
    /// Loads the config; a missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error for unreadable or invalid TOML.
    pub fn load(home: &TsukuHome) -> Result<Self> {
        let path = home.config_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// # Errors
    /// Returns an error when the file cannot be written.
    pub fn save(&self, home: &TsukuHome) -> Result<()> {
        fs::create_dir_all(home.root())?;
        let encoded = toml::to_string(self).context("failed to encode config")?;
        fs::write(home.config_path(), encoded)
            .with_context(|| format!("failed to write {}", home.config_path().display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_defaults_to_telemetry_on() {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = TsukuHome::at(dir.path().join("tsuku"));
        let config = UserConfig::load(&home).expect("load");
        assert!(config.telemetry);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = TsukuHome::at(dir.path().join("tsuku"));
        let config = UserConfig { telemetry: false };
        config.save(&home).expect("save");

        let loaded = UserConfig::load(&home).expect("load");
        assert!(!loaded.telemetry);
        let raw = fs::read_to_string(home.config_path()).expect("read");
        assert!(raw.contains("telemetry = false"));
    }

    #[test]
    fn invalid_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let home = TsukuHome::at(dir.path().join("tsuku"));
        fs::create_dir_all(home.root()).expect("mkdir");
        fs::write(home.config_path(), "telemetry = \"maybe\"").expect("write");
        assert!(UserConfig::load(&home).is_err());
    }
}
