//! Settings storage - `settings.json` in the data directory

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::Settings;

pub const SETTINGS_FILE: &str = "settings.json";

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SETTINGS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, or defaults when no file exists yet
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            debug!("No settings file at {:?}, using defaults", self.path);
            return Ok(Settings::default());
        }

        let json = fs::read_to_string(&self.path)
            .context(format!("Failed to read settings from {:?}", self.path))?;
        let mut settings: Settings =
            serde_json::from_str(&json).context("Failed to parse settings")?;
        settings.validate();
        Ok(settings)
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json)
            .context(format!("Failed to write settings to {:?}", self.path))?;
        info!("Settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempdir().unwrap();
        let store = SettingsStore::new(tmp.path());
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn save_then_load_validates() {
        let tmp = tempdir().unwrap();
        let store = SettingsStore::new(&tmp.path().join("nested"));
        let settings = Settings {
            launcher_path: Some(PathBuf::from("/opt/launcher")),
            max_backups_per_profile: 0,
            ..Default::default()
        };
        store.save(&settings).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.launcher_path, settings.launcher_path);
        assert_eq!(loaded.max_backups_per_profile, 1);
    }

    #[test]
    fn garbage_is_an_error() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join(SETTINGS_FILE), "[").unwrap();
        assert!(SettingsStore::new(tmp.path()).load().is_err());
    }
}
