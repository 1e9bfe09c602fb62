//! Application settings management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::APP_NAME;

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Launching
    /// External launcher executable
    pub launcher_path: Option<PathBuf>,
    /// Delay between launches when starting several profiles (seconds)
    pub default_launch_delay_secs: u64,
    /// Refuse to launch a profile whose previous client is still running
    pub check_for_running_instances: bool,

    // Backups
    /// Root directory for backup archives (None = default location)
    pub backup_path: Option<PathBuf>,
    /// Archives kept per profile when pruning
    pub max_backups_per_profile: usize,
    /// Include the plugin directory in backups
    pub backup_plugins: bool,
    /// Restore the plugin directory from backups
    pub restore_plugins: bool,
    /// Back up auto-backup profiles before launching them
    pub auto_backup_before_launch: bool,
    /// Back up auto-backup profiles after their client exits normally
    pub auto_backup_after_exit: bool,

    // Advanced
    /// Process monitor polling interval in ms
    pub monitor_interval_ms: u64,
    /// Custom data directory
    pub data_directory: Option<PathBuf>,
    /// Enable debug logging
    pub debug_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Launching
            launcher_path: None,
            default_launch_delay_secs: 5,
            check_for_running_instances: true,

            // Backups
            backup_path: None,
            max_backups_per_profile: 5,
            backup_plugins: true,
            restore_plugins: true,
            auto_backup_before_launch: false,
            auto_backup_after_exit: false,

            // Advanced
            monitor_interval_ms: 5000,
            data_directory: None,
            debug_logging: false,
        }
    }
}

impl Settings {
    /// Get the data directory, using default if not set
    pub fn get_data_directory(&self) -> PathBuf {
        self.data_directory.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_NAME)
        })
    }

    /// Get the profiles directory
    pub fn get_profiles_directory(&self) -> PathBuf {
        self.get_data_directory().join("profiles")
    }

    /// Get the logs directory
    pub fn get_logs_directory(&self) -> PathBuf {
        self.get_data_directory().join("logs")
    }

    /// Get the backup root, falling back to the documents folder
    pub fn get_backup_directory(&self) -> PathBuf {
        if let Some(path) = self.backup_path.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            return path.clone();
        }
        match dirs::document_dir() {
            Some(docs) => docs.join(APP_NAME).join("Backups"),
            None => self.get_data_directory().join("Backups"),
        }
    }

    /// Validate settings and fix any invalid values
    pub fn validate(&mut self) {
        self.monitor_interval_ms = self.monitor_interval_ms.max(100);
        self.max_backups_per_profile = self.max_backups_per_profile.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.default_launch_delay_secs, 5);
        assert_eq!(settings.max_backups_per_profile, 5);
        assert_eq!(settings.monitor_interval_ms, 5000);
        assert!(settings.backup_plugins);
        assert!(settings.check_for_running_instances);
        assert!(!settings.auto_backup_after_exit);
    }

    #[test]
    fn validate_clamps() {
        let mut settings = Settings {
            monitor_interval_ms: 5,
            max_backups_per_profile: 0,
            ..Default::default()
        };
        settings.validate();
        assert_eq!(settings.monitor_interval_ms, 100);
        assert_eq!(settings.max_backups_per_profile, 1);
    }

    #[test]
    fn directories_follow_data_directory() {
        let settings = Settings {
            data_directory: Some(PathBuf::from("/tmp/xm")),
            ..Default::default()
        };
        assert_eq!(settings.get_profiles_directory(), PathBuf::from("/tmp/xm/profiles"));
        assert_eq!(settings.get_logs_directory(), PathBuf::from("/tmp/xm/logs"));
    }

    #[test]
    fn explicit_backup_path_wins() {
        let settings = Settings {
            backup_path: Some(PathBuf::from("/srv/backups")),
            ..Default::default()
        };
        assert_eq!(settings.get_backup_directory(), PathBuf::from("/srv/backups"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"backup_plugins": false}"#).unwrap();
        assert!(!settings.backup_plugins);
        assert_eq!(settings.default_launch_delay_secs, 5);
    }
}
