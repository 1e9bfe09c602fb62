//! Client profiles - Isolated configuration and plugin roots with launch flags

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProfileError;

/// Unique identifier for a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileId(pub Uuid);

impl ProfileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptive character details shown next to a profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterInfo {
    /// Character name
    pub name: String,
    /// World or server name
    pub world: String,
    /// Job or class abbreviation
    pub job: String,
}

/// A client profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Unique identifier
    pub id: ProfileId,
    /// Display name
    pub name: String,
    /// Client configuration directory (passed as the roaming path)
    pub config_path: Option<PathBuf>,
    /// Plugin system directory
    pub plugin_path: Option<PathBuf>,
    /// Game installation directory
    pub game_path: Option<PathBuf>,
    /// Launch through Steam
    pub is_steam: bool,
    /// Force DirectX 11 mode
    pub force_dx11: bool,
    /// Skip automatic login
    pub no_auto_login: bool,
    /// Prompt for a one-time password
    pub use_otp: bool,
    /// Load the plugin system
    pub enable_dalamud: bool,
    /// Extra launcher arguments, appended verbatim
    pub additional_args: String,
    /// Include this profile in automatic backups
    pub auto_backup: bool,
    /// Character details
    pub character: CharacterInfo,
    /// When the profile was last backed up
    pub last_backup: Option<DateTime<Utc>>,
    /// When the profile was last launched
    pub last_used: Option<DateTime<Utc>>,
    /// Accumulated play time in minutes
    pub total_play_time_minutes: u64,
    /// When the profile was created
    pub created_at: DateTime<Utc>,
    enabled_plugins: BTreeSet<String>,
    disabled_plugins: BTreeSet<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self::new("New Profile")
    }
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProfileId::new(),
            name: name.into(),
            config_path: None,
            plugin_path: None,
            game_path: None,
            is_steam: false,
            force_dx11: true,
            no_auto_login: false,
            use_otp: false,
            enable_dalamud: true,
            additional_args: String::new(),
            auto_backup: false,
            character: CharacterInfo::default(),
            last_backup: None,
            last_used: None,
            total_play_time_minutes: 0,
            created_at: Utc::now(),
            enabled_plugins: BTreeSet::new(),
            disabled_plugins: BTreeSet::new(),
        }
    }

    /// Copy this profile under a fresh identity.
    ///
    /// Paths and launch flags carry over; bookkeeping (timestamps, play time)
    /// starts again from zero.
    pub fn duplicate(&self) -> Self {
        Self {
            id: ProfileId::new(),
            name: format!("{} (Copy)", self.name),
            created_at: Utc::now(),
            last_used: None,
            last_backup: None,
            total_play_time_minutes: 0,
            ..self.clone()
        }
    }

    /// Plugins explicitly enabled for this profile
    pub fn enabled_plugins(&self) -> &BTreeSet<String> {
        &self.enabled_plugins
    }

    /// Plugins explicitly disabled for this profile
    pub fn disabled_plugins(&self) -> &BTreeSet<String> {
        &self.disabled_plugins
    }

    pub fn enable_plugin(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.disabled_plugins.remove(&id);
        self.enabled_plugins.insert(id);
    }

    pub fn disable_plugin(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.enabled_plugins.remove(&id);
        self.disabled_plugins.insert(id);
    }

    /// Forget any explicit choice for a plugin
    pub fn reset_plugin(&mut self, id: &str) {
        self.enabled_plugins.remove(id);
        self.disabled_plugins.remove(id);
    }

    /// Check that no plugin is both enabled and disabled.
    ///
    /// The mutators above keep this true; records edited by hand may not.
    pub fn check_plugin_sets(&self) -> Result<(), ProfileError> {
        match self
            .enabled_plugins
            .intersection(&self.disabled_plugins)
            .next()
        {
            Some(id) => Err(ProfileError::PluginConflict(id.clone())),
            None => Ok(()),
        }
    }

    /// Configured paths that do not point at an existing directory
    pub fn missing_paths(&self) -> Vec<PathBuf> {
        [&self.config_path, &self.plugin_path, &self.game_path]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_dir())
            .cloned()
            .collect()
    }

    /// True when every configured path exists
    pub fn validate_paths(&self) -> bool {
        self.missing_paths().is_empty()
    }

    /// Record play time from a finished session
    pub fn add_play_time(&mut self, minutes: u64) {
        self.total_play_time_minutes = self.total_play_time_minutes.saturating_add(minutes);
    }

    /// Mark profile as launched
    pub fn mark_used(&mut self) {
        self.last_used = Some(Utc::now());
    }

    /// Export profile to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Import profile from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Human readable play time, e.g. "42 minutes", "3 hours, 5 minutes", "2 days, 4 hours"
pub fn format_play_time(minutes: u64) -> String {
    let hours = minutes / 60;
    let days = hours / 24;

    if hours < 1 {
        format!("{} minutes", minutes)
    } else if days < 1 {
        format!("{} hours, {} minutes", hours, minutes % 60)
    } else {
        format!("{} days, {} hours", days, hours % 24)
    }
}
