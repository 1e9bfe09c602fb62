//! Profile storage - One pretty-printed JSON file per profile, named by id

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::core::{Profile, ProfileId};
use crate::error::ProfileError;
use crate::APP_NAME;

/// Attempts made by [`ProfileStore::generate_unique_paths`] before giving up
const MAX_PATH_SUFFIX: u32 = 100;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ProfileError + '_ {
    move |source| ProfileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

fn clients_root() -> PathBuf {
    dirs::document_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("Clients")
}

/// Directory-backed profile store
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    /// Open the store, creating its directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        debug!("Profile store at {:?}", dir);
        Ok(Self { dir })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: ProfileId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn read(path: &Path) -> Result<Profile, ProfileError> {
        let json = fs::read_to_string(path).map_err(io_err(path))?;
        let profile = Profile::from_json(&json)?;
        profile.check_plugin_sets()?;
        Ok(profile)
    }

    /// Load every stored profile, sorted by name.
    ///
    /// Files that cannot be read or parsed are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<Profile>, ProfileError> {
        let mut profiles = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err(&self.dir))? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    error!("Failed to read profile directory entry: {}", e);
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path) {
                Ok(profile) => profiles.push(profile),
                Err(e) => error!("Error loading profile from {:?}: {}", path, e),
            }
        }

        profiles.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(profiles)
    }

    pub fn get(&self, id: ProfileId) -> Result<Option<Profile>, ProfileError> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    /// Look a profile up by id, or by exact name (case-insensitive)
    pub fn find(&self, query: &str) -> Result<Option<Profile>, ProfileError> {
        if let Some(id) = ProfileId::parse(query) {
            if let Some(profile) = self.get(id)? {
                return Ok(Some(profile));
            }
        }
        Ok(self
            .load_all()?
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(query)))
    }

    /// Write a profile, replacing any previous record atomically
    pub fn save(&self, profile: &Profile) -> Result<(), ProfileError> {
        profile.check_plugin_sets()?;

        let path = self.path_for(profile.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, profile.to_json()?).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        info!("Saved profile '{}'", profile.name);
        Ok(())
    }

    /// Delete a profile record. Returns false if there was none.
    pub fn delete(&self, id: ProfileId) -> Result<bool, ProfileError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted profile {}", id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Add play time to a stored profile. Returns the updated profile, if it exists.
    pub fn add_play_time(&self, id: ProfileId, minutes: u64) -> Result<Option<Profile>, ProfileError> {
        let Some(mut profile) = self.get(id)? else {
            return Ok(None);
        };
        profile.add_play_time(minutes);
        self.save(&profile)?;
        Ok(Some(profile))
    }

    /// True if no other stored profile uses the same config or plugin directory
    pub fn paths_are_unique(&self, profile: &Profile) -> Result<bool, ProfileError> {
        let others = self.load_all()?;
        let clash = others.iter().filter(|o| o.id != profile.id).any(|other| {
            let config_clash = matches!(
                (&profile.config_path, &other.config_path),
                (Some(a), Some(b)) if same_path(a, b)
            );
            let plugin_clash = matches!(
                (&profile.plugin_path, &other.plugin_path),
                (Some(a), Some(b)) if same_path(a, b)
            );
            config_clash || plugin_clash
        });
        Ok(!clash)
    }

    /// Point the profile at `Clients/ClientN/{Config,Plugins}` for the first N
    /// that no other profile uses
    pub fn generate_unique_paths(&self, profile: &mut Profile) -> Result<(), ProfileError> {
        let root = clients_root();
        for suffix in 1..=MAX_PATH_SUFFIX {
            let base = root.join(format!("Client{}", suffix));
            profile.config_path = Some(base.join("Config"));
            profile.plugin_path = Some(base.join("Plugins"));
            if self.paths_are_unique(profile)? {
                break;
            }
        }
        Ok(())
    }

    /// A starter profile with its own client directories
    pub fn default_profile(&self) -> Profile {
        let base = clients_root().join("Default");
        let mut profile = Profile::new("Default Profile");
        profile.config_path = Some(base.join("Config"));
        profile.plugin_path = Some(base.join("Plugins"));
        profile.force_dx11 = true;
        profile.enable_dalamud = true;
        profile.auto_backup = true;
        profile
    }
}
