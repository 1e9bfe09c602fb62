//! Backup and restore of profile state
//!
//! A backup is a single zip archive holding the serialized profile record, a copy
//! of the configuration directory and, when enabled, a copy of the plugin
//! directory. Archives live in a per-profile directory (named by profile id) below
//! the backup root and are named `{profile name}_{yyyy-MM-dd_HH-mm-ss}.zip`, local
//! time. That timestamp is how creation time is recovered when listing.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::archive::{self, ARCHIVE_EXTENSION, CONFIG_DIR, PLUGINS_DIR, PROFILE_RECORD};
use super::events::{self, BackupEvent};
use super::fs_tree;
use super::profile::{Profile, ProfileId};
use super::settings::Settings;
use crate::error::{BackupError, FsError};

/// Timestamp layout embedded in archive file names
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Prefix of the working directory a backup is assembled in, next to its archive
const SCRATCH_PREFIX: &str = "xivmulti-backup-";

/// A backup archive found on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupRecord {
    /// Profile the archive belongs to
    pub profile_id: ProfileId,
    /// Archive file name
    pub file_name: String,
    /// Full path to the archive
    pub path: PathBuf,
    /// Creation time from the file name, or the filesystem when the name has none
    pub created_at: DateTime<Local>,
    /// Archive size in bytes
    pub size: u64,
}

/// Outcome of a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
}

struct ArchiveFile {
    file_name: String,
    path: PathBuf,
    created_at: DateTime<Local>,
    size: u64,
}

/// Replace characters that cannot appear in file names on common filesystems
fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Archive file name for a profile backed up at `at`
pub fn backup_file_name(profile_name: &str, at: DateTime<Local>) -> String {
    format!(
        "{}_{}.{}",
        sanitize_file_stem(profile_name),
        at.format(TIMESTAMP_FORMAT),
        ARCHIVE_EXTENSION
    )
}

/// Recover the creation time embedded in an archive file name
pub fn parse_backup_timestamp(file_name: &str) -> Option<DateTime<Local>> {
    let path = Path::new(file_name);
    let stem = if is_archive(path) {
        path.file_stem()?.to_str()?
    } else {
        file_name
    };

    let mut parts = stem.rsplitn(3, '_');
    let time = parts.next()?;
    let date = parts.next()?;

    let naive =
        NaiveDateTime::parse_from_str(&format!("{}_{}", date, time), TIMESTAMP_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

/// Archives in `dir`, newest first. Unreadable entries are skipped.
fn scan_archives(dir: &Path) -> Result<Vec<ArchiveFile>, FsError> {
    let read_dir = fs::read_dir(dir).map_err(|e| FsError::io(dir, e))?;

    let mut found = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unreadable entry in {:?}: {}", dir, e);
                continue;
            }
        };
        let path = entry.path();
        if !is_archive(&path) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) => {
                debug!("Skipping {:?}: {}", path, e);
                continue;
            }
        };

        let file_name = entry.file_name().to_string_lossy().into_owned();
        let created_at = match parse_backup_timestamp(&file_name) {
            Some(ts) => ts,
            None => match meta.created().or_else(|_| meta.modified()) {
                Ok(time) => DateTime::<Local>::from(time),
                Err(e) => {
                    debug!("No timestamp for {:?}: {}", path, e);
                    continue;
                }
            },
        };

        found.push(ArchiveFile {
            file_name,
            path,
            created_at,
            size: meta.len(),
        });
    }

    found.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.file_name.cmp(&a.file_name))
    });
    Ok(found)
}

fn join_error(e: tokio::task::JoinError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Creates, lists, prunes and restores profile backups
#[derive(Clone)]
pub struct BackupService {
    settings: Arc<RwLock<Settings>>,
    events: broadcast::Sender<BackupEvent>,
}

impl BackupService {
    pub fn new(settings: Arc<RwLock<Settings>>) -> Self {
        Self {
            settings,
            events: events::channel(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BackupEvent> {
        self.events.subscribe()
    }

    fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Backup root in effect: the explicit override, the configured path, or the default
    pub fn backup_root(&self, root_override: Option<&Path>) -> PathBuf {
        match root_override {
            Some(root) => root.to_path_buf(),
            None => self.settings().get_backup_directory(),
        }
    }

    /// Directory holding one profile's archives
    pub fn profile_backup_dir(&self, profile_id: ProfileId, root_override: Option<&Path>) -> PathBuf {
        self.backup_root(root_override).join(profile_id.to_string())
    }

    /// Snapshot a profile into a new archive.
    ///
    /// On success the profile's `last_backup` is updated. Failures are reported
    /// on the event channel and returned.
    pub fn create_backup(
        &self,
        profile: &mut Profile,
        root_override: Option<&Path>,
    ) -> Result<PathBuf, BackupError> {
        info!("Creating backup for profile '{}'", profile.name);

        match self.write_backup(profile, root_override) {
            Ok(path) => {
                profile.last_backup = Some(Utc::now());
                info!("Created backup archive {:?}", path);
                events::publish(
                    &self.events,
                    BackupEvent::Completed {
                        profile_id: profile.id,
                        profile_name: profile.name.clone(),
                        path: path.clone(),
                    },
                );
                Ok(path)
            }
            Err(e) => {
                error!("Backup of profile '{}' failed: {}", profile.name, e);
                events::publish(
                    &self.events,
                    BackupEvent::Failed {
                        profile_id: profile.id,
                        profile_name: profile.name.clone(),
                        message: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    fn write_backup(
        &self,
        profile: &Profile,
        root_override: Option<&Path>,
    ) -> Result<PathBuf, BackupError> {
        let settings = self.settings();
        let dir = self.profile_backup_dir(profile.id, root_override);
        fs::create_dir_all(&dir).map_err(|e| FsError::io(&dir, e))?;

        let path = dir.join(backup_file_name(&profile.name, Local::now()));
        if path.exists() {
            fs::remove_file(&path).map_err(|e| FsError::io(&path, e))?;
        }

        // Removed on drop, whichever way this function returns
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&dir)?;

        fs::write(
            scratch.path().join(PROFILE_RECORD),
            serde_json::to_vec_pretty(profile)?,
        )?;

        match profile.config_path.as_deref() {
            Some(config) if config.is_dir() => {
                let files = fs_tree::copy_dir(config, &scratch.path().join(CONFIG_DIR))?;
                debug!("Backed up {} config files from {:?}", files, config);
            }
            Some(config) => warn!("Config directory {:?} does not exist, skipping", config),
            None => debug!("Profile '{}' has no config directory", profile.name),
        }

        if settings.backup_plugins {
            if let Some(plugins) = profile.plugin_path.as_deref().filter(|p| p.is_dir()) {
                let files = fs_tree::copy_dir(plugins, &scratch.path().join(PLUGINS_DIR))?;
                debug!("Backed up {} plugin files from {:?}", files, plugins);
            }
        }

        archive::create_from_directory(scratch.path(), &path)?;

        if let Err(e) = scratch.close() {
            debug!("Failed to remove backup scratch directory: {}", e);
        }
        Ok(path)
    }

    /// Restore an archive over the profile's live directories.
    ///
    /// Directories present in the archive replace the live ones entirely. Never
    /// returns an error: failures yield `false` and a `RestoreFailed` event.
    pub fn restore_backup(&self, archive_path: &Path, profile: &Profile) -> bool {
        if !archive_path.is_file() {
            error!("Backup file does not exist: {:?}", archive_path);
            self.restore_failed(profile, "Backup file does not exist".to_string());
            return false;
        }

        info!("Restoring backup for profile '{}'", profile.name);
        match self.extract_backup(archive_path, profile) {
            Ok(()) => {
                events::publish(
                    &self.events,
                    BackupEvent::RestoreCompleted {
                        profile_id: profile.id,
                        profile_name: profile.name.clone(),
                        path: archive_path.to_path_buf(),
                    },
                );
                true
            }
            Err(e) => {
                error!("Restore of profile '{}' failed: {}", profile.name, e);
                self.restore_failed(profile, e.to_string());
                false
            }
        }
    }

    fn restore_failed(&self, profile: &Profile, message: String) {
        events::publish(
            &self.events,
            BackupEvent::RestoreFailed {
                profile_id: profile.id,
                profile_name: profile.name.clone(),
                message,
            },
        );
    }

    fn extract_backup(&self, archive_path: &Path, profile: &Profile) -> Result<(), BackupError> {
        let settings = self.settings();
        let scratch = tempfile::Builder::new()
            .prefix("xivmulti-restore-")
            .tempdir()?;

        archive::extract_to_directory(archive_path, scratch.path())?;

        let config_backup = scratch.path().join(CONFIG_DIR);
        if let Some(config) = profile.config_path.as_deref() {
            if config_backup.is_dir() {
                fs_tree::replace_dir(&config_backup, config)?;
                info!("Restored config directory to {:?}", config);
            }
        }

        let plugin_backup = scratch.path().join(PLUGINS_DIR);
        if settings.restore_plugins {
            if let Some(plugins) = profile.plugin_path.as_deref() {
                if plugin_backup.is_dir() {
                    fs_tree::replace_dir(&plugin_backup, plugins)?;
                    info!("Restored plugin directory to {:?}", plugins);
                }
            }
        }

        if let Err(e) = scratch.close() {
            debug!("Failed to remove restore scratch directory: {}", e);
        }
        Ok(())
    }

    /// Backups for a profile, newest first. An unreadable directory yields an empty list.
    pub fn available_backups(&self, profile: &Profile) -> Vec<BackupRecord> {
        let dir = self.profile_backup_dir(profile.id, None);
        let archives = match scan_archives(&dir) {
            Ok(archives) => archives,
            Err(FsError::NotFound(_)) => return Vec::new(),
            Err(e) => {
                error!("Failed to list backups for '{}': {}", profile.name, e);
                return Vec::new();
            }
        };

        archives
            .into_iter()
            .map(|a| BackupRecord {
                profile_id: profile.id,
                file_name: a.file_name,
                path: a.path,
                created_at: a.created_at,
                size: a.size,
            })
            .collect()
    }

    /// Delete one archive. Returns false if it was missing or could not be removed.
    pub fn delete_backup(&self, path: &Path) -> bool {
        if !path.is_file() {
            warn!("Backup file does not exist: {:?}", path);
            return false;
        }

        match fs::remove_file(path) {
            Ok(()) => {
                info!("Deleted backup file {:?}", path);
                true
            }
            Err(e) => {
                error!("Failed to delete backup {:?}: {}", path, e);
                false
            }
        }
    }

    /// Keep the newest `max_per_profile` archives in every profile directory.
    ///
    /// Best effort: a file that cannot be deleted is logged and counted, and the
    /// pass carries on.
    pub fn cleanup_old_backups(&self, max_per_profile: usize) -> CleanupReport {
        self.prune_backups(max_per_profile, |path| fs::remove_file(path))
    }

    fn prune_backups(
        &self,
        max_per_profile: usize,
        mut remove: impl FnMut(&Path) -> io::Result<()>,
    ) -> CleanupReport {
        let root = self.backup_root(None);
        let mut report = CleanupReport::default();

        let read_dir = match fs::read_dir(&root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
            Err(e) => {
                error!("Failed to read backup root {:?}: {}", root, e);
                return report;
            }
        };

        for dir in read_dir.flatten().map(|e| e.path()).filter(|p| p.is_dir()) {
            let archives = match scan_archives(&dir) {
                Ok(archives) => archives,
                Err(e) => {
                    warn!("Skipping backup directory {:?}: {}", dir, e);
                    continue;
                }
            };

            for old in archives.iter().skip(max_per_profile) {
                match remove(&old.path) {
                    Ok(()) => {
                        debug!("Pruned old backup {:?}", old.path);
                        report.deleted += 1;
                    }
                    Err(e) => {
                        warn!("Failed to prune backup {:?}: {}", old.path, e);
                        report.failed += 1;
                    }
                }
            }
        }

        if report.deleted > 0 {
            info!("Pruned {} old backups", report.deleted);
        }
        report
    }

    /// Back up every profile with auto-backup enabled.
    ///
    /// One profile failing does not stop the rest; its entry maps to `None`.
    pub fn backup_all_profiles(
        &self,
        profiles: &mut [Profile],
    ) -> HashMap<ProfileId, Option<PathBuf>> {
        let mut results = HashMap::new();
        for profile in profiles.iter_mut().filter(|p| p.auto_backup) {
            let outcome = self.create_backup(profile, None).ok();
            if outcome.is_some() {
                info!("Auto-backup completed for profile '{}'", profile.name);
            }
            results.insert(profile.id, outcome);
        }
        results
    }

    /// [`Self::create_backup`] on the blocking pool. Returns the updated profile.
    pub async fn create_backup_async(
        &self,
        mut profile: Profile,
        root_override: Option<PathBuf>,
    ) -> Result<(Profile, PathBuf), BackupError> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || {
            let path = service.create_backup(&mut profile, root_override.as_deref())?;
            Ok::<_, BackupError>((profile, path))
        })
        .await
        .map_err(join_error)?
    }

    /// [`Self::restore_backup`] on the blocking pool
    pub async fn restore_backup_async(&self, archive_path: PathBuf, profile: Profile) -> bool {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.restore_backup(&archive_path, &profile))
            .await
            .unwrap_or_else(|e| {
                error!("Restore task failed: {}", e);
                false
            })
    }

    /// [`Self::cleanup_old_backups`] on the blocking pool
    pub async fn cleanup_old_backups_async(&self, max_per_profile: usize) -> CleanupReport {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.cleanup_old_backups(max_per_profile))
            .await
            .unwrap_or_else(|e| {
                error!("Cleanup task failed: {}", e);
                CleanupReport::default()
            })
    }

    /// [`Self::backup_all_profiles`] on the blocking pool
    pub async fn backup_all_profiles_async(
        &self,
        mut profiles: Vec<Profile>,
    ) -> (Vec<Profile>, HashMap<ProfileId, Option<PathBuf>>) {
        let service = self.clone();
        let fallback: Vec<Profile> = profiles.clone();
        match tokio::task::spawn_blocking(move || {
            let results = service.backup_all_profiles(&mut profiles);
            (profiles, results)
        })
        .await
        {
            Ok(done) => done,
            Err(e) => {
                error!("Batch backup task failed: {}", e);
                (fallback, HashMap::new())
            }
        }
    }
}
