//! Application state - Wires settings, profiles, supervisor, backups and launcher

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use super::backup::BackupService;
use super::events::ProcessEvent;
use super::launcher::{LaunchOrchestrator, LaunchedClient};
use super::process::{ProcessLauncher, SystemLauncher};
use super::profile::{Profile, ProfileId};
use super::settings::Settings;
use super::supervisor::ProcessSupervisor;
use crate::error::LaunchError;
use crate::persistence::{ProfileStore, SettingsStore};

/// Central application state
pub struct AppState {
    /// Application settings
    pub settings: Arc<RwLock<Settings>>,
    /// Stored profiles
    pub profiles: ProfileStore,
    /// Tracks launched clients
    pub supervisor: ProcessSupervisor,
    /// Backup engine
    pub backups: BackupService,
    /// Launch orchestrator
    pub launcher: LaunchOrchestrator,
    settings_store: SettingsStore,
}

impl AppState {
    /// Load settings and profiles from `data_dir` (or the default data directory)
    pub fn load(data_dir: Option<PathBuf>) -> Result<Self> {
        Self::load_with_launcher(data_dir, Arc::new(SystemLauncher))
    }

    /// Read the settings stored in `data_dir` (or the default data directory)
    /// without opening anything else
    pub fn load_settings(data_dir: Option<PathBuf>) -> Result<Settings> {
        let data_dir = data_dir.unwrap_or_else(|| Settings::default().get_data_directory());
        let mut settings = SettingsStore::new(&data_dir).load()?;
        settings.data_directory = Some(data_dir);
        Ok(settings)
    }

    /// As [`Self::load`], starting clients through `launcher`
    pub fn load_with_launcher(
        data_dir: Option<PathBuf>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Self> {
        let settings = Self::load_settings(data_dir)?;
        let data_dir = settings.get_data_directory();
        let settings_store = SettingsStore::new(&data_dir);

        std::fs::create_dir_all(&data_dir)
            .context(format!("Failed to create data directory {:?}", data_dir))?;
        let profiles = ProfileStore::new(settings.get_profiles_directory())
            .context("Failed to open profile store")?;

        let supervisor =
            ProcessSupervisor::new(Duration::from_millis(settings.monitor_interval_ms));
        let settings = Arc::new(RwLock::new(settings));
        let backups = BackupService::new(settings.clone());
        let launcher = LaunchOrchestrator::new(settings.clone(), supervisor.clone(), launcher);

        info!("Application state loaded from {:?}", data_dir);
        Ok(Self {
            settings,
            profiles,
            supervisor,
            backups,
            launcher,
            settings_store,
        })
    }

    /// Copy of the current settings
    pub fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change settings and persist them
    pub fn update_settings(&self, update: impl FnOnce(&mut Settings)) -> Result<()> {
        let snapshot = {
            let mut settings = self
                .settings
                .write()
                .map_err(|e| anyhow::anyhow!("Settings lock poisoned: {}", e))?;
            update(&mut settings);
            settings.validate();
            settings.clone()
        };
        self.settings_store.save(&snapshot)
    }

    fn require_profile(&self, id: ProfileId) -> Result<Profile> {
        self.profiles
            .get(id)?
            .with_context(|| format!("Profile {} not found", id))
    }

    /// Launch one stored profile.
    ///
    /// Refuses a profile whose client is still running (when enabled), takes a
    /// pre-launch backup (when enabled; failure only logs), launches, and
    /// persists the updated profile.
    pub async fn launch_profile(&self, id: ProfileId) -> Result<LaunchedClient> {
        let mut profile = self.require_profile(id)?;
        let settings = self.settings();

        if settings.check_for_running_instances && self.supervisor.is_running(profile.id) {
            let err = LaunchError::AlreadyRunning {
                id: profile.id,
                name: profile.name.clone(),
            };
            return Err(self.launcher.fail(&profile, err).into());
        }

        if settings.auto_backup_before_launch && profile.auto_backup {
            match self.backups.create_backup_async(profile.clone(), None).await {
                Ok((updated, path)) => {
                    info!("Pre-launch backup of '{}' written to {:?}", updated.name, path);
                    profile = updated;
                }
                Err(e) => warn!(
                    "Pre-launch backup of '{}' failed, launching anyway: {}",
                    profile.name, e
                ),
            }
        }

        let result = self.launcher.launch_client(&mut profile);
        self.profiles.save(&profile)?;
        Ok(result?)
    }

    /// Launch several stored profiles in order with the configured delay.
    ///
    /// Returns how many clients were started.
    pub async fn launch_all(&self, ids: &[ProfileId]) -> Result<usize> {
        let settings = self.settings();
        let mut profiles = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.profiles.get(id)? {
                Some(profile) => profiles.push(profile),
                None => warn!("Profile {} not found, skipping", id),
            }
        }

        if settings.check_for_running_instances {
            profiles.retain(|profile| {
                if self.supervisor.is_running(profile.id) {
                    let err = LaunchError::AlreadyRunning {
                        id: profile.id,
                        name: profile.name.clone(),
                    };
                    self.launcher.fail(profile, err);
                    false
                } else {
                    true
                }
            });
        }

        if settings.auto_backup_before_launch {
            let (updated, results) = self.backups.backup_all_profiles_async(profiles).await;
            let failed = results.values().filter(|r| r.is_none()).count();
            if failed > 0 {
                warn!("{} pre-launch backups failed", failed);
            }
            profiles = updated;
        }

        let launched = self.launcher.launch_multiple_clients(&mut profiles).await;

        for profile in &profiles {
            if let Err(e) = self.profiles.save(profile) {
                error!("Failed to save profile '{}': {}", profile.name, e);
            }
        }
        Ok(launched)
    }

    /// React to a supervisor notification.
    ///
    /// A finished session adds its whole minutes to the profile's play time. A
    /// normal exit also triggers the post-exit backup when enabled.
    pub async fn handle_process_event(&self, event: &ProcessEvent) -> Result<()> {
        let process = match event {
            ProcessEvent::Detected(_) => return Ok(()),
            ProcessEvent::Exited(p) | ProcessEvent::Crashed(p) => p,
        };

        let minutes = process.run_time().num_minutes();
        let profile = if minutes > 0 {
            self.profiles
                .add_play_time(process.profile_id, minutes as u64)?
        } else {
            self.profiles.get(process.profile_id)?
        };

        let Some(profile) = profile else {
            warn!(
                "Profile {} for finished PID {} no longer exists",
                process.profile_id, process.pid
            );
            return Ok(());
        };

        let settings = self.settings();
        if matches!(event, ProcessEvent::Exited(_))
            && settings.auto_backup_after_exit
            && profile.auto_backup
        {
            let (updated, path) = self
                .backups
                .create_backup_async(profile, None)
                .await
                .context("Post-exit backup failed")?;
            info!("Post-exit backup of '{}' written to {:?}", updated.name, path);
            self.profiles.save(&updated)?;
            self.backups
                .cleanup_old_backups_async(settings.max_backups_per_profile)
                .await;
        }
        Ok(())
    }

    /// Poll tracked clients until none is running, handling each notification
    pub async fn supervise(&self) -> Result<()> {
        let mut events = self.supervisor.subscribe();
        self.supervisor.start_monitoring();

        while self.supervisor.running_count() > 0 {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = self.handle_process_event(&event).await {
                        error!("Failed to handle process event: {:#}", e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} process notifications", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }

        while let Ok(event) = events.try_recv() {
            if let Err(e) = self.handle_process_event(&event).await {
                error!("Failed to handle process event: {:#}", e);
            }
        }

        self.supervisor.stop_monitoring();
        info!("No clients running, supervision finished");
        Ok(())
    }
}
