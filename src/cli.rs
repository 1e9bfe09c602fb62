//! Command line interface

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use single_instance::SingleInstance;
use tracing::{info, warn};

use crate::core::plugins;
use crate::core::profile::format_play_time;
use crate::core::resource::format_bytes;
use crate::core::{AppState, Profile, ProfileId};
use crate::APP_NAME;

/// XivMulti: run several isolated game client profiles side by side
///
/// Each profile has its own configuration and plugin directories. Clients are
/// started through the external launcher, watched until they exit, and profile
/// state can be backed up and restored.
#[derive(Debug, Parser)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Data directory holding settings, profiles and logs.
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage profiles
    #[command(subcommand)]
    Profile(ProfileCommand),

    /// Launch one or more profiles and supervise their clients
    Launch {
        /// Profile ids or names, launched in this order
        #[arg(required = true)]
        profiles: Vec<String>,

        /// Seconds between launches (defaults to the configured delay, negative means 0)
        #[arg(long, allow_negative_numbers = true)]
        delay: Option<i64>,

        /// Return after launching instead of waiting for the clients to exit
        #[arg(long)]
        no_wait: bool,
    },

    /// Create, list, restore and prune backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Inspect and copy plugins
    #[command(subcommand)]
    Plugins(PluginCommand),

    /// Show or change settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    /// List all profiles
    List,
    /// Show one profile
    Show { profile: String },
    /// Create a profile
    Create(CreateProfile),
    /// Create the default profile
    CreateDefault,
    /// Copy a profile under a new id
    Clone { profile: String },
    /// Delete a profile record (its directories are left alone)
    Delete { profile: String },
}

#[derive(Debug, Args)]
pub struct CreateProfile {
    /// Display name
    pub name: String,
    /// Configuration directory
    #[arg(long)]
    pub config_path: Option<PathBuf>,
    /// Plugin directory
    #[arg(long)]
    pub plugin_path: Option<PathBuf>,
    /// Game installation directory
    #[arg(long)]
    pub game_path: Option<PathBuf>,
    /// Pick fresh client directories that no other profile uses
    #[arg(long, conflicts_with_all = ["config_path", "plugin_path"])]
    pub unique_paths: bool,
    /// Steam client
    #[arg(long)]
    pub steam: bool,
    /// Do not force DirectX 11
    #[arg(long)]
    pub no_dx11: bool,
    /// Skip automatic login
    #[arg(long)]
    pub no_auto_login: bool,
    /// Prompt for a one-time password
    #[arg(long)]
    pub otp: bool,
    /// Do not load the plugin system
    #[arg(long)]
    pub no_dalamud: bool,
    /// Extra launcher arguments, passed through unchanged
    #[arg(long, allow_hyphen_values = true)]
    pub args: Option<String>,
    /// Include in automatic backups
    #[arg(long)]
    pub auto_backup: bool,
}

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Back up one profile
    Create {
        profile: String,
        /// Backup root to use instead of the configured one
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// List a profile's backups, newest first
    List { profile: String },
    /// Restore an archive over a profile's directories
    Restore { profile: String, archive: PathBuf },
    /// Delete one archive
    Delete { archive: PathBuf },
    /// Keep only the newest backups of every profile
    Cleanup {
        /// Archives to keep per profile (defaults to the configured maximum)
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Back up every profile with auto-backup enabled
    All,
}

#[derive(Debug, Subcommand)]
pub enum PluginCommand {
    /// List a profile's plugins
    List { profile: String },
    /// Copy plugins from one profile to another
    Copy {
        from: String,
        to: String,
        /// Only these plugin ids
        #[arg(long)]
        only: Vec<String>,
    },
    /// Make a profile's plugins match another's
    Sync { from: String, to: String },
    /// Remove a plugin from a profile
    Remove { profile: String, plugin: String },
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Print the current settings
    Show,
    /// Set the launcher executable
    SetLauncher { path: PathBuf },
    /// Set the backup root directory
    SetBackupPath { path: PathBuf },
    /// Set the default delay between launches
    SetLaunchDelay { seconds: u64 },
    /// Set how many backups to keep per profile
    SetMaxBackups { count: usize },
    /// Turn automatic backups before launch and after exit on or off
    AutoBackup {
        #[arg(long)]
        before_launch: Option<bool>,
        #[arg(long)]
        after_exit: Option<bool>,
    },
    /// Turn plugin backup and restore on or off
    PluginBackups {
        #[arg(long)]
        backup: Option<bool>,
        #[arg(long)]
        restore: Option<bool>,
    },
}

fn resolve(state: &AppState, query: &str) -> Result<Profile> {
    state
        .profiles
        .find(query)?
        .with_context(|| format!("No profile matches '{}'", query))
}

/// One line of `profile list` output
fn profile_line(profile: &Profile) -> String {
    let last_used = profile
        .last_used
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "{}  {:<24} {:>10}  last used {}",
        profile.id,
        profile.name,
        format_play_time(profile.total_play_time_minutes),
        last_used
    )
}

fn print_profile(profile: &Profile) {
    let show = |p: &Option<PathBuf>| {
        p.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    println!("{} ({})", profile.name, profile.id);
    println!("  config:      {}", show(&profile.config_path));
    println!("  plugins:     {}", show(&profile.plugin_path));
    println!("  game:        {}", show(&profile.game_path));
    println!("  auto backup: {}", profile.auto_backup);
    println!("  play time:   {}", format_play_time(profile.total_play_time_minutes));
    if let Some(last) = profile.last_used {
        println!("  last used:   {}", last.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"));
    }
    if let Some(last) = profile.last_backup {
        println!("  last backup: {}", last.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"));
    }
    let missing = profile.missing_paths();
    if !missing.is_empty() {
        println!("  missing:     {:?}", missing);
    }
}

/// Execute a parsed command
pub async fn run(command: Command, state: &AppState) -> Result<()> {
    match command {
        Command::Profile(cmd) => run_profile(cmd, state),
        Command::Launch {
            profiles,
            delay,
            no_wait,
        } => run_launch(state, &profiles, delay, no_wait).await,
        Command::Backup(cmd) => run_backup(cmd, state).await,
        Command::Plugins(cmd) => run_plugins(cmd, state),
        Command::Settings(cmd) => run_settings(cmd, state),
    }
}

fn run_profile(cmd: ProfileCommand, state: &AppState) -> Result<()> {
    match cmd {
        ProfileCommand::List => {
            for profile in state.profiles.load_all()? {
                println!("{}", profile_line(&profile));
            }
        }
        ProfileCommand::Show { profile } => print_profile(&resolve(state, &profile)?),
        ProfileCommand::Create(args) => {
            let mut profile = Profile::new(args.name);
            profile.config_path = args.config_path;
            profile.plugin_path = args.plugin_path;
            profile.game_path = args.game_path;
            profile.is_steam = args.steam;
            profile.force_dx11 = !args.no_dx11;
            profile.no_auto_login = args.no_auto_login;
            profile.use_otp = args.otp;
            profile.enable_dalamud = !args.no_dalamud;
            profile.additional_args = args.args.unwrap_or_default();
            profile.auto_backup = args.auto_backup;

            if args.unique_paths {
                state.profiles.generate_unique_paths(&mut profile)?;
            } else if !state.profiles.paths_are_unique(&profile)? {
                bail!("Another profile already uses this config or plugin directory");
            }
            state.profiles.save(&profile)?;
            println!("Created profile {} ({})", profile.name, profile.id);
        }
        ProfileCommand::CreateDefault => {
            let profile = state.profiles.default_profile();
            if !state.profiles.paths_are_unique(&profile)? {
                bail!("A profile already uses the default client directories");
            }
            state.profiles.save(&profile)?;
            println!("Created profile {} ({})", profile.name, profile.id);
        }
        ProfileCommand::Clone { profile } => {
            let copy = resolve(state, &profile)?.duplicate();
            state.profiles.save(&copy)?;
            println!("Created profile {} ({})", copy.name, copy.id);
        }
        ProfileCommand::Delete { profile } => {
            let profile = resolve(state, &profile)?;
            if state.profiles.delete(profile.id)? {
                println!("Deleted profile {}", profile.name);
            }
        }
    }
    Ok(())
}

async fn run_launch(
    state: &AppState,
    queries: &[String],
    delay: Option<i64>,
    no_wait: bool,
) -> Result<()> {
    let lock = SingleInstance::new(&format!("{}-launch", APP_NAME))
        .map_err(|e| anyhow::anyhow!("Failed to create single instance lock: {}", e))?;
    if !lock.is_single() {
        bail!("Another {} launch session is already running", APP_NAME);
    }

    let ids: Vec<ProfileId> = queries
        .iter()
        .map(|q| resolve(state, q).map(|p| p.id))
        .collect::<Result<_>>()?;

    if let Some(delay) = delay {
        state.launcher.set_launch_delay(delay);
    }

    let launched = match ids.as_slice() {
        [single] => {
            let client = state.launch_profile(*single).await?;
            println!("Launched PID {}", client.pid);
            1
        }
        _ => state.launch_all(&ids).await?,
    };
    println!("Launched {} of {} clients", launched, ids.len());

    if no_wait || launched == 0 {
        return Ok(());
    }

    info!("Waiting for clients to exit");
    tokio::select! {
        result = state.supervise() => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, no longer supervising clients");
            state.supervisor.stop_monitoring();
        }
    }
    Ok(())
}

async fn run_backup(cmd: BackupCommand, state: &AppState) -> Result<()> {
    match cmd {
        BackupCommand::Create { profile, dest } => {
            let profile = resolve(state, &profile)?;
            let (updated, path) = state.backups.create_backup_async(profile, dest).await?;
            state.profiles.save(&updated)?;
            println!("{}", path.display());
        }
        BackupCommand::List { profile } => {
            let profile = resolve(state, &profile)?;
            for record in state.backups.available_backups(&profile) {
                println!(
                    "{}  {:>10}  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    format_bytes(record.size),
                    record.path.display()
                );
            }
        }
        BackupCommand::Restore { profile, archive } => {
            let profile = resolve(state, &profile)?;
            if state.supervisor.is_running(profile.id) {
                bail!("Close the client for '{}' before restoring", profile.name);
            }
            if !state.backups.restore_backup_async(archive, profile).await {
                bail!("Restore failed, see the log for details");
            }
            println!("Restored");
        }
        BackupCommand::Delete { archive } => {
            if !state.backups.delete_backup(&archive) {
                bail!("Could not delete {}", archive.display());
            }
        }
        BackupCommand::Cleanup { keep } => {
            let keep = keep.unwrap_or_else(|| state.settings().max_backups_per_profile);
            let report = state.backups.cleanup_old_backups(keep);
            println!("Deleted {} old backups ({} failed)", report.deleted, report.failed);
        }
        BackupCommand::All => {
            let profiles = state.profiles.load_all()?;
            let (updated, results) = state.backups.backup_all_profiles_async(profiles).await;
            for profile in updated.iter().filter(|p| results.contains_key(&p.id)) {
                match &results[&profile.id] {
                    Some(path) => {
                        state.profiles.save(profile)?;
                        println!("{}: {}", profile.name, path.display());
                    }
                    None => println!("{}: failed", profile.name),
                }
            }
        }
    }
    Ok(())
}

fn run_plugins(cmd: PluginCommand, state: &AppState) -> Result<()> {
    match cmd {
        PluginCommand::List { profile } => {
            let profile = resolve(state, &profile)?;
            for plugin in plugins::installed_plugins(&profile) {
                let choice = if profile.enabled_plugins().contains(&plugin.internal_name) {
                    "enabled"
                } else if profile.disabled_plugins().contains(&plugin.internal_name) {
                    "disabled"
                } else {
                    "default"
                };
                println!(
                    "{:<24} {:<10} {:<8} {}{}",
                    plugin.internal_name,
                    plugin.version,
                    choice,
                    plugin.name,
                    if plugin.is_dev { " (dev)" } else { "" }
                );
            }
        }
        PluginCommand::Copy { from, to, only } => {
            let source = resolve(state, &from)?;
            let target = resolve(state, &to)?;
            let only: HashSet<String> = only.into_iter().collect();
            let filter = (!only.is_empty()).then_some(&only);
            let copied = plugins::copy_plugins(&source, &target, filter)?;
            println!("Copied {} plugins", copied);
        }
        PluginCommand::Sync { from, to } => {
            let source = resolve(state, &from)?;
            let target = resolve(state, &to)?;
            let report = plugins::sync_plugins(&source, &target)?;
            println!(
                "Added {:?}, removed {:?}",
                report.added, report.removed
            );
        }
        PluginCommand::Remove { profile, plugin } => {
            let mut profile = resolve(state, &profile)?;
            if !plugins::remove_plugin(&profile, &plugin)? {
                bail!("Plugin '{}' is not installed", plugin);
            }
            profile.reset_plugin(&plugin);
            state.profiles.save(&profile)?;
        }
    }
    Ok(())
}

fn run_settings(cmd: SettingsCommand, state: &AppState) -> Result<()> {
    match cmd {
        SettingsCommand::Show => {
            println!("{}", serde_json::to_string_pretty(&state.settings())?);
            println!("backup root: {}", state.settings().get_backup_directory().display());
            return Ok(());
        }
        SettingsCommand::SetLauncher { path } => {
            if !path.is_file() {
                warn!("Launcher {:?} does not exist yet", path);
            }
            state.update_settings(|s| s.launcher_path = Some(path))?;
        }
        SettingsCommand::SetBackupPath { path } => {
            state.update_settings(|s| s.backup_path = Some(path))?;
        }
        SettingsCommand::SetLaunchDelay { seconds } => {
            state.update_settings(|s| s.default_launch_delay_secs = seconds)?;
        }
        SettingsCommand::SetMaxBackups { count } => {
            state.update_settings(|s| s.max_backups_per_profile = count)?;
        }
        SettingsCommand::AutoBackup {
            before_launch,
            after_exit,
        } => state.update_settings(|s| {
            if let Some(v) = before_launch {
                s.auto_backup_before_launch = v;
            }
            if let Some(v) = after_exit {
                s.auto_backup_after_exit = v;
            }
        })?,
        SettingsCommand::PluginBackups { backup, restore } => state.update_settings(|s| {
            if let Some(v) = backup {
                s.backup_plugins = v;
            }
            if let Some(v) = restore {
                s.restore_plugins = v;
            }
        })?,
    }
    println!("Settings saved");
    Ok(())
}
