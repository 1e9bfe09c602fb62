//! Core module - Profiles, process supervision, backups and launch orchestration

mod app_state;
pub mod archive;
pub mod backup;
pub mod events;
pub mod fs_tree;
pub mod launcher;
mod monitor;
pub mod plugins;
pub mod process;
pub mod profile;
pub mod resource;
pub mod settings;
pub mod supervisor;

pub use app_state::AppState;
pub use backup::{BackupRecord, BackupService, CleanupReport};
pub use events::{BackupEvent, LaunchEvent, ProcessEvent};
pub use launcher::{LaunchOrchestrator, LaunchedClient};
pub use process::{ClientProcess, ProcessLauncher, SystemLauncher};
pub use profile::{CharacterInfo, Profile, ProfileId};
pub use resource::ResourceUsage;
pub use settings::Settings;
pub use supervisor::{ProcessState, ProcessSupervisor, TrackedProcess};
