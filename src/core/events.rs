//! Notifications published by the supervisor, backup engine and orchestrator

use std::path::PathBuf;

use tokio::sync::broadcast;

use super::profile::ProfileId;
use super::supervisor::TrackedProcess;

/// Capacity of each notification channel; slow receivers see `Lagged`
pub const EVENT_CAPACITY: usize = 64;

/// Process lifecycle transitions. Each entry yields `Detected` once and at most
/// one of `Exited` / `Crashed`.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Detected(TrackedProcess),
    Exited(TrackedProcess),
    Crashed(TrackedProcess),
}

impl ProcessEvent {
    pub fn process(&self) -> &TrackedProcess {
        match self {
            Self::Detected(p) | Self::Exited(p) | Self::Crashed(p) => p,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Detected(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackupEvent {
    Completed {
        profile_id: ProfileId,
        profile_name: String,
        path: PathBuf,
    },
    Failed {
        profile_id: ProfileId,
        profile_name: String,
        message: String,
    },
    RestoreCompleted {
        profile_id: ProfileId,
        profile_name: String,
        path: PathBuf,
    },
    RestoreFailed {
        profile_id: ProfileId,
        profile_name: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LaunchEvent {
    ClientLaunched {
        profile_id: ProfileId,
        profile_name: String,
        pid: u32,
    },
    LaunchFailed {
        profile_id: ProfileId,
        profile_name: String,
        message: String,
    },
}

pub(crate) fn channel<T: Clone>() -> broadcast::Sender<T> {
    broadcast::channel(EVENT_CAPACITY).0
}

/// Publish without caring whether anyone is listening
pub(crate) fn publish<T>(sender: &broadcast::Sender<T>, event: T) {
    let _ = sender.send(event);
}
