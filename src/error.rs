//! Typed errors for the profile, filesystem, archive, backup and launch layers

use std::path::PathBuf;

use thiserror::Error;

use crate::core::ProfileId;

/// Filesystem failures, keeping "not there" apart from real I/O trouble
#[derive(Debug, Error)]
pub enum FsError {
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Fs(#[from] FsError),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("failed to serialize profile record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("launcher path is not configured")]
    LauncherNotConfigured,

    #[error("launcher executable not found: {}", .0.display())]
    LauncherNotFound(PathBuf),

    #[error("profile '{name}' ({id}) is already running")]
    AlreadyRunning { id: ProfileId, name: String },

    #[error("failed to spawn launcher: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("plugin '{0}' is both enabled and disabled")]
    PluginConflict(String),

    #[error("profile I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid profile record: {0}")]
    Serialize(#[from] serde_json::Error),
}
