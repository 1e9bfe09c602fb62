//! XivMulti - Run and back up multiple isolated game client profiles
//!
//! Each profile owns its own configuration and plugin directories. Profiles are
//! launched through an external launcher executable, the spawned processes are
//! supervised on a polling timer, and profile state can be snapshotted into
//! timestamped archives and restored later.

pub mod cli;
pub mod core;
pub mod error;
pub mod persistence;

/// Application name constant
pub const APP_NAME: &str = "XivMulti";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
