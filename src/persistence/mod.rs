//! Persistence layer - JSON files for profiles and settings

mod profiles;
mod settings;

pub use profiles::ProfileStore;
pub use settings::SettingsStore;
