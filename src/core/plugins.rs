//! Plugin metadata lookup and plugin copying between profiles
//!
//! Plugins live below a profile's plugin root in `dev/<id>/` or `installed/<id>/`,
//! each with a `plugin.json` manifest. Per-plugin settings live in the profile's
//! config directory under `dalamud/pluginConfigs/`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::fs_tree;
use super::profile::Profile;
use super::resource::format_bytes;
use crate::error::FsError;

const DEV_DIR: &str = "dev";
const INSTALLED_DIR: &str = "installed";
const MANIFEST_FILE: &str = "plugin.json";
const ICON_FILE: &str = "icon.png";

/// Fields read from a plugin manifest; everything else in the file is ignored
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct PluginManifest {
    name: Option<String>,
    author: Option<String>,
    description: Option<String>,
    assembly_version: Option<String>,
}

/// A plugin found in a profile's plugin directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    /// Directory name, used as the plugin id
    pub internal_name: String,
    /// Display name from the manifest (falls back to the id)
    pub name: String,
    pub author: String,
    pub description: String,
    pub version: String,
    /// Development plugin (`dev/`) rather than installed from a repository
    pub is_dev: bool,
    pub install_path: PathBuf,
    pub icon_path: Option<PathBuf>,
    /// Size on disk in bytes
    pub size: u64,
}

impl PluginInfo {
    pub fn size_display(&self) -> String {
        format_bytes(self.size)
    }

    fn read(dir: &Path, is_dev: bool) -> Option<Self> {
        let internal_name = dir.file_name()?.to_string_lossy().into_owned();
        let manifest_path = dir.join(MANIFEST_FILE);

        let raw = match fs::read_to_string(&manifest_path) {
            Ok(raw) => raw,
            Err(_) => {
                warn!("No plugin manifest found in {:?}", dir);
                return None;
            }
        };
        let manifest: PluginManifest = match serde_json::from_str(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Failed to parse plugin manifest in {:?}: {}", dir, e);
                return None;
            }
        };

        let icon = dir.join(ICON_FILE);
        Some(Self {
            name: manifest.name.unwrap_or_else(|| internal_name.clone()),
            author: manifest.author.unwrap_or_default(),
            description: manifest.description.unwrap_or_default(),
            version: manifest.assembly_version.unwrap_or_default(),
            is_dev,
            install_path: dir.to_path_buf(),
            icon_path: icon.is_file().then_some(icon),
            size: fs_tree::dir_size(dir).unwrap_or(0),
            internal_name,
        })
    }
}

fn scan_dir(root: &Path, is_dev: bool, found: &mut Vec<PluginInfo>) {
    let Ok(read_dir) = fs::read_dir(root) else {
        return;
    };
    let mut dirs: Vec<PathBuf> = read_dir
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    found.extend(dirs.iter().filter_map(|d| PluginInfo::read(d, is_dev)));
}

/// Plugins installed for a profile, dev plugins first. Missing directories yield an empty list.
pub fn installed_plugins(profile: &Profile) -> Vec<PluginInfo> {
    let Some(root) = profile.plugin_path.as_deref().filter(|p| p.is_dir()) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    scan_dir(&root.join(DEV_DIR), true, &mut found);
    scan_dir(&root.join(INSTALLED_DIR), false, &mut found);
    debug!("Found {} plugins for '{}'", found.len(), profile.name);
    found
}

/// Copy plugins from one profile to another.
///
/// Each copied plugin replaces any existing copy in the target. `only` limits
/// the copy to the given plugin ids. Plugin config files are copied along.
/// Returns the number of plugins copied.
pub fn copy_plugins(
    source: &Profile,
    target: &Profile,
    only: Option<&HashSet<String>>,
) -> Result<usize, FsError> {
    let source_root = source
        .plugin_path
        .as_deref()
        .filter(|p| p.is_dir())
        .ok_or_else(|| FsError::NotFound(source.plugin_path.clone().unwrap_or_default()))?;
    let target_root = target
        .plugin_path
        .as_deref()
        .ok_or_else(|| FsError::NotFound(PathBuf::new()))?;

    fs::create_dir_all(target_root).map_err(|e| FsError::io(target_root, e))?;

    let plugins: Vec<PluginInfo> = installed_plugins(source)
        .into_iter()
        .filter(|p| only.map_or(true, |ids| ids.contains(&p.internal_name)))
        .collect();
    info!(
        "Copying {} plugins from '{}' to '{}' ({:?})",
        plugins.len(),
        source.name,
        target.name,
        source_root
    );

    for plugin in &plugins {
        let kind = if plugin.is_dev { DEV_DIR } else { INSTALLED_DIR };
        let dest = target_root.join(kind).join(&plugin.internal_name);
        fs_tree::replace_dir(&plugin.install_path, &dest)?;
        debug!("Copied plugin {}", plugin.name);
    }

    copy_plugin_configs(source, target)?;
    Ok(plugins.len())
}

/// Copy the files in `dalamud/pluginConfigs` from one config directory to another
fn copy_plugin_configs(source: &Profile, target: &Profile) -> Result<usize, FsError> {
    let (Some(src), Some(dst)) = (source.config_path.as_deref(), target.config_path.as_deref())
    else {
        return Ok(0);
    };
    let src = src.join("dalamud").join("pluginConfigs");
    if !src.is_dir() {
        return Ok(0);
    }
    let dst = dst.join("dalamud").join("pluginConfigs");
    fs::create_dir_all(&dst).map_err(|e| FsError::io(&dst, e))?;

    let mut copied = 0;
    for entry in fs::read_dir(&src).map_err(|e| FsError::io(&src, e))?.flatten() {
        let path = entry.path();
        if path.is_file() {
            fs::copy(&path, dst.join(entry.file_name())).map_err(|e| FsError::io(&path, e))?;
            copied += 1;
        }
    }
    debug!("Copied {} plugin config files", copied);
    Ok(copied)
}

/// Remove a plugin from a profile. Returns false if no such plugin is installed.
pub fn remove_plugin(profile: &Profile, plugin_id: &str) -> Result<bool, FsError> {
    let root = profile
        .plugin_path
        .as_deref()
        .filter(|p| p.is_dir())
        .ok_or_else(|| FsError::NotFound(profile.plugin_path.clone().unwrap_or_default()))?;

    for kind in [DEV_DIR, INSTALLED_DIR] {
        let dir = root.join(kind).join(plugin_id);
        if dir.is_dir() {
            fs::remove_dir_all(&dir).map_err(|e| FsError::io(&dir, e))?;
            info!("Removed plugin {} from '{}'", plugin_id, profile.name);
            return Ok(true);
        }
    }

    warn!("Plugin not found: {}", plugin_id);
    Ok(false)
}

/// Plugins added and removed by [`sync_plugins`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Make the target's plugin set match the source's by id
pub fn sync_plugins(source: &Profile, target: &Profile) -> Result<SyncReport, FsError> {
    let source_ids: HashSet<String> = installed_plugins(source)
        .into_iter()
        .map(|p| p.internal_name)
        .collect();
    let target_ids: HashSet<String> = installed_plugins(target)
        .into_iter()
        .map(|p| p.internal_name)
        .collect();

    let mut report = SyncReport {
        added: source_ids.difference(&target_ids).cloned().collect(),
        removed: target_ids.difference(&source_ids).cloned().collect(),
    };
    report.added.sort();
    report.removed.sort();
    info!(
        "Synchronizing plugins: adding {}, removing {}",
        report.added.len(),
        report.removed.len()
    );

    for id in &report.removed {
        remove_plugin(target, id)?;
    }
    if !report.added.is_empty() {
        let only: HashSet<String> = report.added.iter().cloned().collect();
        copy_plugins(source, target, Some(&only))?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};

    fn profile_in(tmp: &TempDir, name: &str) -> Profile {
        let mut profile = Profile::new(name);
        profile.plugin_path = Some(tmp.path().join(name).join("plugins"));
        profile.config_path = Some(tmp.path().join(name).join("config"));
        profile
    }

    fn install(profile: &Profile, kind: &str, id: &str, manifest: &str) {
        let dir = profile.plugin_path.as_ref().unwrap().join(kind).join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    #[test]
    fn scan_reads_manifests_and_skips_broken_ones() {
        let tmp = tempdir().unwrap();
        let profile = profile_in(&tmp, "a");
        install(
            &profile,
            DEV_DIR,
            "DevTool",
            r#"{"Name":"Dev Tool","Author":"me","AssemblyVersion":"0.1","Extra":1}"#,
        );
        install(&profile, INSTALLED_DIR, "Chat", r#"{"Name":"Chat Helper"}"#);
        install(&profile, INSTALLED_DIR, "Broken", "not json");
        fs::create_dir_all(profile.plugin_path.as_ref().unwrap().join("installed/NoManifest")).unwrap();
        let icon_dir = profile.plugin_path.as_ref().unwrap().join("installed/Chat");
        fs::write(icon_dir.join(ICON_FILE), [1u8; 4]).unwrap();

        let plugins = installed_plugins(&profile);
        let names: Vec<&str> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Dev Tool", "Chat Helper"]);
        assert!(plugins[0].is_dev);
        assert_eq!(plugins[0].version, "0.1");
        assert_eq!(plugins[1].icon_path, Some(icon_dir.join(ICON_FILE)));
        assert!(plugins[1].size > 0);
    }

    #[test]
    fn scan_without_plugin_dir_is_empty() {
        assert!(installed_plugins(&Profile::new("x")).is_empty());
    }

    #[test]
    fn copy_replaces_target_plugins_and_configs() {
        let tmp = tempdir().unwrap();
        let source = profile_in(&tmp, "src");
        let target = profile_in(&tmp, "dst");
        install(&source, INSTALLED_DIR, "Chat", r#"{"Name":"Chat"}"#);
        install(&source, INSTALLED_DIR, "Other", r#"{"Name":"Other"}"#);
        install(&target, INSTALLED_DIR, "Chat", r#"{"Name":"Old Chat"}"#);
        let stale = target.plugin_path.as_ref().unwrap().join("installed/Chat/stale.dll");
        fs::write(&stale, "old").unwrap();

        let configs = source.config_path.as_ref().unwrap().join("dalamud/pluginConfigs");
        fs::create_dir_all(&configs).unwrap();
        fs::write(configs.join("Chat.json"), "{}").unwrap();

        let only: HashSet<String> = ["Chat".to_string()].into();
        assert_eq!(copy_plugins(&source, &target, Some(&only)).unwrap(), 1);

        let copied = installed_plugins(&target);
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].name, "Chat");
        assert!(!stale.exists());
        assert!(target
            .config_path
            .as_ref()
            .unwrap()
            .join("dalamud/pluginConfigs/Chat.json")
            .exists());
    }

    #[test]
    fn copy_from_missing_source_fails() {
        let tmp = tempdir().unwrap();
        let source = profile_in(&tmp, "src");
        let target = profile_in(&tmp, "dst");
        assert!(copy_plugins(&source, &target, None).unwrap_err().is_not_found());
    }

    #[test]
    fn remove_finds_dev_and_installed() {
        let tmp = tempdir().unwrap();
        let profile = profile_in(&tmp, "a");
        install(&profile, DEV_DIR, "A", "{}");
        install(&profile, INSTALLED_DIR, "B", "{}");

        assert!(remove_plugin(&profile, "A").unwrap());
        assert!(remove_plugin(&profile, "B").unwrap());
        assert!(!remove_plugin(&profile, "B").unwrap());
        assert!(installed_plugins(&profile).is_empty());
    }

    #[test]
    fn sync_adds_and_removes() {
        let tmp = tempdir().unwrap();
        let source = profile_in(&tmp, "src");
        let target = profile_in(&tmp, "dst");
        install(&source, INSTALLED_DIR, "Keep", "{}");
        install(&source, INSTALLED_DIR, "New", "{}");
        install(&target, INSTALLED_DIR, "Keep", "{}");
        install(&target, INSTALLED_DIR, "Gone", "{}");

        let report = sync_plugins(&source, &target).unwrap();
        assert_eq!(
            report,
            SyncReport {
                added: vec!["New".into()],
                removed: vec!["Gone".into()],
            }
        );
        let ids: Vec<String> = installed_plugins(&target)
            .into_iter()
            .map(|p| p.internal_name)
            .collect();
        assert_eq!(ids, vec!["Keep".to_string(), "New".to_string()]);
    }
}
