//! Archive codec - Packs a snapshot directory into a single zip file and back

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{ArchiveError, FsError};

/// File extension used for backup archives
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Name of the serialized profile record inside an archive
pub const PROFILE_RECORD: &str = "profile.json";

/// Directory holding the configuration tree inside an archive
pub const CONFIG_DIR: &str = "config";

/// Directory holding the plugin tree inside an archive
pub const PLUGINS_DIR: &str = "plugins";

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Archive entry name for a path relative to the snapshot root, always '/' separated
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn partial_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    archive_path.with_file_name(name)
}

/// Compress everything below `source_dir` into `archive_path`.
///
/// The archive is written next to its destination and renamed into place once
/// complete, so a failed run never leaves a truncated archive under the final name.
/// Returns the number of file entries written.
pub fn create_from_directory(source_dir: &Path, archive_path: &Path) -> Result<u64, ArchiveError> {
    if !source_dir.is_dir() {
        return Err(FsError::NotFound(source_dir.to_path_buf()).into());
    }

    let partial = partial_path(archive_path);
    let result = write_archive(source_dir, &partial);

    match result {
        Ok(files) => {
            fs::rename(&partial, archive_path).map_err(io_err(archive_path))?;
            debug!(
                "Wrote archive {:?} with {} files",
                archive_path.file_name().unwrap_or_default(),
                files
            );
            Ok(files)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn write_archive(source_dir: &Path, target: &Path) -> Result<u64, ArchiveError> {
    let file = File::create(target).map_err(io_err(target))?;
    let mut zip = ZipWriter::new(file);
    let options =
        FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);

    let mut files = 0;
    for entry in WalkDir::new(source_dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source_dir).to_path_buf();
            ArchiveError::Io {
                path,
                source: e.into(),
            }
        })?;
        let relative = match entry.path().strip_prefix(source_dir) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let name = entry_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else {
            zip.start_file(name, options)?;
            let mut input = File::open(entry.path()).map_err(io_err(entry.path()))?;
            io::copy(&mut input, &mut zip).map_err(io_err(entry.path()))?;
            files += 1;
        }
    }

    zip.finish()?;
    Ok(files)
}

/// Extract `archive_path` into `target_dir`, which is created if needed.
///
/// Entries whose names would escape the target directory are skipped.
/// Returns the number of files extracted.
pub fn extract_to_directory(archive_path: &Path, target_dir: &Path) -> Result<u64, ArchiveError> {
    let file = File::open(archive_path).map_err(|e| FsError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file)?;

    fs::create_dir_all(target_dir).map_err(io_err(target_dir))?;

    let mut files = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        let outpath = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                debug!("Skipping unsafe archive entry {:?}", entry.name());
                continue;
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(io_err(&outpath))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut output = File::create(&outpath).map_err(io_err(&outpath))?;
        io::copy(&mut entry, &mut output).map_err(io_err(&outpath))?;
        files += 1;
    }

    Ok(files)
}

/// Names of all entries in an archive, in archive order
pub fn list_entries(archive_path: &Path) -> Result<Vec<String>, ArchiveError> {
    let file = File::open(archive_path).map_err(|e| FsError::io(archive_path, e))?;
    let archive = ZipArchive::new(file)?;
    Ok(archive.file_names().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("config/sub")).unwrap();
        fs::write(root.join(PROFILE_RECORD), "{}").unwrap();
        fs::write(root.join("config/a.cfg"), b"alpha").unwrap();
        fs::write(root.join("config/sub/b.dat"), [0u8, 1, 2, 255]).unwrap();
    }

    #[test]
    fn archive_and_extract_preserves_tree() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("snapshot");
        populate(&src);

        let archive = tmp.path().join("out.zip");
        let written = create_from_directory(&src, &archive).unwrap();
        assert_eq!(written, 3);
        assert!(archive.exists());
        assert!(!partial_path(&archive).exists());

        let dst = tmp.path().join("restored");
        let extracted = extract_to_directory(&archive, &dst).unwrap();
        assert_eq!(extracted, 3);
        assert_eq!(fs::read(dst.join("config/a.cfg")).unwrap(), b"alpha");
        assert_eq!(
            fs::read(dst.join("config/sub/b.dat")).unwrap(),
            vec![0u8, 1, 2, 255]
        );
    }

    #[test]
    fn entries_use_forward_slashes_and_include_directories() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("snapshot");
        populate(&src);
        let archive = tmp.path().join("out.zip");
        create_from_directory(&src, &archive).unwrap();

        let entries = list_entries(&archive).unwrap();
        assert!(entries.contains(&"config/".to_string()));
        assert!(entries.contains(&"config/sub/b.dat".to_string()));
        assert!(entries.contains(&PROFILE_RECORD.to_string()));
        assert!(entries.iter().all(|e| !e.contains('\\')));
    }

    #[test]
    fn missing_source_is_not_found() {
        let tmp = tempdir().unwrap();
        let err = create_from_directory(&tmp.path().join("nope"), &tmp.path().join("x.zip"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Fs(FsError::NotFound(_))));
        assert!(!tmp.path().join("x.zip").exists());
    }

    #[test]
    fn corrupt_archive_is_a_zip_error() {
        let tmp = tempdir().unwrap();
        let bogus = tmp.path().join("bogus.zip");
        fs::write(&bogus, "definitely not a zip").unwrap();
        let err = extract_to_directory(&bogus, &tmp.path().join("out")).unwrap_err();
        assert!(matches!(err, ArchiveError::Zip(_)));
    }
}
