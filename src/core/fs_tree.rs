//! Recursive directory copy and size helpers

use std::fs;
use std::path::Path;

use tracing::trace;
use walkdir::WalkDir;

use crate::error::FsError;

fn walk_error(root: &Path, err: walkdir::Error) -> FsError {
    let path = err.path().unwrap_or(root).to_path_buf();
    match err.into_io_error() {
        Some(io) => FsError::io(path, io),
        None => FsError::Io {
            path,
            source: std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop detected"),
        },
    }
}

/// Copy every file and directory below `src` into `dst`, creating `dst` as needed.
///
/// Symbolic links are followed, so linked directories are copied as real ones and
/// a link cycle is an error. Existing files in `dst` are overwritten. Returns the
/// number of files copied.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<u64, FsError> {
    if !src.is_dir() {
        return Err(FsError::NotFound(src.to_path_buf()));
    }

    fs::create_dir_all(dst).map_err(|e| FsError::io(dst, e))?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| FsError::io(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| FsError::io(entry.path(), e))?;
            copied += 1;
        }
    }

    trace!("Copied {} files from {:?} to {:?}", copied, src, dst);
    Ok(copied)
}

/// Replace `dst` with a fresh copy of `src`. Whatever was in `dst` is removed first.
pub fn replace_dir(src: &Path, dst: &Path) -> Result<u64, FsError> {
    remove_dir_if_exists(dst)?;
    copy_dir(src, dst)
}

/// Remove a directory tree. A missing directory is not an error.
pub fn remove_dir_if_exists(path: &Path) -> Result<(), FsError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FsError::io(path, e)),
    }
}

/// Total size in bytes of all files below `path`
pub fn dir_size(path: &Path) -> Result<u64, FsError> {
    if !path.exists() {
        return Err(FsError::NotFound(path.to_path_buf()));
    }

    let mut total = 0;
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.map_err(|e| walk_error(path, e))?;
        if entry.file_type().is_file() {
            let meta = entry.metadata().map_err(|e| walk_error(path, e))?;
            total += meta.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn copy_dir_copies_nested_tree() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("a.cfg"), "alpha");
        write(&src.join("nested/deeper/b.cfg"), "beta");
        fs::create_dir_all(src.join("empty")).unwrap();

        let dst = tmp.path().join("dst");
        let copied = copy_dir(&src, &dst).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dst.join("a.cfg")).unwrap(), "alpha");
        assert_eq!(
            fs::read_to_string(dst.join("nested/deeper/b.cfg")).unwrap(),
            "beta"
        );
        assert!(dst.join("empty").is_dir());
    }

    #[test]
    fn copy_dir_reports_missing_source_as_not_found() {
        let tmp = tempdir().unwrap();
        let err = copy_dir(&tmp.path().join("missing"), &tmp.path().join("dst")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn replace_dir_drops_stale_files() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write(&src.join("keep.txt"), "new");
        write(&dst.join("stale.txt"), "old");

        replace_dir(&src, &dst).unwrap();

        assert!(dst.join("keep.txt").exists());
        assert!(!dst.join("stale.txt").exists());
    }

    #[test]
    fn dir_size_sums_files() {
        let tmp = tempdir().unwrap();
        write(&tmp.path().join("a"), "1234");
        write(&tmp.path().join("sub/b"), "123456");

        assert_eq!(dir_size(tmp.path()).unwrap(), 10);
        assert!(dir_size(&tmp.path().join("nope")).unwrap_err().is_not_found());
    }

    #[cfg(unix)]
    #[test]
    fn copy_dir_follows_linked_directories() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("own.cfg"), "own");
        write(&tmp.path().join("shared/common.cfg"), "shared");
        std::os::unix::fs::symlink(tmp.path().join("shared"), src.join("linked")).unwrap();

        let dst = tmp.path().join("dst");
        assert_eq!(copy_dir(&src, &dst).unwrap(), 2);
        assert!(dst.join("linked").is_dir());
        assert!(!dst.join("linked").is_symlink());
        assert_eq!(
            fs::read_to_string(dst.join("linked/common.cfg")).unwrap(),
            "shared"
        );
        assert_eq!(dir_size(&src).unwrap(), 9);
    }

    #[cfg(unix)]
    #[test]
    fn copy_dir_rejects_link_cycles() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("a.cfg"), "a");
        std::os::unix::fs::symlink(&src, src.join("loop")).unwrap();

        assert!(copy_dir(&src, &tmp.path().join("dst")).is_err());
    }

    #[test]
    fn remove_missing_dir_is_ok() {
        let tmp = tempdir().unwrap();
        remove_dir_if_exists(&tmp.path().join("gone")).unwrap();
    }
}
