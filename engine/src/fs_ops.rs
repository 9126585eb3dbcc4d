//! Filesystem operations module.
//!
//! This module provides the low-level operations the scanner and router
//! build on:
//! - Listing the regular files of one directory
//! - Moving a file (rename, or copy + delete across volumes)
//! - Copying a file with permission propagation
//! - Creating directories recursively

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// A regular file found in a source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// How a move was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Same volume, atomic rename
    Renamed,
    /// Different volume, copied then source removed
    Copied,
    /// Different volume, copied, but the source had already been removed
    /// by someone else
    SourceAlreadyGone,
}

/// List the immediate regular files of `dir`.
///
/// Directories, symlinks and special files are left out, as are names that
/// are not valid UTF-8 (masks and destination names are UTF-8).
///
/// # Errors
/// Returns `EnumerationFailed` if the directory or one of its entries
/// cannot be read.
pub fn list_regular_files(dir: &Path) -> Result<Vec<DirEntryInfo>> {
    let entries = fs::read_dir(dir).map_err(|e| EngineError::EnumerationFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

        // file_type() does not follow symlinks
        let file_type = entry.file_type().map_err(|e| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        if !file_type.is_file() {
            continue;
        }

        let file_name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!(dir = %dir.display(), name = ?raw, "Skipping file with non UTF-8 name");
                continue;
            }
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            // Removed between listing and stat
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(EngineError::EnumerationFailed {
                    path: dir.to_path_buf(),
                    source: e,
                })
            }
        };

        files.push(DirEntryInfo {
            file_name,
            path: entry.path(),
            size: metadata.len(),
        });
    }
    Ok(files)
}

/// Move `src` to `dst`.
///
/// On the same volume this is an atomic rename. Otherwise the source is
/// opened read-write first (so permission problems surface before anything
/// is written), copied, and removed. The copy is not undone if the removal
/// fails: the file then exists at both locations and an error is returned.
pub fn move_file(src: &Path, dst: &Path) -> Result<MoveOutcome> {
    if same_volume(src, dst) {
        fs::rename(src, dst).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound && !src.exists() {
                EngineError::SourceNotFound {
                    path: src.to_path_buf(),
                }
            } else {
                EngineError::WriteError {
                    path: dst.to_path_buf(),
                    source: e,
                }
            }
        })?;
        return Ok(MoveOutcome::Renamed);
    }
    move_across_volumes(src, dst)
}

/// The copy + delete half of `move_file`.
pub fn move_across_volumes(src: &Path, dst: &Path) -> Result<MoveOutcome> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(src)
        .map_err(|e| EngineError::SourceAccessDenied {
            path: src.to_path_buf(),
            source: e,
        })?;

    copy_file(src, dst)?;
    remove_moved_source(src)
}

fn remove_moved_source(src: &Path) -> Result<MoveOutcome> {
    match fs::remove_file(src) {
        Ok(()) => Ok(MoveOutcome::Copied),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(src = %src.display(), "File copied, but the source was already removed by someone else");
            Ok(MoveOutcome::SourceAlreadyGone)
        }
        Err(e) => Err(EngineError::RemoveFailed {
            path: src.to_path_buf(),
            source: e,
        }),
    }
}

/// Copy `src` to `dst`, creating or truncating `dst`.
///
/// The destination is synced before it is closed and the source's
/// permission bits are applied afterwards; the modification time is
/// carried over when the platform allows it. A failed copy leaves whatever
/// was written in place.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    let mut src_file = File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let src_metadata = src_file.metadata().map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let mut dst_file = File::create(dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let copied = io::copy(&mut src_file, &mut dst_file);
    let closed = dst_file.sync_all();
    drop(dst_file);

    // A copy error wins; a flush error is only reported if the copy itself succeeded
    let bytes_copied = match (copied, closed) {
        (Err(e), _) => {
            return Err(if e.kind() == io::ErrorKind::PermissionDenied {
                EngineError::WriteError {
                    path: dst.to_path_buf(),
                    source: e,
                }
            } else {
                EngineError::ReadError {
                    path: src.to_path_buf(),
                    source: e,
                }
            });
        }
        (Ok(_), Err(e)) => {
            return Err(EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            })
        }
        (Ok(bytes), Ok(())) => bytes,
    };

    if let Ok(mtime) = src_metadata.modified() {
        if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime)) {
            debug!(dst = %dst.display(), error = %e, "Could not preserve modification time");
        }
    }

    fs::set_permissions(dst, src_metadata.permissions()).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    Ok(bytes_copied)
}

/// Remove an existing destination file ahead of a `replace`.
pub fn remove_existing(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| EngineError::RemoveFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// True if something (file, directory, dangling symlink) occupies `path`.
pub fn path_occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// True if `a` and `b` name the same file on disk.
#[cfg(unix)]
pub fn same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    if a == b {
        return true;
    }
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(x), Ok(y)) => x.dev() == y.dev() && x.ino() == y.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

/// Ensure `dir` exists as a directory, creating it recursively if needed.
///
/// # Errors
/// Returns `DirectoryCreationFailed` if creation fails or `dir` exists but
/// is not a directory.
pub fn ensure_dir_exists(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(dir) {
        Ok(metadata) => {
            if metadata.is_dir() {
                Ok(())
            } else {
                Err(EngineError::DirectoryCreationFailed {
                    path: dir.to_path_buf(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "Path exists but is not a directory",
                    ),
                })
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|e| EngineError::DirectoryCreationFailed {
                path: dir.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: e,
        }),
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) => ensure_dir_exists(parent),
        None => Ok(()),
    }
}

/// True if `src` and the directory that will hold `dst` are on the same
/// storage volume.
///
/// When the answer cannot be determined the rename is attempted anyway.
#[cfg(unix)]
pub fn same_volume(src: &Path, dst: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let dst_dir = dst.parent().unwrap_or(dst);
    match (fs::metadata(src), fs::metadata(dst_dir)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev(),
        _ => true,
    }
}

#[cfg(windows)]
pub fn same_volume(src: &Path, dst: &Path) -> bool {
    use std::path::Component;

    let prefix = |p: &Path| match p.components().next() {
        Some(Component::Prefix(prefix)) => Some(prefix.as_os_str().to_ascii_uppercase()),
        _ => None,
    };
    prefix(src) == prefix(dst)
}

#[cfg(not(any(unix, windows)))]
pub fn same_volume(_src: &Path, _dst: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_list_regular_files_only() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");

        let mut file1 = File::create(src.join("file1.txt")).expect("Failed to create file1");
        file1.write_all(b"test data 1").expect("Failed to write file1");
        drop(file1);
        fs::write(src.join("file2.txt"), b"data 2").expect("Failed to write file2");
        fs::create_dir(src.join("subdir")).expect("Failed to create subdir");
        fs::write(src.join("subdir").join("nested.txt"), b"x").expect("Failed to write nested");

        #[cfg(unix)]
        std::os::unix::fs::symlink(src.join("file1.txt"), src.join("link.txt"))
            .expect("Failed to create symlink");

        let mut files = list_regular_files(&src).expect("Failed to list");
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        let names: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["file1.txt", "file2.txt"]);
        assert_eq!(files[0].size, 11);
        assert_eq!(files[1].path, src.join("file2.txt"));
    }

    #[test]
    fn test_list_nonexistent_dir() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = list_regular_files(&temp_dir.path().join("nonexistent"));
        assert!(matches!(result, Err(EngineError::EnumerationFailed { .. })));
    }

    #[test]
    fn test_copy_file_content() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let dst_file = temp_dir.path().join("dest.txt");

        let mut file = File::create(&src_file).expect("Failed to create source");
        file.write_all(b"test content").expect("Failed to write source");
        drop(file);

        let bytes = copy_file(&src_file, &dst_file).expect("Failed to copy");
        assert_eq!(bytes, 12);

        let content = fs::read_to_string(&dst_file).expect("Failed to read dest");
        assert_eq!(content, "test content");
        assert!(src_file.exists(), "copy must leave the source in place");
    }

    #[test]
    fn test_copy_truncates_existing_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let dst_file = temp_dir.path().join("dest.txt");
        fs::write(&src_file, b"new").expect("Failed to write source");
        fs::write(&dst_file, b"much longer old content").expect("Failed to write dest");

        copy_file(&src_file, &dst_file).expect("Failed to copy");
        assert_eq!(fs::read(&dst_file).expect("read dest"), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_propagates_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("script.sh");
        let dst_file = temp_dir.path().join("copy.sh");
        fs::write(&src_file, b"#!/bin/sh\n").expect("Failed to write source");
        fs::set_permissions(&src_file, fs::Permissions::from_mode(0o751))
            .expect("Failed to set permissions");

        copy_file(&src_file, &dst_file).expect("Failed to copy");

        let mode = fs::metadata(&dst_file).expect("stat dest").permissions().mode();
        assert_eq!(mode & 0o777, 0o751);
    }

    #[test]
    fn test_copy_missing_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = copy_file(
            &temp_dir.path().join("missing.txt"),
            &temp_dir.path().join("dest.txt"),
        );
        assert!(matches!(result, Err(EngineError::ReadError { .. })));
        assert!(!temp_dir.path().join("dest.txt").exists());
    }

    #[test]
    fn test_move_same_volume_renames() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("a.txt");
        let dst_dir = temp_dir.path().join("out");
        fs::create_dir(&dst_dir).expect("Failed to create out dir");
        let dst_file = dst_dir.join("a.txt");
        fs::write(&src_file, b"hello").expect("Failed to write source");

        let outcome = move_file(&src_file, &dst_file).expect("Failed to move");
        assert_eq!(outcome, MoveOutcome::Renamed);
        assert!(!src_file.exists());
        assert_eq!(fs::read_to_string(&dst_file).expect("read dest"), "hello");
    }

    #[test]
    fn test_move_across_volumes_removes_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("a.txt");
        let dst_file = temp_dir.path().join("b.txt");
        fs::write(&src_file, b"payload").expect("Failed to write source");

        let outcome = move_across_volumes(&src_file, &dst_file).expect("Failed to move");
        assert_eq!(outcome, MoveOutcome::Copied);
        assert!(!src_file.exists());
        assert_eq!(fs::read(&dst_file).expect("read dest"), b"payload");
    }

    #[test]
    fn test_source_removed_by_someone_else_is_success() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let gone = temp_dir.path().join("gone.txt");
        let outcome = remove_moved_source(&gone).expect("missing source must not be an error");
        assert_eq!(outcome, MoveOutcome::SourceAlreadyGone);
    }

    #[test]
    fn test_move_missing_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = move_across_volumes(
            &temp_dir.path().join("missing.txt"),
            &temp_dir.path().join("dest.txt"),
        );
        assert!(matches!(result, Err(EngineError::SourceAccessDenied { .. })));
    }

    #[test]
    fn test_ensure_dir_exists_creates_recursively() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("a").join("b").join("c");

        ensure_dir_exists(&dir).expect("Failed to create dir");
        assert!(dir.is_dir());
        ensure_dir_exists(&dir).expect("Existing dir must be accepted");
    }

    #[test]
    fn test_ensure_dir_exists_rejects_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("file.txt");
        fs::write(&path, b"x").expect("Failed to write file");

        let result = ensure_dir_exists(&path);
        assert!(matches!(result, Err(EngineError::DirectoryCreationFailed { .. })));
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");
        assert!(path.parent().unwrap().exists());
    }

    #[test]
    fn test_same_volume_within_tempdir() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("a.txt");
        fs::write(&src, b"x").expect("Failed to write file");
        assert!(same_volume(&src, &temp_dir.path().join("b.txt")));
    }

    #[test]
    fn test_same_file_sees_through_aliases() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = temp_dir.path().join("a.txt");
        let b = temp_dir.path().join("b.txt");
        fs::write(&a, b"x").expect("Failed to write file");
        fs::write(&b, b"x").expect("Failed to write file");

        assert!(same_file(&a, &a));
        assert!(same_file(&a, &temp_dir.path().join(".").join("a.txt")));
        assert!(!same_file(&a, &b));
        assert!(!same_file(&a, &temp_dir.path().join("missing.txt")));
    }

    #[test]
    fn test_remove_existing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("old.txt");
        fs::write(&path, b"x").expect("Failed to write file");

        assert!(path_occupied(&path));
        remove_existing(&path).expect("Failed to remove");
        assert!(!path_occupied(&path));
        assert!(matches!(
            remove_existing(&path),
            Err(EngineError::RemoveFailed { .. })
        ));
    }
}
