//! Filesystem helpers shared by the reconcilers and the orchestrator.
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::HoloError;

/// Ensure the parent directory of `path` exists, creating it (and any
/// ancestors) if necessary.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if the directory cannot be created.
pub fn ensure_parent_dir(path: &Path) -> Result<(), HoloError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| HoloError::io(parent, e))?;
    }
    Ok(())
}

/// Remove the file or symlink at `path`. Does nothing if `path` does not exist.
///
/// Returns whether something was removed.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if the path exists but cannot be removed.
pub fn remove_if_exists(path: &Path) -> Result<bool, HoloError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(HoloError::io(path, e)),
    }
}

/// Write `contents` to `path` through a temporary sibling and a rename, so
/// that readers never observe a partially written file.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if the temporary file cannot be written or
/// renamed into place.
pub fn atomic_write(path: &Path, contents: &[u8], mode: u32) -> Result<(), HoloError> {
    use std::os::unix::fs::PermissionsExt as _;

    ensure_parent_dir(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".holo-")
        .tempfile_in(dir)
        .map_err(|e| HoloError::io(dir, e))?;
    tmp.write_all(contents)
        .map_err(|e| HoloError::io(tmp.path(), e))?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|e| HoloError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| HoloError::io(path, e.error))?;
    Ok(())
}

/// Mirror `src` into `dst` as real directories holding absolute symlinks to
/// the files of `src`. Entries already present in `dst` are kept, and
/// symlinks in `src` are recreated verbatim.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if a directory cannot be read or created, or a
/// link cannot be made.
pub fn link_tree(src: &Path, dst: &Path) -> Result<(), HoloError> {
    let src = std::path::absolute(src).map_err(|e| HoloError::io(src, e))?;
    fs::create_dir_all(dst).map_err(|e| HoloError::io(dst, e))?;
    for entry in fs::read_dir(&src).map_err(|e| HoloError::io(&src, e))? {
        let entry = entry.map_err(|e| HoloError::io(&src, e))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| HoloError::io(&src_path, e))?;
        if file_type.is_dir() {
            link_tree(&src_path, &dst_path)?;
            continue;
        }
        if dst_path.symlink_metadata().is_ok() {
            continue;
        }
        let target = if file_type.is_symlink() {
            fs::read_link(&src_path).map_err(|e| HoloError::io(&src_path, e))?
        } else {
            src_path
        };
        std::os::unix::fs::symlink(&target, &dst_path).map_err(|e| HoloError::io(&dst_path, e))?;
    }
    Ok(())
}

/// If `path` is an entry made by [`link_tree`] below `dir`, the file it
/// stands for; otherwise `path` itself.
///
/// Such an entry is an absolute symlink whose target ends with the entry's
/// own path relative to `dir`.
#[must_use]
pub fn resolve_linked(dir: &Path, path: &Path) -> PathBuf {
    let is_link = fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink());
    if is_link
        && let Ok(target) = fs::read_link(path)
        && target.is_absolute()
        && target != path
        && let Ok(rel) = path.strip_prefix(dir)
        && !rel.as_os_str().is_empty()
        && target.ends_with(rel)
    {
        return target;
    }
    path.to_path_buf()
}

/// Remove empty directories from `start` upwards, stopping at `stop`.
///
/// Used after scrubbing state images so that the state tree does not
/// accumulate empty directories.
pub fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        if fs::remove_dir(&current).is_err() {
            break;
        }
        if !current.pop() {
            break;
        }
    }
}
