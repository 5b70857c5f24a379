//! The run lock `<root>/run/holo.pid`.
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::error::HoloError;

/// Exclusive lock held for the duration of a run. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Path of the lock file below `root`.
    #[must_use]
    pub fn path_for(root: &Path) -> PathBuf {
        root.join("run/holo.pid")
    }

    /// Create the lock file exclusively and write our PID into it.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::LockHeld`] if the file already exists, and
    /// [`HoloError::Io`] for any other failure.
    pub fn acquire(root: &Path) -> Result<Self, HoloError> {
        let path = Self::path_for(root);
        crate::fs::ensure_parent_dir(&path)?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(HoloError::LockHeld {
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(HoloError::io(&path, e)),
        };
        let lock = Self { path };
        writeln!(file, "{}", std::process::id()).map_err(|e| HoloError::io(&lock.path, e))?;
        Ok(lock)
    }

    /// Path of the held lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("cannot remove {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = RunLock::acquire(dir.path()).unwrap();
        let pid = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());

        let err = RunLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, HoloError::LockHeld { .. }));

        drop(lock);
        assert!(!RunLock::path_for(dir.path()).exists());
        RunLock::acquire(dir.path()).unwrap();
    }
}
