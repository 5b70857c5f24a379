//! The per-run cache directory.
use std::path::{Path, PathBuf};

use crate::error::HoloError;

/// Scratch directory for one run, removed on drop.
///
/// Layout:
///
/// ```text
/// <cache>/<plugin-id>/            HOLO_CACHE_DIR of each plugin
/// <cache>/generators/<n>/         HOLO_CACHE_DIR of each generator
/// <cache>/resources/              OUT for generators
/// <cache>/resources/<plugin-id>/  generated resources plus links to static ones
/// ```
#[derive(Debug)]
pub struct RunCache {
    dir: tempfile::TempDir,
}

impl RunCache {
    /// Create a fresh cache directory below the system temp dir.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::Io`] if the directory cannot be created.
    pub fn create() -> Result<Self, HoloError> {
        let tmp = std::env::temp_dir();
        let dir = tempfile::Builder::new()
            .prefix("holo.")
            .tempdir_in(&tmp)
            .map_err(|e| HoloError::io(&tmp, e))?;
        Ok(Self { dir })
    }

    /// Root of the cache.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Cache directory handed to plugin `id`.
    #[must_use]
    pub fn plugin_dir(&self, id: &str) -> PathBuf {
        self.path().join(id)
    }

    /// Fresh cache directory for the `index`-th generator.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::Io`] if the directory cannot be created.
    pub fn generator_dir(&self, index: usize) -> Result<PathBuf, HoloError> {
        let dir = self.path().join("generators").join(index.to_string());
        std::fs::create_dir_all(&dir).map_err(|e| HoloError::io(&dir, e))?;
        Ok(dir)
    }

    /// Where generators write resources.
    #[must_use]
    pub fn virtual_resource_root(&self) -> PathBuf {
        self.path().join("resources")
    }
}
