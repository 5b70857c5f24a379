//! The per-process [`Runtime`]: directories and platform for one plugin run.
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::error::HoloError;
use crate::platform::Platform;

/// Plugin API version spoken by this frontend and its plugins.
pub const API_VERSION: u32 = 3;

/// Directories and platform a plugin operates on.
///
/// Built once from the `HOLO_*` environment in plugin processes (or directly
/// in tests) and passed by reference to every reconciler.
#[derive(Debug, Clone)]
pub struct Runtime {
    /// Filesystem root all target paths are relative to.
    pub root: PathBuf,
    /// Where the plugin finds its declarations.
    pub resource_dir: PathBuf,
    /// Where the plugin persists base images and pre-images.
    pub state_dir: PathBuf,
    /// Per-run scratch directory.
    pub cache_dir: PathBuf,
    /// Package-manager family for sidecar handling.
    pub platform: Platform,
}

impl Runtime {
    /// Create a runtime with explicit directories.
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        resource_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        platform: Platform,
    ) -> Self {
        Self {
            root: root.into(),
            resource_dir: resource_dir.into(),
            state_dir: state_dir.into(),
            cache_dir: cache_dir.into(),
            platform,
        }
    }

    /// Build the runtime for plugin `plugin_id` from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::PluginProtocol`] if `HOLO_API_VERSION` is set to
    /// anything but [`API_VERSION`].
    pub fn from_env(plugin_id: &str) -> Result<Self> {
        Self::from_lookup(plugin_id, |key| std::env::var(key).ok())
    }

    /// Build the runtime from an arbitrary variable lookup.
    ///
    /// Unset directories default to the standard layout below the root:
    /// `usr/share/holo/<id>` for resources, `var/lib/holo/<id>` for state.
    ///
    /// # Errors
    ///
    /// See [`Runtime::from_env`].
    pub fn from_lookup(plugin_id: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(version) = lookup("HOLO_API_VERSION") {
            let parsed: u32 = version
                .trim()
                .parse()
                .with_context(|| format!("HOLO_API_VERSION is not a number: {version:?}"))?;
            if parsed != API_VERSION {
                return Err(HoloError::PluginProtocol(format!(
                    "unsupported HOLO_API_VERSION {parsed} (plugin supports {API_VERSION})"
                ))
                .into());
            }
        }

        let root = lookup("HOLO_ROOT_DIR")
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from("/"), PathBuf::from);
        let dir = |key: &str, default: PathBuf| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .map_or(default, PathBuf::from)
        };
        let resource_dir = dir(
            "HOLO_RESOURCE_DIR",
            root.join("usr/share/holo").join(plugin_id),
        );
        let state_dir = dir("HOLO_STATE_DIR", root.join("var/lib/holo").join(plugin_id));
        let cache_dir = dir(
            "HOLO_CACHE_DIR",
            std::env::temp_dir().join(format!("holo-{plugin_id}")),
        );
        let distribution = lookup("HOLO_CURRENT_DISTRIBUTION");
        let platform = Platform::detect(&root, distribution.as_deref());

        Ok(Self {
            root,
            resource_dir,
            state_dir,
            cache_dir,
            platform,
        })
    }

    /// Whether this run targets the real system root.
    #[must_use]
    pub fn is_system_root(&self) -> bool {
        self.root == Path::new("/")
    }

    /// Resolve an absolute path (as seen by the managed system) below the root.
    #[must_use]
    pub fn target_path(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }
}
