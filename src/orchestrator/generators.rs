//! Resource generators.
//!
//! Every executable file below `<root>/usr/share/holo/generators` is run
//! before scanning. A generator may write resources into `$OUT/<plugin-id>/`;
//! those plugins then see the union of their static and generated resources:
//! the static files are symlinked into the generated directory, which becomes
//! the plugin's resource directory.
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context as _, Result};

use super::cache::RunCache;
use crate::error::HoloError;

/// Directory holding generator executables.
#[must_use]
pub fn generators_dir(root: &Path) -> PathBuf {
    root.join("usr/share/holo/generators")
}

/// Directory holding the static resources of all plugins.
#[must_use]
pub fn static_resource_root(root: &Path) -> PathBuf {
    root.join("usr/share/holo")
}

/// Executable regular files in `dir`, sorted by name. A missing directory
/// yields nothing.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if the directory exists but cannot be read.
pub fn list_generators(dir: &Path) -> Result<Vec<PathBuf>, HoloError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HoloError::io(dir, e)),
    };
    let mut generators = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| HoloError::io(dir, e))?;
        let path = entry.path();
        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
            generators.push(path);
        } else {
            tracing::debug!("skipping non-executable {}", path.display());
        }
    }
    generators.sort();
    Ok(generators)
}

/// Run all generators of `root`, writing into the cache's virtual resource
/// root.
///
/// # Errors
///
/// Returns an error if a generator cannot be started or exits non-zero.
pub fn run_generators(root: &Path, cache: &RunCache) -> Result<()> {
    let out = cache.virtual_resource_root();
    std::fs::create_dir_all(&out).map_err(|e| HoloError::io(&out, e))?;
    let static_root = static_resource_root(root);

    for (index, generator) in list_generators(&generators_dir(root))?.iter().enumerate() {
        tracing::debug!("running generator {}", generator.display());
        let output = Command::new(generator)
            .env("HOLO_CACHE_DIR", cache.generator_dir(index)?)
            .env("HOLO_RESOURCE_ROOT", &static_root)
            .env("OUT", &out)
            .output()
            .with_context(|| format!("running generator {}", generator.display()))?;
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            tracing::warn!("{}: {line}", generator.display());
        }
        if !output.status.success() {
            return Err(HoloError::ExternalTool {
                program: generator.display().to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// The resource directory plugin `id` should use: its static directory, or,
/// when a generator wrote resources for it, `$OUT/<id>` with the static files
/// linked in. Generated files take precedence.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if the static files cannot be linked.
pub fn resource_dir_for(root: &Path, cache: &RunCache, id: &str) -> Result<PathBuf, HoloError> {
    let static_dir = static_resource_root(root).join(id);
    let generated = cache.virtual_resource_root().join(id);
    if !generated.is_dir() {
        return Ok(static_dir);
    }
    if static_dir.is_dir() {
        crate::fs::link_tree(&static_dir, &generated)?;
    }
    tracing::debug!("plugin {id} uses generated resources at {}", generated.display());
    Ok(generated)
}
