//! Resource discovery and application for the files plugin.
//!
//! A resource lives at `<resource_dir>/<disambiguator>/<target path>[suffix]`.
//! The disambiguator orders resources addressing the same target; the suffix
//! selects how the resource is applied.
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt as _;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context as _, Result};

use super::buffer::FileBuffer;
use crate::error::HoloError;
use crate::exec::Executor;
use crate::fs::resolve_linked;

/// How a resource contributes to the rendered target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The resource replaces whatever came before it.
    Replace,
    /// The resource is an executable that filters the file on stdin/stdout.
    TransformScript,
    /// The resource is a unified diff applied with `patch`.
    TransformPatch,
}

impl Strategy {
    /// Whether applying this strategy ignores its input.
    #[must_use]
    pub const fn discards_previous(self) -> bool {
        matches!(self, Self::Replace)
    }

    /// Pick a strategy from a resource file name, returning the entity file
    /// name with the strategy suffix removed.
    #[must_use]
    pub fn from_file_name(name: &str) -> (Self, &str) {
        if let Some(stem) = name.strip_suffix(".holoscript")
            && !stem.is_empty()
        {
            return (Self::TransformScript, stem);
        }
        if let Some(stem) = name.strip_suffix(".patch")
            && !stem.is_empty()
        {
            return (Self::TransformPatch, stem);
        }
        (Self::Replace, name)
    }
}

/// One file below the resource directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Absolute path of the resource file.
    pub path: PathBuf,
    /// First path segment below the resource directory.
    pub disambiguator: String,
    /// Target path relative to the filesystem root, without leading slash.
    pub entity_path: String,
    /// Application strategy.
    pub strategy: Strategy,
}

impl Resource {
    /// Classify `path` (which must lie below `resource_dir`).
    ///
    /// Returns `None` for paths with fewer than two segments below the
    /// resource directory, or with non-UTF-8 segments.
    #[must_use]
    pub fn classify(resource_dir: &Path, path: &Path) -> Option<Self> {
        let relative = path.strip_prefix(resource_dir).ok()?;
        let mut segments = relative
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        if segments.len() < 2 {
            return None;
        }
        let disambiguator = segments.remove(0).to_string();
        let file_name = segments.pop()?;
        let (strategy, entity_name) = Strategy::from_file_name(file_name);
        segments.push(entity_name);

        Some(Self {
            path: path.to_path_buf(),
            disambiguator,
            entity_path: segments.join("/"),
            strategy,
        })
    }

    /// Apply this resource to `input`, returning the new buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be loaded or the transformer
    /// (script or `patch`) fails.
    pub fn apply_to(&self, input: FileBuffer, exec: &dyn Executor) -> Result<FileBuffer> {
        match self.strategy {
            Strategy::Replace => Ok(FileBuffer::load(&self.path, false)?.with_path(input.path)),
            Strategy::TransformScript => self.apply_script(input, exec),
            Strategy::TransformPatch => self.apply_patch(input, exec),
        }
    }

    fn apply_script(&self, input: FileBuffer, exec: &dyn Executor) -> Result<FileBuffer> {
        let input = input.resolve_symlink()?;
        let program = self.path.to_string_lossy();
        let output = exec
            .run_with_stdin(&program, &[], input.contents().unwrap_or_default())
            .with_context(|| format!("running {}", self.path.display()))?;
        Ok(input.with_contents(output))
    }

    fn apply_patch(&self, input: FileBuffer, exec: &dyn Executor) -> Result<FileBuffer> {
        // patch replaces files by unlink+create, so give it a private directory
        let workdir = tempfile::tempdir().context("creating patch directory")?;
        let owner = fs::metadata(workdir.path()).map_err(|e| HoloError::io(workdir.path(), e))?;
        let name = input
            .path
            .file_name()
            .map_or_else(|| "file".into(), |n| n.to_string_lossy().to_string());
        let local = workdir.path().join(&name);

        let materialised = FileBuffer {
            uid: owner.uid(),
            gid: owner.gid(),
            ..input.clone()
        };
        materialised.write(&local)?;

        let patch_file = std::path::absolute(&self.path)
            .map_err(|e| HoloError::io(&self.path, e))?
            .to_string_lossy()
            .to_string();
        exec.run_in(workdir.path(), "patch", &["-N", "-i", &patch_file, &name])
            .with_context(|| format!("applying {}", self.path.display()))?;

        let patched = FileBuffer::load(&local, false)?;
        Ok(FileBuffer {
            path: input.path,
            uid: input.uid,
            gid: input.gid,
            ..patched
        })
    }
}

/// One target path together with the resources addressing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntity {
    /// Target path relative to the filesystem root, without leading slash.
    pub rel_path: String,
    /// Resources in application order.
    pub resources: Vec<Resource>,
}

impl TargetEntity {
    /// Entity ID, `file:/<absolute path>`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("file:/{}", self.rel_path)
    }

    /// Whether all resources for this target were removed.
    #[must_use]
    pub fn is_orphan(&self) -> bool {
        self.resources.is_empty()
    }

    /// Index of the first resource that has to run: the last one that
    /// discards its input, or 0 if none does.
    #[must_use]
    pub fn first_effective_resource(&self) -> usize {
        self.resources
            .iter()
            .rposition(|r| r.strategy.discards_previous())
            .unwrap_or(0)
    }
}

/// List every non-directory entry below `dir`, sorted. Symlinks are listed,
/// not followed. A missing `dir` yields an empty list.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if a directory cannot be read.
pub fn walk_files(dir: &Path) -> Result<Vec<PathBuf>, HoloError> {
    let mut result = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(result),
        Err(e) => return Err(HoloError::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| HoloError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| HoloError::io(&path, e))?;
        if file_type.is_dir() {
            result.extend(walk_files(&path)?);
        } else {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

/// Discover all file entities: targets with resources below `resource_dir`,
/// plus orphans that only have a base image below `base_dir`.
///
/// Entities are sorted by target path; resources by disambiguator.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if either tree cannot be read.
pub fn discover(resource_dir: &Path, base_dir: &Path) -> Result<Vec<TargetEntity>, HoloError> {
    let mut targets = BTreeMap::<String, Vec<Resource>>::new();
    for path in walk_files(resource_dir)? {
        if let Some(mut resource) = Resource::classify(resource_dir, &path) {
            resource.path = resolve_linked(resource_dir, &path);
            targets
                .entry(resource.entity_path.clone())
                .or_default()
                .push(resource);
        } else {
            tracing::warn!("ignoring unclassifiable resource {}", path.display());
        }
    }

    for path in walk_files(base_dir)? {
        if let Ok(rel) = path.strip_prefix(base_dir)
            && let Some(rel) = rel.to_str()
        {
            targets.entry(rel.to_string()).or_default();
        }
    }

    Ok(targets
        .into_iter()
        .map(|(rel_path, mut resources)| {
            resources.sort_by(|a, b| {
                a.disambiguator
                    .cmp(&b.disambiguator)
                    .then_with(|| a.path.cmp(&b.path))
            });
            TargetEntity {
                rel_path,
                resources,
            }
        })
        .collect())
}
