//! Three-version reconciliation of one target file.
//!
//! Every target has up to three versions besides the live file: the *base*
//! (stock version as installed by the package manager, or captured on first
//! apply), the *provisioned* image (what was last written here) and an
//! optional *updated base* deposited by the package manager.
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use super::buffer::FileBuffer;
use super::resource::{Strategy, TargetEntity};
use crate::error::HoloError;
use crate::exec::Executor;
use crate::fs::{ensure_parent_dir, prune_empty_dirs, remove_if_exists};
use crate::plugin::ResourceChange;
use crate::runtime::Runtime;

/// On-disk locations involved in reconciling one target.
#[derive(Debug, Clone)]
pub struct TargetPaths {
    /// Live file below the root.
    pub target: PathBuf,
    /// Base image in the state directory.
    pub base: PathBuf,
    /// Provisioned image in the state directory.
    pub provisioned: PathBuf,
    /// Marker recording that the target did not exist before the first
    /// apply, so that scrubbing deletes it instead of restoring the base.
    pub created: PathBuf,
}

impl TargetPaths {
    /// Compute the paths for `entity` under `rt`.
    #[must_use]
    pub fn new(rt: &Runtime, entity: &TargetEntity) -> Self {
        Self {
            target: rt.target_path(&entity.rel_path),
            base: base_dir(rt).join(&entity.rel_path),
            provisioned: provisioned_dir(rt).join(&entity.rel_path),
            created: created_dir(rt).join(&entity.rel_path),
        }
    }
}

/// Directory holding base images.
#[must_use]
pub fn base_dir(rt: &Runtime) -> PathBuf {
    rt.state_dir.join("base")
}

/// Directory holding provisioned images.
#[must_use]
pub fn provisioned_dir(rt: &Runtime) -> PathBuf {
    rt.state_dir.join("provisioned")
}

/// Directory holding markers for targets created from scratch.
#[must_use]
pub fn created_dir(rt: &Runtime) -> PathBuf {
    rt.state_dir.join("created")
}

/// Reconcile one file entity.
///
/// # Errors
///
/// Returns [`HoloError::NeedForceToOverwrite`] or
/// [`HoloError::NeedForceToRestore`] (wrapped in [`anyhow::Error`]) when the
/// live file was changed or deleted by the user and `force` is not set. Any
/// other failure aborts this entity.
pub fn apply(
    rt: &Runtime,
    entity: &TargetEntity,
    force: bool,
    exec: &dyn Executor,
) -> Result<ResourceChange> {
    let paths = TargetPaths::new(rt, entity);
    if entity.is_orphan() {
        return scrub(rt, entity, &paths, force);
    }

    // may move files around (rpmsave/dpkg-old), so run before loading anything
    let new_base = rt.platform.find_updated_base(&paths.target)?;

    let current = FileBuffer::load_optional(&paths.target, false)?;
    let mut base = FileBuffer::load_optional(&paths.base, false)?;
    let provisioned = FileBuffer::load_optional(&paths.provisioned, false)?;

    let mut repair = false;
    if current.is_none() {
        if base.is_some() {
            if !force {
                return Err(HoloError::NeedForceToRestore { entity: entity.id() }.into());
            }
            repair = true;
        } else if new_base.is_none() {
            base = Some(initial_base_from_resources(entity, &paths)?);
        }
    }

    if base.is_none()
        && let Some(current) = &current
    {
        store_image(current, &paths.base)?;
        base = Some(current.clone());
    }

    if let Some(updated) = &new_base {
        let buffer = FileBuffer::load(&updated.actual, false)?;
        store_image(&buffer, &paths.base)?;
        remove_if_exists(&paths.created)?;
        if let Err(e) = std::fs::remove_file(&updated.actual) {
            tracing::warn!("could not remove {}: {e}", updated.actual.display());
        }
        tracing::debug!("base for {} refreshed from {}", entity.id(), updated.reported);
        base = Some(buffer);
    }

    let base = base.ok_or_else(|| HoloError::NotManageable {
        path: paths.target.display().to_string(),
    })?;
    let desired = render(entity, base, &paths.target, exec)?;

    if let (Some(current), Some(provisioned)) = (&current, &provisioned)
        && current != provisioned
    {
        if force {
            repair = true;
        } else if current != &desired {
            return Err(HoloError::NeedForceToOverwrite { entity: entity.id() }.into());
        }
    }

    if !repair && provisioned.as_ref() == Some(&desired) {
        return Ok(ResourceChange::AlreadyCorrect);
    }

    if provisioned.as_ref() != Some(&desired) {
        store_image(&desired, &paths.provisioned)?;
    }

    if current.as_ref() == Some(&desired) {
        return Ok(ResourceChange::Applied);
    }
    ensure_parent_dir(&paths.target)?;
    desired.write_atomic(&paths.target)?;
    Ok(ResourceChange::Applied)
}

/// Render the desired version of `entity` starting from `base`.
///
/// Only resources from the last input-discarding one onwards are applied.
///
/// # Errors
///
/// Returns an error if a resource cannot be applied.
pub fn render(
    entity: &TargetEntity,
    base: FileBuffer,
    target: &Path,
    exec: &dyn Executor,
) -> Result<FileBuffer> {
    let first = entity.first_effective_resource();
    let resources = entity.resources.get(first..).unwrap_or_default();
    let start = match resources.first() {
        Some(r) if r.strategy.discards_previous() => FileBuffer::empty(target),
        _ => base.with_path(target),
    };
    resources
        .iter()
        .try_fold(start, |buffer, resource| {
            resource
                .apply_to(buffer, exec)
                .with_context(|| format!("applying {}", resource.path.display()))
        })
        .map(|buffer| buffer.with_path(target))
}

/// Neither the target nor a base exists: the first static resource
/// provides the stock version, so that the target can be created.
fn initial_base_from_resources(entity: &TargetEntity, paths: &TargetPaths) -> Result<FileBuffer> {
    let resource = entity
        .resources
        .iter()
        .find(|r| r.strategy == Strategy::Replace)
        .ok_or_else(|| HoloError::NotManageable {
            path: paths.target.display().to_string(),
        })?;
    let buffer = FileBuffer::load(&resource.path, false)?.with_path(&paths.target);
    store_image(&buffer, &paths.base)?;
    ensure_parent_dir(&paths.created)?;
    std::fs::write(&paths.created, b"").map_err(|e| HoloError::io(&paths.created, e))?;
    Ok(buffer)
}

/// Write `buffer` into the state directory at `path`.
fn store_image(buffer: &FileBuffer, path: &Path) -> Result<(), HoloError> {
    ensure_parent_dir(path)?;
    buffer.write(path)
}

/// Restore an orphaned target to its base and forget its images. A target
/// that only exists because of an earlier apply is deleted instead, unless
/// the package manager has since supplied a version of its own.
///
/// All failures are collected and reported together.
fn scrub(
    rt: &Runtime,
    entity: &TargetEntity,
    paths: &TargetPaths,
    force: bool,
) -> Result<ResourceChange> {
    let new_base = rt.platform.find_updated_base(&paths.target)?;
    let current = FileBuffer::load_optional(&paths.target, false)?;
    let provisioned = FileBuffer::load_optional(&paths.provisioned, false)?;

    if !force
        && let (Some(current), Some(provisioned)) = (&current, &provisioned)
        && current != provisioned
    {
        return Err(HoloError::NeedForceToOverwrite { entity: entity.id() }.into());
    }

    let mut errors = Vec::new();
    let created = paths.created.exists();

    if current.is_some() && created && new_base.is_none() {
        if let Err(e) = remove_if_exists(&paths.target) {
            errors.push(e);
        }
    } else if current.is_some() {
        let source = new_base.as_ref().map_or(&paths.base, |u| &u.actual);
        match FileBuffer::load(source, false) {
            Ok(buffer) => {
                if let Err(e) = buffer.with_path(&paths.target).write_atomic(&paths.target) {
                    errors.push(e);
                } else if let Some(updated) = &new_base
                    && let Err(e) = remove_if_exists(&updated.actual)
                {
                    errors.push(e);
                }
            }
            Err(e) => errors.push(e),
        }
    } else {
        match rt.platform.additional_cleanup(&paths.target) {
            Ok(sidecars) => {
                for sidecar in sidecars {
                    if let Err(e) = remove_if_exists(&sidecar) {
                        errors.push(e);
                    }
                }
            }
            Err(e) => errors.push(e),
        }
    }

    for (image, dir) in [
        (&paths.provisioned, provisioned_dir(rt)),
        (&paths.base, base_dir(rt)),
        (&paths.created, created_dir(rt)),
    ] {
        match remove_if_exists(image) {
            Ok(_) => {
                if let Some(parent) = image.parent() {
                    prune_empty_dirs(parent, &dir);
                }
            }
            Err(e) => errors.push(e),
        }
    }

    match HoloError::aggregate(errors) {
        Some(e) => Err(e.into()),
        None => Ok(ResourceChange::Applied),
    }
}
