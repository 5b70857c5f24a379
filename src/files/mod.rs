//! The `files` plugin: three-version reconciliation of configuration files.
pub mod apply;
pub mod buffer;
pub mod resource;

use std::path::PathBuf;

use anyhow::{Context as _, Result};

use crate::exec::{Executor, SystemExecutor};
use crate::fs::ensure_parent_dir;
use crate::plugin::{DiffPair, Plugin, ResourceChange, ScanEntity};
use crate::runtime::Runtime;
use apply::{TargetPaths, base_dir};
use buffer::FileBuffer;
use resource::{TargetEntity, discover};

/// Plugin ID.
pub const PLUGIN_ID: &str = "files";

/// The `files` plugin.
#[derive(Debug)]
pub struct FilesPlugin<E: Executor = SystemExecutor> {
    exec: E,
}

impl Default for FilesPlugin {
    fn default() -> Self {
        Self::new(SystemExecutor)
    }
}

impl<E: Executor> FilesPlugin<E> {
    /// Create the plugin with a custom executor for transformer scripts.
    pub const fn new(exec: E) -> Self {
        Self { exec }
    }

    fn find(rt: &Runtime, entity_id: &str) -> Result<TargetEntity> {
        discover(&rt.resource_dir, &base_dir(rt))?
            .into_iter()
            .find(|e| e.id() == entity_id)
            .with_context(|| format!("{entity_id}: no such entity"))
    }
}

/// Scan metadata for one file entity.
#[must_use]
pub fn describe(rt: &Runtime, entity: &TargetEntity) -> ScanEntity {
    let paths = TargetPaths::new(rt, entity);
    let mut scan = ScanEntity::new(entity.id());
    if entity.is_orphan() {
        scan = scan.with_action("Scrubbing", Some("all repository files were deleted"));
    }
    for resource in &entity.resources {
        scan = scan.with_source(resource.path.display().to_string());
    }
    scan.with_info("store at", paths.base.display().to_string())
}

impl<E: Executor> Plugin for FilesPlugin<E> {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn scan(&self, rt: &Runtime) -> Result<Vec<ScanEntity>> {
        Ok(discover(&rt.resource_dir, &base_dir(rt))?
            .iter()
            .map(|entity| describe(rt, entity))
            .collect())
    }

    fn apply(&self, rt: &Runtime, entity_id: &str, force: bool) -> Result<ResourceChange> {
        let entity = Self::find(rt, entity_id)?;
        apply::apply(rt, &entity, force, &self.exec)
    }

    fn diff(&self, rt: &Runtime, entity_id: &str) -> Result<Option<DiffPair>> {
        let entity = Self::find(rt, entity_id)?;
        let paths = TargetPaths::new(rt, &entity);

        let actual = if paths.target.symlink_metadata().is_ok() {
            paths.target.clone()
        } else {
            PathBuf::from("/dev/null")
        };

        if entity.is_orphan() {
            return Ok(Some(DiffPair {
                expected: paths.base,
                actual,
            }));
        }

        let base = match FileBuffer::load_optional(&paths.base, false)? {
            Some(base) => base,
            None => FileBuffer::load_optional(&paths.target, false)?
                .unwrap_or_else(|| FileBuffer::empty(&paths.target)),
        };
        let desired = apply::render(&entity, base, &paths.target, &self.exec)?;

        let expected = rt.cache_dir.join("expected").join(&entity.rel_path);
        ensure_parent_dir(&expected)?;
        let owner = std::fs::metadata(&rt.cache_dir)
            .with_context(|| format!("inspecting {}", rt.cache_dir.display()))?;
        let local = {
            use std::os::unix::fs::MetadataExt as _;
            FileBuffer {
                uid: owner.uid(),
                gid: owner.gid(),
                ..desired
            }
        };
        local.write(&expected)?;

        Ok(Some(DiffPair { expected, actual }))
    }
}

/// Entry point of the `holo-files` binary.
#[must_use]
pub fn main(args: &[String]) -> i32 {
    crate::plugin::protocol::run(&FilesPlugin::default(), args)
}
