//! The `ssh-keys` plugin: managed entries in users' `authorized_keys`.
//!
//! Each fragment `<resources>/<user>/<file>.pub` is one entity
//! `ssh-key:<user>/<file>`. Lines in `authorized_keys` that no fragment
//! provisioned are never touched.
pub mod apply;
pub mod key;
pub mod keyfile;
pub mod registry;

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use regex::Regex;

use crate::error::HoloError;
use crate::exec::{Executor, SystemExecutor};
use crate::fs::{atomic_write, resolve_linked};
use crate::plugin::{DiffPair, Plugin, ResourceChange, ScanEntity};
use crate::runtime::Runtime;
use apply::{KeyEntity, key_target, removable_keys, render};
use key::Key;
use registry::Registry;

/// Plugin ID.
pub const PLUGIN_ID: &str = "ssh-keys";

const ENTITY_PREFIX: &str = "ssh-key:";

/// Split an entity name `<user>/<file>` into user and file.
///
/// # Errors
///
/// Returns an error if `name` is not of that form.
pub fn parse_entity_name(name: &str) -> Result<(String, String)> {
    let pattern = Regex::new(r"^([^/]+)/([^/]+)$").context("compiling entity name pattern")?;
    let captures = pattern
        .captures(name)
        .with_context(|| format!("invalid ssh-key entity name {name:?}"))?;
    let user = captures.get(1).map_or("", |m| m.as_str());
    let file = captures.get(2).map_or("", |m| m.as_str());
    Ok((user.to_string(), file.to_string()))
}

/// All fragments plus all registered entities whose fragment is gone,
/// sorted by ID.
///
/// # Errors
///
/// Returns an error if the resource directory or the registry cannot be
/// read.
pub fn discover(rt: &Runtime, registry: &Registry) -> Result<Vec<KeyEntity>> {
    let mut entities = BTreeMap::new();
    for (user, file, source) in fragments(&rt.resource_dir)? {
        let entity = KeyEntity {
            user,
            file,
            source: Some(source),
        };
        entities.insert(entity.id(), entity);
    }
    for id in registry.entries() {
        let Some(name) = id.strip_prefix(ENTITY_PREFIX) else {
            tracing::warn!("ignoring unknown registry entry {id:?}");
            continue;
        };
        if entities.contains_key(id) {
            continue;
        }
        let (user, file) = parse_entity_name(name)?;
        entities.insert(
            id.to_string(),
            KeyEntity {
                user,
                file,
                source: None,
            },
        );
    }
    Ok(entities.into_values().collect())
}

fn fragments(resource_dir: &Path) -> Result<Vec<(String, String, PathBuf)>, HoloError> {
    let mut result = Vec::new();
    for user_dir in read_dir_sorted(resource_dir)? {
        if !user_dir.is_dir() {
            continue;
        }
        let Some(user) = file_name(&user_dir) else {
            continue;
        };
        for path in read_dir_sorted(&user_dir)? {
            if let Some(name) = file_name(&path)
                && let Some(file) = name.strip_suffix(".pub")
                && !file.is_empty()
                && path.is_file()
            {
                let source = resolve_linked(resource_dir, &path);
                result.push((user.clone(), file.to_string(), source));
            }
        }
    }
    Ok(result)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, HoloError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HoloError::io(dir, e)),
    };
    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry.map_err(|e| HoloError::io(dir, e))?.path());
    }
    paths.sort();
    Ok(paths)
}

/// Fingerprint of `key` as reported by `ssh-keygen -l`, or the locally
/// computed `SHA256:` digest when `ssh-keygen` is unavailable.
#[must_use]
pub fn fingerprint(key: &Key, exec: &dyn Executor) -> String {
    if exec.which("ssh-keygen") {
        match keygen_fingerprint(key, exec) {
            Ok(Some(fingerprint)) => return fingerprint,
            Ok(None) => tracing::debug!("ssh-keygen printed no fingerprint"),
            Err(e) => tracing::debug!("ssh-keygen failed: {e:#}"),
        }
    }
    key.sha256_fingerprint()
        .unwrap_or_else(|| "(invalid key)".to_string())
}

fn keygen_fingerprint(key: &Key, exec: &dyn Executor) -> Result<Option<String>> {
    let mut tmp = tempfile::NamedTempFile::new().context("creating temporary key file")?;
    writeln!(tmp, "{key}").context("writing temporary key file")?;
    let path = tmp.path().display().to_string();
    let output = exec.run("ssh-keygen", &["-l", "-f", &path])?;
    Ok(output.stdout.split_whitespace().nth(1).map(ToString::to_string))
}

/// The `ssh-keys` plugin.
#[derive(Debug)]
pub struct SshKeysPlugin<E: Executor = SystemExecutor> {
    exec: E,
}

impl Default for SshKeysPlugin {
    fn default() -> Self {
        Self::new(SystemExecutor)
    }
}

impl<E: Executor> SshKeysPlugin<E> {
    /// Create the plugin with a custom executor for `ssh-keygen`.
    pub const fn new(exec: E) -> Self {
        Self { exec }
    }

    fn describe(&self, entity: &KeyEntity) -> Result<ScanEntity> {
        let mut scan = ScanEntity::new(entity.id());
        let Some(source) = &entity.source else {
            return Ok(scan.with_action("Scrubbing", Some("all repository files were deleted")));
        };
        scan = scan.with_source(source.display().to_string());
        for key in entity.declared_keys()? {
            let mut value = fingerprint(&key, &self.exec);
            if !key.comment.is_empty() {
                value = format!("{value} ({})", key.comment);
            }
            scan = scan.with_info("key", value);
        }
        Ok(scan)
    }

    fn find(rt: &Runtime, registry: &Registry, entity_id: &str) -> Result<KeyEntity> {
        let name = entity_id
            .strip_prefix(ENTITY_PREFIX)
            .with_context(|| format!("{entity_id}: not an ssh-key entity"))?;
        parse_entity_name(name)?;
        discover(rt, registry)?
            .into_iter()
            .find(|e| e.id() == entity_id)
            .with_context(|| format!("{entity_id}: no such entity"))
    }
}

impl<E: Executor> Plugin for SshKeysPlugin<E> {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn scan(&self, rt: &Runtime) -> Result<Vec<ScanEntity>> {
        let registry = Registry::load(rt)?;
        discover(rt, &registry)?
            .iter()
            .map(|entity| self.describe(entity))
            .collect()
    }

    fn apply(&self, rt: &Runtime, entity_id: &str, force: bool) -> Result<ResourceChange> {
        let mut registry = Registry::load(rt)?;
        let entity = Self::find(rt, &registry, entity_id)?;
        apply::apply(rt, &entity, force, &mut registry)
    }

    fn diff(&self, rt: &Runtime, entity_id: &str) -> Result<Option<DiffPair>> {
        let registry = Registry::load(rt)?;
        let entity = Self::find(rt, &registry, entity_id)?;
        let target = key_target(rt, &entity.user)?;
        let current = keyfile::read(&target.path)?;
        let previous = registry.provisioned_keys(&entity.user, &entity.file)?;
        let removable = removable_keys(rt, &entity, &previous)?;
        let expected = render(&current, &entity.declared_keys()?, &removable);

        let path = rt
            .cache_dir
            .join("expected")
            .join(&entity.user)
            .join(format!("{}.authorized_keys", entity.file));
        atomic_write(&path, expected.text.as_bytes(), 0o600)?;
        let actual = if target.path.exists() {
            target.path
        } else {
            PathBuf::from("/dev/null")
        };
        Ok(Some(DiffPair {
            expected: path,
            actual,
        }))
    }
}

/// Entry point of the `holo-ssh-keys` binary.
#[must_use]
pub fn main(args: &[String]) -> i32 {
    crate::plugin::protocol::run(&SshKeysPlugin::default(), args)
}
