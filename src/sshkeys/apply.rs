//! Reconciliation of one key fragment against a user's `authorized_keys`.
use std::path::PathBuf;

use anyhow::{Context as _, Result};

use super::key::Key;
use super::keyfile::{self, Rewrite, parse_keys, rewrite};
use super::registry::Registry;
use crate::accounts::live::UserDatabase;
use crate::error::HoloError;
use crate::plugin::ResourceChange;
use crate::runtime::Runtime;

/// One `ssh-key:<user>/<file>` entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntity {
    /// Owner of the `authorized_keys` file.
    pub user: String,
    /// Fragment name without `.pub`.
    pub file: String,
    /// Fragment in the resource directory; `None` for orphans.
    pub source: Option<PathBuf>,
}

impl KeyEntity {
    /// Entity ID.
    #[must_use]
    pub fn id(&self) -> String {
        format!("ssh-key:{}/{}", self.user, self.file)
    }

    /// Whether the fragment was removed from the repository.
    #[must_use]
    pub const fn is_orphan(&self) -> bool {
        self.source.is_none()
    }

    /// Keys declared by the fragment (none for orphans).
    ///
    /// # Errors
    ///
    /// Returns an error if the fragment cannot be read or contains a line
    /// that is not a key.
    pub fn declared_keys(&self) -> Result<Vec<Key>, HoloError> {
        let Some(source) = &self.source else {
            return Ok(Vec::new());
        };
        let text = std::fs::read_to_string(source).map_err(|e| HoloError::io(source, e))?;
        parse_keys(source, &text)
    }
}

/// The `authorized_keys` file of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTarget {
    /// Path below the root.
    pub path: PathBuf,
    /// uid and gid to chown to; only set when operating on the real root.
    pub owner: Option<(u32, u32)>,
}

/// Locate the `authorized_keys` file of `user`.
///
/// # Errors
///
/// Returns an error if the user does not exist or has no home directory.
pub fn key_target(rt: &Runtime, user: &str) -> Result<KeyTarget> {
    let db = UserDatabase::load(&rt.root)?;
    let home = db
        .home_of(user)
        .with_context(|| format!("user {user} does not exist or has no home directory"))?;
    Ok(KeyTarget {
        path: rt.target_path(home).join(".ssh/authorized_keys"),
        owner: if rt.is_system_root() {
            db.ids_of(user)
        } else {
            None
        },
    })
}

/// Compute the new contents of a key file.
///
/// Keys in `previous` that are no longer `desired` are removed, `desired`
/// keys already present take the declared comment, and missing ones are
/// appended. Every other line is left alone.
#[must_use]
pub fn render(current: &str, desired: &[Key], previous: &[Key]) -> Rewrite {
    rewrite(
        current,
        |key| render_edit(key, desired, previous),
        || append_missing(current, desired),
    )
}

/// Keys declared by the other fragments of the same user.
///
/// # Errors
///
/// Returns an error if a sibling fragment cannot be read or parsed.
pub fn sibling_keys(rt: &Runtime, entity: &KeyEntity) -> Result<Vec<Key>, HoloError> {
    let dir = rt.resource_dir.join(&entity.user);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HoloError::io(&dir, e)),
    };
    let own = format!("{}.pub", entity.file);
    let mut keys = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| HoloError::io(&dir, e))?.path();
        let is_sibling = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".pub") && n != own);
        if is_sibling && path.is_file() {
            let text = std::fs::read_to_string(&path).map_err(|e| HoloError::io(&path, e))?;
            keys.extend(parse_keys(&path, &text)?);
        }
    }
    Ok(keys)
}

/// The subset of `previous` that may be taken out of the key file: keys
/// another fragment of the same user still declares stay in place.
///
/// # Errors
///
/// See [`sibling_keys`].
pub fn removable_keys(
    rt: &Runtime,
    entity: &KeyEntity,
    previous: &[Key],
) -> Result<Vec<Key>, HoloError> {
    let siblings = sibling_keys(rt, entity)?;
    Ok(previous
        .iter()
        .filter(|p| !siblings.iter().any(|s| s.same_identity(p)))
        .cloned()
        .collect())
}

fn present_keys(text: &str) -> Vec<Key> {
    text.lines().filter_map(|l| Key::parse(l).ok()).collect()
}

/// Reconcile one entity.
///
/// # Errors
///
/// Returns [`HoloError::NeedForceToRestore`] if a previously provisioned
/// key that is still declared was deleted from the file and `force` is
/// not set, and any error from reading or writing keys.
pub fn apply(
    rt: &Runtime,
    entity: &KeyEntity,
    force: bool,
    registry: &mut Registry,
) -> Result<ResourceChange> {
    let id = entity.id();
    let target = key_target(rt, &entity.user)?;
    let desired = entity.declared_keys()?;
    let previous = registry.provisioned_keys(&entity.user, &entity.file)?;
    let current = keyfile::read(&target.path)?;
    let removable = removable_keys(rt, entity, &previous)?;

    if !force {
        let present = present_keys(&current);
        let deleted = previous.iter().any(|p| {
            desired.iter().any(|d| d.same_identity(p))
                && !present.iter().any(|k| k.same_identity(p))
        });
        if deleted {
            return Err(HoloError::NeedForceToRestore { entity: id }.into());
        }
    }

    let written = if entity.is_orphan() {
        keyfile::process(
            &target.path,
            target.owner,
            |key| {
                (!removable.iter().any(|p| p.same_identity(key))).then(|| key.clone())
            },
            Vec::new,
        )?
    } else {
        keyfile::process(
            &target.path,
            target.owner,
            |key| render_edit(key, &desired, &removable),
            || append_missing(&current, &desired),
        )?
    };

    let bookkeeping_current = registry.contains(&id) && previous == desired;
    if entity.is_orphan() {
        registry.forget(&id, &entity.user, &entity.file)?;
    } else if !bookkeeping_current {
        registry.record(&id, &entity.user, &entity.file, &desired)?;
    }

    if written || entity.is_orphan() || !bookkeeping_current {
        Ok(ResourceChange::Applied)
    } else {
        Ok(ResourceChange::AlreadyCorrect)
    }
}

fn render_edit(key: &Key, desired: &[Key], previous: &[Key]) -> Option<Key> {
    if let Some(wanted) = desired.iter().find(|d| d.same_identity(key)) {
        Some(wanted.clone())
    } else if previous.iter().any(|p| p.same_identity(key)) {
        None
    } else {
        Some(key.clone())
    }
}

fn append_missing(current: &str, desired: &[Key]) -> Vec<Key> {
    let present = present_keys(current);
    desired
        .iter()
        .filter(|d| !present.iter().any(|p| p.same_identity(d)))
        .cloned()
        .collect()
}
