//! Discovery of declared and orphaned account entities.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::definition::{DeclarationFile, Entity, EntityKind};
use super::image;
use super::merge::{MergeMode, merge};
use crate::error::HoloError;
use crate::fs::resolve_linked;
use crate::plugin::ScanEntity;
use crate::runtime::Runtime;

/// One group or user, declared or orphaned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountEntity {
    /// Entity kind.
    pub kind: EntityKind,
    /// Group or user name.
    pub name: String,
    /// Merged declaration; `None` for orphans.
    pub declared: Option<Entity>,
    /// Declaration files that contributed, in merge order.
    pub sources: Vec<PathBuf>,
}

impl AccountEntity {
    /// Entity ID.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.name)
    }

    /// Whether all declarations for this entity were removed.
    #[must_use]
    pub const fn is_orphan(&self) -> bool {
        self.declared.is_none()
    }
}

/// Split `group:<name>` or `user:<name>`.
#[must_use]
pub fn parse_entity_id(id: &str) -> Option<(EntityKind, &str)> {
    let (kind, name) = id.split_once(':')?;
    let kind = match kind {
        "group" => EntityKind::Group,
        "user" => EntityKind::User,
        _ => return None,
    };
    (!name.is_empty()).then_some((kind, name))
}

/// Declaration files in the resource directory, sorted by name.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if the directory exists but cannot be read.
pub fn declaration_files(resource_dir: &Path) -> Result<Vec<PathBuf>, HoloError> {
    let entries = match std::fs::read_dir(resource_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HoloError::io(resource_dir, e)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| HoloError::io(resource_dir, e))?.path();
        if path.extension().is_some_and(|e| e == "toml") && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files
        .iter()
        .map(|path| resolve_linked(resource_dir, path))
        .collect())
}

/// All entities, sorted by ID: everything declared plus every stored
/// pre-image without a declaration.
///
/// # Errors
///
/// Returns the first parse error or [`HoloError::MergeConflict`] between
/// stacked declarations.
pub fn discover(rt: &Runtime) -> Result<Vec<AccountEntity>, HoloError> {
    let mut entities: BTreeMap<String, AccountEntity> = BTreeMap::new();
    for path in declaration_files(&rt.resource_dir)? {
        let text = std::fs::read_to_string(&path).map_err(|e| HoloError::io(&path, e))?;
        for entity in DeclarationFile::parse(&path, &text)?.into_entities() {
            let id = entity.id();
            if let Some(existing) = entities.get_mut(&id) {
                let merged = match &existing.declared {
                    Some(previous) => merge(previous, &entity, MergeMode::Permissive)?,
                    None => entity,
                };
                existing.declared = Some(merged);
                if !existing.sources.contains(&path) {
                    existing.sources.push(path.clone());
                }
            } else {
                entities.insert(
                    id,
                    AccountEntity {
                        kind: entity.kind(),
                        name: entity.name().to_string(),
                        declared: Some(entity),
                        sources: vec![path.clone()],
                    },
                );
            }
        }
    }

    for id in image::stored_ids(rt)? {
        if entities.contains_key(&id) {
            continue;
        }
        if let Some((kind, name)) = parse_entity_id(&id) {
            entities.insert(
                id.clone(),
                AccountEntity {
                    kind,
                    name: name.to_string(),
                    declared: None,
                    sources: Vec::new(),
                },
            );
        }
    }
    Ok(entities.into_values().collect())
}

/// Scan metadata: sources plus the merged attributes.
#[must_use]
pub fn describe(entity: &AccountEntity) -> ScanEntity {
    let mut scan = ScanEntity::new(entity.id());
    for source in &entity.sources {
        scan = scan.with_source(source.display().to_string());
    }
    match &entity.declared {
        None => scan.with_action("Scrubbing", Some("remove definition from all repository files")),
        Some(declared) => attributes(declared)
            .into_iter()
            .fold(scan, |scan, (key, value)| scan.with_info(key, value)),
    }
}

fn attributes(entity: &Entity) -> Vec<(&'static str, String)> {
    let mut lines = Vec::new();
    match entity {
        Entity::Group(g) => {
            if let Some(gid) = g.gid {
                lines.push(("gid", gid.to_string()));
            }
            if g.system {
                lines.push(("type", "system".to_string()));
            }
        }
        Entity::User(u) => {
            if let Some(uid) = u.uid {
                lines.push(("uid", uid.to_string()));
            }
            if u.system {
                lines.push(("type", "system".to_string()));
            }
            let optional = [
                ("comment", &u.comment),
                ("home", &u.home),
                ("login group", &u.group),
            ];
            lines.extend(
                optional
                    .into_iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| (k, v.clone()))),
            );
            if !u.groups.is_empty() {
                lines.push(("groups", u.groups.join(", ")));
            }
            if let Some(shell) = &u.shell {
                lines.push(("login shell", shell.clone()));
            }
        }
    }
    lines
}
