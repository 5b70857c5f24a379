//! Merging of stacked account declarations.
use super::definition::{Entity, Group, User};
use crate::error::HoloError;

/// How supplementary group lists are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Both lists must be equal when both are non-empty.
    Strict,
    /// The union is taken.
    Permissive,
}

/// Merge two declarations for the same entity.
///
/// Single-valued properties may be set on at most one side, or on both
/// sides with the same value. The system flag is OR-ed; the comment of `b`
/// overrides that of `a`.
///
/// # Errors
///
/// Returns [`HoloError::MergeConflict`] naming the first conflicting field.
pub fn merge(a: &Entity, b: &Entity, mode: MergeMode) -> Result<Entity, HoloError> {
    let id = a.id();
    match (a, b) {
        (Entity::Group(a), Entity::Group(b)) => Ok(Entity::Group(Group {
            name: a.name.clone(),
            gid: single(&id, "gid", a.gid, b.gid)?,
            system: a.system || b.system,
        })),
        (Entity::User(a), Entity::User(b)) => Ok(Entity::User(User {
            name: a.name.clone(),
            uid: single(&id, "uid", a.uid, b.uid)?,
            system: a.system || b.system,
            comment: b.comment.clone().or_else(|| a.comment.clone()),
            home: single(&id, "home", a.home.clone(), b.home.clone())?,
            group: single(&id, "group", a.group.clone(), b.group.clone())?,
            groups: merge_groups(&id, &a.groups, &b.groups, mode)?,
            shell: single(&id, "shell", a.shell.clone(), b.shell.clone())?,
        })),
        _ => Err(HoloError::MergeConflict {
            field: "type".to_string(),
            id,
            a: a.kind().as_str().to_string(),
            b: b.kind().as_str().to_string(),
        }),
    }
}

/// Fill the properties `declared` leaves open from `base`.
///
/// Unlike [`merge`], `declared` wins on conflicting single values; group
/// lists are united.
#[must_use]
pub fn overlay(declared: &Entity, base: &Entity) -> Entity {
    match (declared, base) {
        (Entity::Group(d), Entity::Group(b)) => Entity::Group(Group {
            name: d.name.clone(),
            gid: d.gid.or(b.gid),
            system: d.system,
        }),
        (Entity::User(d), Entity::User(b)) => Entity::User(User {
            name: d.name.clone(),
            uid: d.uid.or(b.uid),
            system: d.system,
            comment: d.comment.clone().or_else(|| b.comment.clone()),
            home: d.home.clone().or_else(|| b.home.clone()),
            group: d.group.clone().or_else(|| b.group.clone()),
            groups: union(&d.groups, &b.groups),
            shell: d.shell.clone().or_else(|| b.shell.clone()),
        }),
        _ => declared.clone(),
    }
}

fn single<T>(id: &str, field: &str, a: Option<T>, b: Option<T>) -> Result<Option<T>, HoloError>
where
    T: PartialEq + std::fmt::Display,
{
    match (a, b) {
        (Some(a), Some(b)) if a != b => Err(HoloError::MergeConflict {
            field: field.to_string(),
            id: id.to_string(),
            a: a.to_string(),
            b: b.to_string(),
        }),
        (a, b) => Ok(a.or(b)),
    }
}

fn merge_groups(
    id: &str,
    a: &[String],
    b: &[String],
    mode: MergeMode,
) -> Result<Vec<String>, HoloError> {
    match mode {
        MergeMode::Permissive => Ok(union(a, b)),
        MergeMode::Strict if a.is_empty() => Ok(b.to_vec()),
        MergeMode::Strict if b.is_empty() => Ok(a.to_vec()),
        MergeMode::Strict => {
            let mut sorted_a = a.to_vec();
            let mut sorted_b = b.to_vec();
            sorted_a.sort();
            sorted_b.sort();
            if sorted_a == sorted_b {
                Ok(a.to_vec())
            } else {
                Err(HoloError::MergeConflict {
                    field: "groups".to_string(),
                    id: id.to_string(),
                    a: a.join(","),
                    b: b.join(","),
                })
            }
        }
    }
}

/// Ordered union: `a` in order, then the new entries of `b`.
fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut result = a.to_vec();
    for group in b {
        if !result.contains(group) {
            result.push(group.clone());
        }
    }
    result
}
