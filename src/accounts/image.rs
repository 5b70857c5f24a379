//! Pre-images: the state of an account before holo first touched it.
//!
//! Stored as `<state>/base/<entity-id>.toml`. A file whose body is empty
//! records that the entity did not exist.
use std::path::PathBuf;

use super::definition::{DeclarationFile, Entity};
use crate::error::HoloError;
use crate::fs::{atomic_write, remove_if_exists};
use crate::runtime::Runtime;

/// What was recorded for an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreImage {
    /// No pre-image file.
    Missing,
    /// The entity did not exist before the first apply.
    Absent,
    /// The entity as it was before the first apply.
    Present(Entity),
}

/// Directory holding all pre-images.
#[must_use]
pub fn image_dir(rt: &Runtime) -> PathBuf {
    rt.state_dir.join("base")
}

/// Path of the pre-image for `entity_id`.
#[must_use]
pub fn image_path(rt: &Runtime, entity_id: &str) -> PathBuf {
    image_dir(rt).join(format!("{entity_id}.toml"))
}

/// Read the pre-image of `entity_id`.
///
/// # Errors
///
/// Returns [`HoloError::InvalidDeclaration`] if the file does not hold
/// exactly the entity it is named after.
pub fn load(rt: &Runtime, entity_id: &str) -> Result<PreImage, HoloError> {
    let path = image_path(rt, entity_id);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PreImage::Missing),
        Err(e) => return Err(HoloError::io(&path, e)),
    };
    let mut entities: Vec<Entity> = DeclarationFile::parse(&path, &text)?
        .into_entities()
        .collect();
    match (entities.pop(), entities.is_empty()) {
        (None, _) => Ok(PreImage::Absent),
        (Some(entity), true) if entity.id() == entity_id => Ok(PreImage::Present(entity)),
        _ => Err(HoloError::InvalidDeclaration {
            path: path.display().to_string(),
            reason: format!("expected a single entry for {entity_id}"),
        }),
    }
}

/// Record `entity` (or its absence) as the pre-image of `entity_id`.
///
/// # Errors
///
/// Returns an error if serialisation or the write fails.
pub fn store(rt: &Runtime, entity_id: &str, entity: Option<&Entity>) -> anyhow::Result<()> {
    let text = match entity {
        Some(entity) => format!("[[{}]]\n{}", entity.kind().as_str(), entity.to_toml_body()?),
        None => String::new(),
    };
    atomic_write(&image_path(rt, entity_id), text.as_bytes(), 0o644)?;
    Ok(())
}

/// Delete the pre-image of `entity_id`.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if the file cannot be removed.
pub fn remove(rt: &Runtime, entity_id: &str) -> Result<(), HoloError> {
    remove_if_exists(&image_path(rt, entity_id)).map(|_| ())
}

/// IDs of all stored pre-images, sorted.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if the directory exists but cannot be read.
pub fn stored_ids(rt: &Runtime) -> Result<Vec<String>, HoloError> {
    let dir = image_dir(rt);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HoloError::io(&dir, e)),
    };
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| HoloError::io(&dir, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(id) = name.strip_suffix(".toml")
            && is_entity_id(id)
        {
            ids.push(id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

fn is_entity_id(id: &str) -> bool {
    id.strip_prefix("user:")
        .or_else(|| id.strip_prefix("group:"))
        .is_some_and(|name| !name.is_empty())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::accounts::definition::User;
    use crate::platform::Platform;
    use std::path::Path;

    fn runtime(dir: &Path) -> Runtime {
        Runtime::new(
            dir.join("root"),
            dir.join("res"),
            dir.join("state"),
            dir.join("cache"),
            Platform::Generic,
        )
    }

    #[test]
    fn store_and_load_present_entity() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let user = Entity::User(User {
            name: "j".to_string(),
            uid: Some(1000),
            ..User::default()
        });
        store(&rt, "user:j", Some(&user)).unwrap();
        assert_eq!(
            std::fs::read_to_string(image_path(&rt, "user:j")).unwrap(),
            "[[user]]\nname = \"j\"\nuid = 1000\n"
        );
        assert_eq!(load(&rt, "user:j").unwrap(), PreImage::Present(user));
    }

    #[test]
    fn empty_image_means_absent() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        assert_eq!(load(&rt, "group:g").unwrap(), PreImage::Missing);
        store(&rt, "group:g", None).unwrap();
        assert_eq!(load(&rt, "group:g").unwrap(), PreImage::Absent);
        assert_eq!(stored_ids(&rt).unwrap(), vec!["group:g".to_string()]);
        remove(&rt, "group:g").unwrap();
        assert!(stored_ids(&rt).unwrap().is_empty());
    }

    #[test]
    fn mismatched_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let path = image_path(&rt, "user:j");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[user]]\nname = \"k\"\n").unwrap();
        assert!(load(&rt, "user:j").is_err());
    }

    #[test]
    fn foreign_files_are_not_ids() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        std::fs::create_dir_all(image_dir(&rt)).unwrap();
        std::fs::write(image_dir(&rt).join("README"), "").unwrap();
        std::fs::write(image_dir(&rt).join("other:x.toml"), "").unwrap();
        assert!(stored_ids(&rt).unwrap().is_empty());
    }
}
