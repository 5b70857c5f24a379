//! Bookkeeping of provisioned key fragments.
//!
//! The registry file lists the IDs of all entities that have been applied,
//! one per line. Each entry has a copy of the keys it provisioned below
//! `<state>/provisioned/<user>/<file>.pub`, so that they can be removed
//! again once the fragment disappears from the repository.
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::key::Key;
use super::keyfile::{parse_keys, read};
use crate::error::HoloError;
use crate::fs::{atomic_write, prune_empty_dirs, remove_if_exists};
use crate::runtime::Runtime;

/// Registry of applied ssh-key entities.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    provisioned_dir: PathBuf,
    entries: BTreeSet<String>,
}

impl Registry {
    /// Load the registry of `rt`. A missing file is an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::Io`] if the file exists but cannot be read.
    pub fn load(rt: &Runtime) -> Result<Self, HoloError> {
        let path = rt.state_dir.join("registry");
        let entries = read(&path)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string)
            .collect();
        Ok(Self {
            path,
            provisioned_dir: rt.state_dir.join("provisioned"),
            entries,
        })
    }

    /// Registered entity IDs, sorted.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Whether `entity_id` was applied before.
    #[must_use]
    pub fn contains(&self, entity_id: &str) -> bool {
        self.entries.contains(entity_id)
    }

    fn copy_path(&self, user: &str, file: &str) -> PathBuf {
        self.provisioned_dir.join(user).join(format!("{file}.pub"))
    }

    /// Keys provisioned for `user`/`file` on the last apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored copy cannot be read or parsed.
    pub fn provisioned_keys(&self, user: &str, file: &str) -> Result<Vec<Key>, HoloError> {
        let path = self.copy_path(user, file);
        parse_keys(&path, &read(&path)?)
    }

    /// Record `keys` as provisioned and register `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::Io`] if the copy or the registry cannot be
    /// written.
    pub fn record(
        &mut self,
        entity_id: &str,
        user: &str,
        file: &str,
        keys: &[Key],
    ) -> Result<(), HoloError> {
        let text: String = keys.iter().map(|k| format!("{k}\n")).collect();
        atomic_write(&self.copy_path(user, file), text.as_bytes(), 0o600)?;
        if self.entries.insert(entity_id.to_string()) {
            self.save()?;
        }
        Ok(())
    }

    /// Forget `entity_id` and its provisioned copy.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::Io`] if the copy or the registry cannot be
    /// updated.
    pub fn forget(&mut self, entity_id: &str, user: &str, file: &str) -> Result<(), HoloError> {
        let copy = self.copy_path(user, file);
        remove_if_exists(&copy)?;
        if let Some(dir) = copy.parent() {
            prune_empty_dirs(dir, &self.provisioned_dir);
        }
        if self.entries.remove(entity_id) {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> Result<(), HoloError> {
        let text: String = self.entries.iter().map(|e| format!("{e}\n")).collect();
        atomic_write(&self.path, text.as_bytes(), 0o644)
    }
}
