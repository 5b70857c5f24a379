//! The `users-groups` plugin: declarative UNIX groups and users.
pub mod apply;
pub mod definition;
pub mod image;
pub mod live;
pub mod merge;
pub mod scan;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::exec::{EchoExecutor, Executor, SystemExecutor};
use crate::fs::atomic_write;
use crate::plugin::{DiffPair, Plugin, ResourceChange, ScanEntity};
use crate::runtime::Runtime;
use definition::Entity;
use image::PreImage;
use live::UserDatabase;
use scan::{AccountEntity, describe, discover, parse_entity_id};

/// Plugin ID.
pub const PLUGIN_ID: &str = "users-groups";

/// The `users-groups` plugin.
///
/// Without an explicit executor, account tools run for real only when the
/// root is `/`; for any other root their command lines are printed instead,
/// since `useradd` and friends cannot target a relocated root.
#[derive(Debug, Default)]
pub struct AccountsPlugin {
    exec: Option<Box<dyn Executor>>,
}

impl AccountsPlugin {
    /// Create the plugin with a fixed executor.
    #[must_use]
    pub fn new(exec: Box<dyn Executor>) -> Self {
        Self { exec: Some(exec) }
    }

    fn with_executor<R>(&self, rt: &Runtime, f: impl FnOnce(&dyn Executor) -> R) -> R {
        match &self.exec {
            Some(exec) => f(exec.as_ref()),
            None if rt.is_system_root() => f(&SystemExecutor),
            None => f(&EchoExecutor),
        }
    }

    fn find(rt: &Runtime, entity_id: &str) -> Result<AccountEntity> {
        parse_entity_id(entity_id).with_context(|| format!("{entity_id}: not an account entity"))?;
        discover(rt)?
            .into_iter()
            .find(|e| e.id() == entity_id)
            .with_context(|| format!("{entity_id}: no such entity"))
    }
}

impl Plugin for AccountsPlugin {
    fn id(&self) -> &'static str {
        PLUGIN_ID
    }

    fn scan(&self, rt: &Runtime) -> Result<Vec<ScanEntity>> {
        Ok(discover(rt)?.iter().map(describe).collect())
    }

    fn apply(&self, rt: &Runtime, entity_id: &str, force: bool) -> Result<ResourceChange> {
        let entity = Self::find(rt, entity_id)?;
        self.with_executor(rt, |exec| apply::apply(rt, &entity, force, exec))
    }

    fn diff(&self, rt: &Runtime, entity_id: &str) -> Result<Option<DiffPair>> {
        let entity = Self::find(rt, entity_id)?;
        let db = UserDatabase::load(&rt.root)?;
        let live = db.lookup(entity.kind, &entity.name);
        let stored = image::load(rt, entity_id)?;

        let expected = match &entity.declared {
            Some(declared) => Some(apply::desired_state(declared, &stored, live.as_ref())),
            None => match stored {
                PreImage::Present(pre) => Some(pre),
                PreImage::Absent | PreImage::Missing => None,
            },
        };
        // compare only what is enforced
        let actual = match (&live, &expected) {
            (Some(live), Some(expected)) => Some(live.restricted_to(expected)),
            (live, None) => live.clone(),
            (None, _) => None,
        };

        let dir = rt.cache_dir.join("diff");
        Ok(Some(DiffPair {
            expected: write_state(&dir.join("expected"), entity_id, expected.as_ref())?,
            actual: write_state(&dir.join("actual"), entity_id, actual.as_ref())?,
        }))
    }
}

fn write_state(dir: &Path, entity_id: &str, entity: Option<&Entity>) -> Result<PathBuf> {
    let Some(entity) = entity else {
        return Ok(PathBuf::from("/dev/null"));
    };
    let path = dir.join(format!("{entity_id}.toml"));
    let body = entity
        .to_toml_body()
        .with_context(|| format!("serialising {entity_id}"))?;
    let text = format!("[[{}]]\n{body}", entity.kind().as_str());
    atomic_write(&path, text.as_bytes(), 0o644)?;
    Ok(path)
}

/// Entry point of the `holo-users-groups` binary.
#[must_use]
pub fn main(args: &[String]) -> i32 {
    crate::plugin::protocol::run(&AccountsPlugin::default(), args)
}
