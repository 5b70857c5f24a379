//! Frontend run setup: configuration, cache, generators, lock, and scanning.
pub mod cache;
pub mod config;
pub mod generators;
pub mod lock;
pub mod selectors;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};

use crate::error::HoloError;
use crate::plugin::{PluginHandle, ScanEntity, parse_report};
use cache::RunCache;
use lock::RunLock;
pub use selectors::Selectors;

/// Exit status after an interrupting signal.
pub const SIGNAL_EXIT_CODE: i32 = 130;

/// Paths to remove when the process is interrupted.
///
/// The handler is installed once per process; sessions register their lock
/// file and cache directory while they are open.
#[derive(Debug, Clone, Default)]
pub struct Cleanup {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl Cleanup {
    /// Install the SIGINT/SIGTERM handler.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler is already installed.
    pub fn install() -> Result<Self> {
        let cleanup = Self::default();
        let paths = Arc::clone(&cleanup.paths);
        ctrlc::set_handler(move || {
            if let Ok(guard) = paths.lock() {
                remove_all(&guard);
            }
            std::process::exit(SIGNAL_EXIT_CODE);
        })
        .context("installing signal handler")?;
        Ok(cleanup)
    }

    fn register(&self, path: &Path) {
        if let Ok(mut guard) = self.paths.lock() {
            guard.push(path.to_path_buf());
        }
    }

    fn unregister(&self, path: &Path) {
        if let Ok(mut guard) = self.paths.lock() {
            guard.retain(|p| p != path);
        }
    }

    /// Currently registered paths.
    #[must_use]
    pub fn registered(&self) -> Vec<PathBuf> {
        self.paths.lock().map_or_else(|_| vec![], |g| g.clone())
    }
}

fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        if let Err(e) = result {
            tracing::warn!("cannot remove {}: {e}", path.display());
        }
    }
}

/// One scanned entity and the plugin that reported it.
#[derive(Debug, Clone)]
pub struct ScannedEntity<'a> {
    /// Plugin that owns the entity.
    pub plugin: &'a PluginHandle,
    /// The entity's scan report.
    pub entity: ScanEntity,
}

/// An open run: holds the cache directory and the lock until dropped.
#[derive(Debug)]
pub struct Session {
    root: PathBuf,
    plugins: Vec<PluginHandle>,
    cleanup: Option<Cleanup>,
    // Dropped in this order: lock first, then cache.
    lock: RunLock,
    cache: RunCache,
}

impl Session {
    /// Load `holorc`, create the cache, run generators, take the lock, and
    /// check every plugin's API version.
    ///
    /// # Errors
    ///
    /// Returns an error for any setup failure; [`HoloError::LockHeld`] if
    /// another instance is running.
    pub fn open(root: &Path, cleanup: Option<Cleanup>) -> Result<Self> {
        let specs = config::load(root)?;

        let cache = RunCache::create()?;
        if let Some(cleanup) = &cleanup {
            cleanup.register(cache.path());
        }
        generators::run_generators(root, &cache).context("running generators")?;

        let lock = RunLock::acquire(root)?;
        if let Some(cleanup) = &cleanup {
            cleanup.register(lock.path());
        }

        let mut plugins = Vec::with_capacity(specs.len());
        for spec in &specs {
            let executable = spec.resolve_executable(root)?;
            let mut handle =
                PluginHandle::new(&spec.id, executable, root, &cache.plugin_dir(&spec.id));
            handle.resource_dir = generators::resource_dir_for(root, &cache, &spec.id)?;
            handle.check_version()?;
            plugins.push(handle);
        }

        Ok(Self {
            root: root.to_path_buf(),
            plugins,
            cleanup,
            lock,
            cache,
        })
    }

    /// Filesystem root of this run.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configured plugins, in `holorc` order.
    #[must_use]
    pub fn plugins(&self) -> &[PluginHandle] {
        &self.plugins
    }

    /// Scan all plugins. Entities come in `holorc` plugin order, sorted by ID
    /// within each plugin.
    ///
    /// # Errors
    ///
    /// Returns an error if a plugin fails to scan, its report does not parse,
    /// or two plugins claim the same entity.
    pub fn scan_all(&self) -> Result<Vec<ScannedEntity<'_>>> {
        let mut all = Vec::<ScannedEntity<'_>>::new();
        for plugin in &self.plugins {
            let report = plugin.scan()?;
            let mut entities = parse_report(&plugin.id, &report).collect::<Result<Vec<_>, _>>()?;
            entities.sort_by(|a, b| a.id.cmp(&b.id));
            for entity in entities {
                if let Some(other) = all.iter().find(|s| s.entity.id == entity.id) {
                    return Err(HoloError::PluginProtocol(format!(
                        "entity {} reported by both {} and {}",
                        entity.id, other.plugin.id, plugin.id
                    ))
                    .into());
                }
                all.push(ScannedEntity { plugin, entity });
            }
        }
        Ok(all)
    }

    /// Scan and keep the entities matched by `selectors`.
    ///
    /// # Errors
    ///
    /// See [`Session::scan_all`].
    pub fn select(&self, selectors: &Selectors) -> Result<Vec<ScannedEntity<'_>>> {
        Ok(self
            .scan_all()?
            .into_iter()
            .filter(|s| selectors.select(&s.plugin.id, &s.entity))
            .collect())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(cleanup) = &self.cleanup {
            cleanup.unregister(self.lock.path());
            cleanup.unregister(self.cache.path());
        }
    }
}

/// The root directory from `HOLO_ROOT_DIR`, defaulting to `/`.
#[must_use]
pub fn root_from_env() -> PathBuf {
    std::env::var_os("HOLO_ROOT_DIR")
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("/"), PathBuf::from)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt as _;

    fn write_plugin(root: &Path, name: &str, scan: &str) {
        let path = root.join("usr/lib/holo").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            format!(
                "#!/bin/sh\ncase \"$1\" in\n\
                 info) printf 'MIN_API_VERSION=3\\nMAX_API_VERSION=3\\n' ;;\n\
                 scan) printf '{scan}' ;;\n\
                 esac\n"
            ),
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn setup(holorc: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("etc/holorc"), holorc).unwrap();
        write_plugin(
            dir.path(),
            "one",
            "ENTITY: b:2\\n\\nENTITY: a:1\\nSOURCE: /res/a\\n",
        );
        write_plugin(dir.path(), "two", "ENTITY: c:3\\n");
        dir
    }

    #[test]
    fn scan_orders_by_plugin_then_id() {
        let dir = setup("plugin two=/usr/lib/holo/two\nplugin one=/usr/lib/holo/one\n");
        let session = Session::open(dir.path(), None).unwrap();
        let ids: Vec<_> = session
            .scan_all()
            .unwrap()
            .into_iter()
            .map(|s| format!("{}/{}", s.plugin.id, s.entity.id))
            .collect();
        assert_eq!(ids, vec!["two/c:3", "one/a:1", "one/b:2"]);
    }

    #[test]
    fn session_holds_lock_and_cache() {
        let dir = setup("plugin one=/usr/lib/holo/one\n");
        let cleanup = Cleanup::default();
        let session = Session::open(dir.path(), Some(cleanup.clone())).unwrap();
        assert!(RunLock::path_for(dir.path()).exists());
        assert_eq!(cleanup.registered().len(), 2);

        let err = Session::open(dir.path(), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HoloError>(),
            Some(HoloError::LockHeld { .. })
        ));

        assert_eq!(
            session.plugins()[0].cache_dir,
            session.cache.plugin_dir("one")
        );

        let cache = session.cache.path().to_path_buf();
        drop(session);
        assert!(!RunLock::path_for(dir.path()).exists());
        assert!(!cache.exists());
        assert!(cleanup.registered().is_empty());
    }

    #[test]
    fn selection_by_source() {
        let dir = setup("plugin one=/usr/lib/holo/one\nplugin two=/usr/lib/holo/two\n");
        let session = Session::open(dir.path(), None).unwrap();
        let selectors = Selectors::new(&["/res/a".to_string(), "two".to_string()]);
        let ids: Vec<_> = session
            .select(&selectors)
            .unwrap()
            .into_iter()
            .map(|s| s.entity.id)
            .collect();
        assert_eq!(ids, vec!["a:1", "c:3"]);
        assert!(selectors.unused().is_empty());
    }

    #[test]
    fn duplicate_entity_is_rejected() {
        let dir = setup("plugin one=/usr/lib/holo/one\nplugin two=/usr/lib/holo/two\n");
        write_plugin(dir.path(), "two", "ENTITY: a:1\\n");
        let session = Session::open(dir.path(), None).unwrap();
        assert!(session.scan_all().is_err());
    }

    #[test]
    fn missing_holorc_fails_before_locking() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Session::open(dir.path(), None).is_err());
        assert!(!RunLock::path_for(dir.path()).exists());
    }

    #[test]
    fn remove_all_handles_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        let sub = dir.path().join("d/e");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(&sub).unwrap();
        remove_all(&[file.clone(), dir.path().join("d")]);
        assert!(!file.exists());
        assert!(!sub.exists());
    }
}
