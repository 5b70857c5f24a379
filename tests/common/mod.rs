// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed filesystem root and a fluent builder
// so each integration test can lay out resources, state, and live files
// without repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::cell::RefCell;
use std::io::Write;
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use holo::platform::Platform;
use holo::runtime::Runtime;

/// An isolated filesystem root backed by a [`tempfile::TempDir`].
///
/// The directory is automatically deleted when dropped.
pub struct TestRoot {
    /// Temporary directory acting as `HOLO_ROOT_DIR`.
    pub dir: tempfile::TempDir,
}

impl TestRoot {
    /// Path of the root.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of `rel` below the root.
    pub fn join(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel.trim_start_matches('/'))
    }

    /// Runtime for `plugin_id` with the standard directory layout.
    pub fn runtime(&self, plugin_id: &str, platform: Platform) -> Runtime {
        let cache = self.join("tmp/holo-cache").join(plugin_id);
        std::fs::create_dir_all(&cache).expect("create cache dir");
        Runtime::new(
            self.path(),
            self.join("usr/share/holo").join(plugin_id),
            self.join("var/lib/holo").join(plugin_id),
            cache,
            platform,
        )
    }

    /// Contents of `rel`, or `None` if it does not exist.
    pub fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.join(rel)).ok()
    }

    /// Overwrite `rel` with `content`, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        std::fs::write(path, content).expect("write file");
    }

    /// Permission bits of `rel`.
    pub fn mode(&self, rel: &str) -> u32 {
        std::fs::metadata(self.join(rel))
            .expect("stat")
            .permissions()
            .mode()
            & 0o7777
    }
}

/// Fluent builder for [`TestRoot`].
pub struct TestRootBuilder {
    root: TestRoot,
}

impl TestRootBuilder {
    /// Begin building an empty root.
    pub fn new() -> Self {
        Self {
            root: TestRoot {
                dir: tempfile::tempdir().expect("create temp dir"),
            },
        }
    }

    /// Write a live file at `rel`.
    pub fn with_file(self, rel: &str, content: &str) -> Self {
        self.root.write(rel, content);
        self
    }

    /// Write a resource below `usr/share/holo/<plugin>/`.
    pub fn with_resource(self, plugin: &str, rel: &str, content: &str) -> Self {
        self.root
            .write(&format!("usr/share/holo/{plugin}/{rel}"), content);
        self
    }

    /// Write an executable shell script resource below
    /// `usr/share/holo/<plugin>/`.
    pub fn with_script(self, plugin: &str, rel: &str, body: &str) -> Self {
        let rel = format!("usr/share/holo/{plugin}/{rel}");
        self.root.write(&rel, &format!("#!/bin/sh\n{body}\n"));
        std::fs::set_permissions(self.root.join(&rel), std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        self
    }

    /// Write `etc/holorc`.
    pub fn with_holorc(self, content: &str) -> Self {
        self.root.write("etc/holorc", content);
        self
    }

    /// Write `etc/passwd` and `etc/group` with one user `name` whose home is
    /// `/home/<name>`.
    pub fn with_user(self, name: &str, uid: u32) -> Self {
        self.root.write(
            "etc/passwd",
            &format!("{name}:x:{uid}:{uid}::/home/{name}:/bin/sh\n"),
        );
        self.root.write("etc/group", &format!("{name}:x:{uid}:\n"));
        self
    }

    /// Finish building and return the root.
    pub fn build(self) -> TestRoot {
        self.root
    }
}

/// In-memory writer shared with a [`holo::plugin::StatusChannel`] so tests
/// can read what a plugin wrote to FD 3.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).to_string()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run one plugin subcommand through the protocol dispatcher and return
/// what it wrote to FD 3.
pub fn dispatch(plugin: &dyn holo::plugin::Plugin, rt: &Runtime, args: &[&str]) -> String {
    let fd3 = SharedBuffer::default();
    let mut status = holo::plugin::StatusChannel::from_writer(fd3.clone());
    let mut stdout = Vec::new();
    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
    let code = holo::plugin::protocol::dispatch(
        plugin,
        || Ok(rt.clone()),
        &args,
        &mut stdout,
        &mut status,
    )
    .expect("dispatch");
    assert_eq!(code, 0);
    fd3.contents()
}
