//! Frontend side of the plugin protocol: spawning plugin processes.
use std::fs::File;
use std::io::{Read as _, Seek as _, SeekFrom};
use std::os::fd::AsRawFd as _;
use std::os::unix::process::CommandExt as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context as _, Result};

use super::protocol::{DiffPair, Status};
use crate::error::HoloError;
use crate::runtime::API_VERSION;

/// A configured plugin and the directories it is given.
#[derive(Debug, Clone)]
pub struct PluginHandle {
    /// Plugin ID.
    pub id: String,
    /// Executable implementing the plugin.
    pub executable: PathBuf,
    /// Filesystem root.
    pub root: PathBuf,
    /// `HOLO_RESOURCE_DIR` for this plugin.
    pub resource_dir: PathBuf,
    /// `HOLO_STATE_DIR` for this plugin.
    pub state_dir: PathBuf,
    /// `HOLO_CACHE_DIR` for this plugin.
    pub cache_dir: PathBuf,
}

/// What a plugin printed while handling one entity.
#[derive(Debug, Clone, Default)]
pub struct PluginOutput {
    /// Whether the plugin exited successfully.
    pub success: bool,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Raw bytes written to FD 3.
    pub fd3: Vec<u8>,
}

impl PluginOutput {
    /// Status lines recognised in the FD 3 output. Unknown lines are
    /// logged and skipped.
    #[must_use]
    pub fn statuses(&self) -> Vec<Status> {
        String::from_utf8_lossy(&self.fd3)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| {
                let status = Status::from_line(line.trim());
                if status.is_none() {
                    tracing::warn!("ignoring unknown plugin status {line:?}");
                }
                status
            })
            .collect()
    }

    /// The diff pair written to FD 3, or `None` for an empty pair.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::PluginProtocol`] if the output is not two
    /// NUL-terminated paths.
    pub fn diff_pair(&self) -> Result<Option<DiffPair>, HoloError> {
        if self.fd3.is_empty() {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&self.fd3);
        let fields: Vec<&str> = text.split('\0').collect();
        match fields.as_slice() {
            ["", "", ""] => Ok(None),
            [expected, actual, ""] => Ok(Some(DiffPair {
                expected: PathBuf::from(expected),
                actual: PathBuf::from(actual),
            })),
            _ => Err(HoloError::PluginProtocol(format!(
                "malformed diff output: {text:?}"
            ))),
        }
    }
}

impl PluginHandle {
    /// A plugin using the standard directory layout below `root`, with
    /// `cache_dir` as its `HOLO_CACHE_DIR`.
    #[must_use]
    pub fn new(id: &str, executable: PathBuf, root: &Path, cache_dir: &Path) -> Self {
        Self {
            id: id.to_string(),
            executable,
            root: root.to_path_buf(),
            resource_dir: root.join("usr/share/holo").join(id),
            state_dir: root.join("var/lib/holo").join(id),
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(args)
            .env("HOLO_API_VERSION", API_VERSION.to_string())
            .env("HOLO_CACHE_DIR", &self.cache_dir)
            .env("HOLO_RESOURCE_DIR", &self.resource_dir)
            .env("HOLO_STATE_DIR", &self.state_dir)
            .env("HOLO_ROOT_DIR", &self.root);
        cmd
    }

    fn prepare_dirs(&self) -> Result<()> {
        for dir in [&self.cache_dir, &self.state_dir] {
            std::fs::create_dir_all(dir).map_err(|e| HoloError::io(dir, e))?;
        }
        Ok(())
    }

    /// Ask the plugin for its API range and reject it if [`API_VERSION`] is
    /// outside.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::PluginProtocol`] for an incompatible or
    /// unparseable answer, or an error if the plugin cannot be run.
    pub fn check_version(&self) -> Result<()> {
        let output = self.run_captured(&["info"])?;
        if !output.success {
            anyhow::bail!("plugin {} failed to report info:\n{}", self.id, output.stderr);
        }
        let mut min = None;
        let mut max = None;
        for line in output.stdout.lines() {
            match line.split_once('=') {
                Some(("MIN_API_VERSION", v)) => min = v.trim().parse::<u32>().ok(),
                Some(("MAX_API_VERSION", v)) => max = v.trim().parse::<u32>().ok(),
                _ => {}
            }
        }
        match (min, max) {
            (Some(min), Some(max)) if (min..=max).contains(&API_VERSION) => Ok(()),
            (Some(min), Some(max)) => Err(HoloError::PluginProtocol(format!(
                "plugin {} supports API {min}..{max}, but holo needs {API_VERSION}",
                self.id
            ))
            .into()),
            _ => Err(HoloError::PluginProtocol(format!(
                "plugin {} did not report MIN_API_VERSION and MAX_API_VERSION",
                self.id
            ))
            .into()),
        }
    }

    /// Run `scan` and return the raw report.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin cannot be run or exits non-zero.
    pub fn scan(&self) -> Result<String> {
        self.prepare_dirs()?;
        let output = self.run_captured(&["scan"])?;
        for line in output.stderr.lines() {
            tracing::warn!("{}: {line}", self.id);
        }
        if !output.success {
            return Err(HoloError::ExternalTool {
                program: self.executable.display().to_string(),
                exit_code: -1,
                stderr: format!("scan of plugin {} failed", self.id),
            }
            .into());
        }
        Ok(output.stdout)
    }

    /// Run `apply` (or `force-apply`) for one entity.
    ///
    /// # Errors
    ///
    /// Returns an error only if the plugin cannot be spawned; a failing
    /// plugin is reported through [`PluginOutput::success`].
    pub fn apply(&self, entity_id: &str, force: bool) -> Result<PluginOutput> {
        self.prepare_dirs()?;
        let command = if force { "force-apply" } else { "apply" };
        self.run_with_fd3(&[command, entity_id])
    }

    /// Run `diff` for one entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin cannot be spawned.
    pub fn diff(&self, entity_id: &str) -> Result<PluginOutput> {
        self.prepare_dirs()?;
        self.run_with_fd3(&["diff", entity_id])
    }

    fn run_captured(&self, args: &[&str]) -> Result<PluginOutput> {
        let output = self
            .command(args)
            .output()
            .with_context(|| format!("running plugin {}", self.executable.display()))?;
        Ok(to_plugin_output(output, Vec::new()))
    }

    fn run_with_fd3(&self, args: &[&str]) -> Result<PluginOutput> {
        let mut status_file = tempfile::tempfile().context("creating FD 3 buffer")?;
        let mut cmd = self.command(args);
        attach_fd3(&mut cmd, &status_file);
        let output = cmd
            .output()
            .with_context(|| format!("running plugin {}", self.executable.display()))?;

        let mut fd3 = Vec::new();
        status_file
            .seek(SeekFrom::Start(0))
            .and_then(|_| status_file.read_to_end(&mut fd3))
            .context("reading FD 3 buffer")?;
        Ok(to_plugin_output(output, fd3))
    }
}

fn to_plugin_output(output: Output, fd3: Vec<u8>) -> PluginOutput {
    PluginOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        fd3,
    }
}

/// Make `file` available as FD 3 in the child process.
#[allow(unsafe_code)]
fn attach_fd3(cmd: &mut Command, file: &File) {
    let fd = file.as_raw_fd();
    // SAFETY: the closure runs between fork and exec and only calls the
    // async-signal-safe functions dup2 and fcntl on descriptors it owns.
    unsafe {
        cmd.pre_exec(move || {
            if fd == 3 {
                let flags = libc::fcntl(3, libc::F_GETFD);
                if flags < 0 || libc::fcntl(3, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
            } else if libc::dup2(fd, 3) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}
