//! Plugin side of the plugin protocol.
//!
//! A plugin binary calls [`run`] with its [`Plugin`] implementation. `run`
//! reads the `HOLO_*` environment, dispatches the subcommand and writes
//! structured status to file descriptor 3.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context as _, Result};

use super::report::{ScanEntity, render_report};
use crate::error::HoloError;
use crate::runtime::{API_VERSION, Runtime};

/// Result of a successful apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceChange {
    /// The live state was changed (or state images were updated).
    Applied,
    /// The live state already matched; nothing was written.
    AlreadyCorrect,
}

/// Structured status lines a plugin may emit on FD 3 after `apply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Nothing had to be done.
    NotChanged,
    /// The user modified the entity; `--force` is needed to overwrite it.
    RequiresForceToOverwrite,
    /// The user deleted the entity; `--force` is needed to restore it.
    RequiresForceToRestore,
}

impl Status {
    /// Protocol line (without newline).
    #[must_use]
    pub const fn as_line(self) -> &'static str {
        match self {
            Self::NotChanged => "not changed",
            Self::RequiresForceToOverwrite => "requires --force to overwrite",
            Self::RequiresForceToRestore => "requires --force to restore",
        }
    }

    /// Parse a protocol line (without newline).
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        match line {
            "not changed" => Some(Self::NotChanged),
            "requires --force to overwrite" => Some(Self::RequiresForceToOverwrite),
            "requires --force to restore" => Some(Self::RequiresForceToRestore),
            _ => None,
        }
    }

    /// Status for a force-required error, if `err` is one.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Option<Self> {
        match err.downcast_ref::<HoloError>()? {
            HoloError::NeedForceToOverwrite { .. } => Some(Self::RequiresForceToOverwrite),
            HoloError::NeedForceToRestore { .. } => Some(Self::RequiresForceToRestore),
            _ => None,
        }
    }
}

/// Pair of files to compare for `diff`: expected state, then actual state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffPair {
    /// File holding the state the entity would have after `apply`.
    pub expected: PathBuf,
    /// File holding the current state (`/dev/null` if absent).
    pub actual: PathBuf,
}

/// Functionality a plugin provides.
pub trait Plugin {
    /// Plugin ID (`files`, `users-groups`, `ssh-keys`).
    fn id(&self) -> &'static str;

    /// Enumerate all entities.
    ///
    /// # Errors
    ///
    /// Returns an error if declarations or state cannot be read.
    fn scan(&self, rt: &Runtime) -> Result<Vec<ScanEntity>>;

    /// Reconcile the entity `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`HoloError::NeedForceToOverwrite`] or
    /// [`HoloError::NeedForceToRestore`] to request `--force`; any other error
    /// is a failure.
    fn apply(&self, rt: &Runtime, entity_id: &str, force: bool) -> Result<ResourceChange>;

    /// Prepare files for diffing the entity, or `None` if unsupported.
    ///
    /// # Errors
    ///
    /// Returns an error if the expected state cannot be rendered.
    fn diff(&self, rt: &Runtime, entity_id: &str) -> Result<Option<DiffPair>>;
}

/// Writer for FD 3. Falls back to discarding output when FD 3 is not open.
pub struct StatusChannel {
    out: Box<dyn Write>,
}

impl std::fmt::Debug for StatusChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusChannel").finish_non_exhaustive()
    }
}

impl StatusChannel {
    /// Open FD 3 of the current process.
    #[must_use]
    pub fn open() -> Self {
        match OpenOptions::new().write(true).open("/dev/fd/3") {
            Ok(file) => Self::from_writer(file),
            Err(e) => {
                tracing::debug!("FD 3 not available, discarding status output: {e}");
                Self::from_writer(std::io::sink())
            }
        }
    }

    /// Wrap an arbitrary writer.
    #[must_use]
    pub fn from_writer(out: impl Write + 'static) -> Self {
        Self { out: Box::new(out) }
    }

    /// Emit one status line.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn status(&mut self, status: Status) -> Result<()> {
        writeln!(self.out, "{}", status.as_line()).context("writing status to FD 3")?;
        self.out.flush().context("flushing FD 3")
    }

    /// Emit the NUL-terminated diff pair (both empty for `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn diff_pair(&mut self, pair: Option<&DiffPair>) -> Result<()> {
        let (expected, actual) = pair.map_or_else(
            || (String::new(), String::new()),
            |p| {
                (
                    p.expected.display().to_string(),
                    p.actual.display().to_string(),
                )
            },
        );
        write!(self.out, "{expected}\0{actual}\0").context("writing diff pair to FD 3")?;
        self.out.flush().context("flushing FD 3")
    }
}

/// Run a plugin as the current process and return its exit code.
///
/// `args` excludes the program name.
pub fn run(plugin: &dyn Plugin, args: &[String]) -> i32 {
    crate::logging::init_subscriber(false);
    let mut stdout = std::io::stdout().lock();
    let mut status = StatusChannel::open();
    let runtime = || Runtime::from_env(plugin.id());
    match dispatch(plugin, runtime, args, &mut stdout, &mut status) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            1
        }
    }
}

/// Dispatch one plugin subcommand.
///
/// Force-required errors from `apply` are reported on `status` and yield
/// exit code 0; other failures are returned.
///
/// # Errors
///
/// Returns an error for unknown subcommands, missing arguments, and any
/// failure of the plugin operation.
pub fn dispatch(
    plugin: &dyn Plugin,
    runtime: impl FnOnce() -> Result<Runtime>,
    args: &[String],
    stdout: &mut dyn Write,
    status: &mut StatusChannel,
) -> Result<i32> {
    let (command, rest) = args
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("usage: holo-{} <command> [<entity>]", plugin.id()))?;

    if command == "info" {
        writeln!(stdout, "MIN_API_VERSION={API_VERSION}")?;
        writeln!(stdout, "MAX_API_VERSION={API_VERSION}")?;
        return Ok(0);
    }

    let rt = runtime()?;
    let entity_arg = || {
        rest.first()
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("{command}: missing entity ID"))
    };

    match command.as_str() {
        "scan" => {
            let entities = plugin.scan(&rt)?;
            stdout.write_all(render_report(&entities).as_bytes())?;
            stdout.flush()?;
            Ok(0)
        }
        "apply" | "force-apply" => {
            let entity = entity_arg()?;
            match plugin.apply(&rt, entity, command == "force-apply") {
                Ok(ResourceChange::AlreadyCorrect) => status.status(Status::NotChanged)?,
                Ok(ResourceChange::Applied) => {}
                Err(e) => match Status::for_error(&e) {
                    Some(s) => {
                        tracing::debug!("{e:#}");
                        status.status(s)?;
                    }
                    None => return Err(e),
                },
            }
            Ok(0)
        }
        "diff" => {
            let entity = entity_arg()?;
            let pair = plugin.diff(&rt, entity)?;
            status.diff_pair(pair.as_ref())?;
            Ok(0)
        }
        other => anyhow::bail!("unknown command: {other}"),
    }
}
