//! Frontend subcommands and the shared run setup.
pub mod apply;
pub mod diff;
pub mod scan;

use std::io::Write as _;
use std::path::Path;

use crate::cli::{Cli, Command};
use crate::exec::{Executor, SystemExecutor};
use crate::logging::Logger;
use crate::orchestrator::{Cleanup, Selectors, Session};

/// Exit code for a setup failure (configuration, lock, scan).
pub const EXIT_SETUP_FAILURE: i32 = 255;
/// Exit code for selectors that matched nothing.
pub const EXIT_UNKNOWN_SELECTOR: i32 = 2;

/// Shared state of one frontend command.
#[derive(Debug)]
pub struct Context<'a> {
    /// The open run.
    pub session: &'a Session,
    /// Entity selection from the command line.
    pub selectors: Selectors,
    /// Outcome collection for the exit code.
    pub log: &'a Logger,
    /// Runs the diff renderer.
    pub exec: &'a dyn Executor,
    /// Show unchanged entities too.
    pub verbose: bool,
}

impl Context<'_> {
    /// Report selectors that matched nothing; they turn `code` into
    /// [`EXIT_UNKNOWN_SELECTOR`].
    #[must_use]
    pub fn selector_exit_code(&self, code: i32) -> i32 {
        let unused = self.selectors.unused();
        for selector in &unused {
            self.log.error(&format!("Unrecognized argument: {selector}"));
        }
        if unused.is_empty() { code } else { EXIT_UNKNOWN_SELECTOR }
    }
}

/// Version string: `HOLO_VERSION` at build time, else the package version.
#[must_use]
pub fn version() -> &'static str {
    option_env!("HOLO_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Run a parsed command against `root` and return the process exit code.
pub fn run(cli: &Cli, root: &Path, cleanup: Option<Cleanup>) -> i32 {
    let log = Logger::new();
    let mut stdout = std::io::stdout().lock();

    let (selection, verbose) = match &cli.command {
        Command::Version => {
            return match writeln!(stdout, "holo {}", version()) {
                Ok(()) => 0,
                Err(_) => EXIT_SETUP_FAILURE,
            };
        }
        Command::Apply(opts) => (&opts.selection, cli.verbose),
        Command::Diff(opts) => (opts, cli.verbose),
        Command::Scan(opts) => (&opts.selection, cli.verbose),
    };

    let session = match Session::open(root, cleanup) {
        Ok(session) => session,
        Err(e) => {
            log.error(&format!("{e:#}"));
            return EXIT_SETUP_FAILURE;
        }
    };
    let ctx = Context {
        session: &session,
        selectors: Selectors::new(&selection.selectors),
        log: &log,
        exec: &SystemExecutor,
        verbose,
    };

    let result = match &cli.command {
        Command::Apply(opts) => apply::run(&ctx, opts.force, &mut stdout),
        Command::Diff(_) => diff::run(&ctx, &mut stdout),
        Command::Scan(opts) => {
            let format = if opts.short {
                scan::ScanFormat::Short
            } else if opts.porcelain {
                scan::ScanFormat::Porcelain
            } else {
                scan::ScanFormat::Human
            };
            scan::run(&ctx, format, &mut stdout)
        }
        Command::Version => Ok(0),
    };
    result.unwrap_or_else(|e| {
        log.error(&format!("{e:#}"));
        EXIT_SETUP_FAILURE
    })
}
