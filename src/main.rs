//! The `holo` frontend, also answering to the plugin names.
use std::path::Path;

use clap::Parser;

use holo::cli::Cli;
use holo::orchestrator::{self, Cleanup};

/// Plugin entry points, by the name this binary may be invoked as.
const MULTI_CALL: &[(&str, fn(&[String]) -> i32)] = &[
    ("holo-files", holo::files::main),
    ("holo-users-groups", holo::accounts::main),
    ("holo-ssh-keys", holo::sshkeys::main),
];

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let invoked_as = args
        .first()
        .and_then(|a| Path::new(a).file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if let Some((_, plugin_main)) = MULTI_CALL.iter().find(|(name, _)| *name == invoked_as) {
        std::process::exit(plugin_main(args.get(1..).unwrap_or_default()));
    }

    let cli = Cli::parse();
    holo::logging::init_subscriber(cli.verbose);
    let cleanup = match Cleanup::install() {
        Ok(cleanup) => Some(cleanup),
        Err(e) => {
            tracing::warn!("{e:#}");
            None
        }
    };
    let code = holo::commands::run(&cli, &orchestrator::root_from_env(), cleanup);
    std::process::exit(code);
}
