//! Embeds the release version as `HOLO_VERSION` for `holo version`.
use std::process::Command;

/// `git describe` of the checkout, if this is one.
fn git_version() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    let version = String::from_utf8(output.stdout).ok()?;
    let version = version.trim();
    (output.status.success() && !version.is_empty()).then(|| version.to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=HOLO_VERSION");
    println!("cargo:rerun-if-changed=.git/HEAD");

    // packagers pin the version; without it the binary reports CARGO_PKG_VERSION
    let version = std::env::var("HOLO_VERSION")
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(git_version);
    if let Some(version) = version {
        println!("cargo:rustc-env=HOLO_VERSION={version}");
    }
}
