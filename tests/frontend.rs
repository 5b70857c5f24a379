#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::wildcard_imports,
    clippy::indexing_slicing
)]
//! The `holo` frontend driving real plugin binaries against a scratch root.

mod common;

use std::process::{Command, Output};

use common::{TestRoot, TestRootBuilder};

fn holo(root: &TestRoot, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_holo"))
        .args(args)
        .env("HOLO_ROOT_DIR", root.path())
        .env("NO_COLOR", "1")
        .env_remove("HOLO_DEBUG")
        .output()
        .expect("run holo")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn with_generator(root: &TestRoot, body: &str) {
    root.write("usr/share/holo/generators/10-gen", &format!("#!/bin/sh\n{body}\n"));
    std::fs::set_permissions(
        root.join("usr/share/holo/generators/10-gen"),
        std::os::unix::fs::PermissionsExt::from_mode(0o755),
    )
    .unwrap();
}

fn files_root() -> TestRoot {
    TestRootBuilder::new()
        .with_holorc("# test configuration\nplugin files\n")
        .with_resource("files", "10-foo/etc/x", "A\n")
        .build()
}

#[test]
fn version_is_printed() {
    let root = files_root();
    let output = holo(&root, &["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("holo "));
}

#[test]
fn scan_short_lists_entities() {
    let root = files_root();
    let output = holo(&root, &["scan", "--short"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "file:/etc/x\n");
}

#[test]
fn scan_porcelain_reemits_report() {
    let root = files_root();
    let output = holo(&root, &["scan", "--porcelain"]);
    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.starts_with("ENTITY: file:/etc/x\nSOURCE: "), "{text}");
    assert!(text.contains("store at: "), "{text}");
}

#[test]
fn apply_is_idempotent_and_releases_lock() {
    let root = files_root();

    let output = holo(&root, &["apply"]);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
    assert!(stdout(&output).contains("Working on file:/etc/x"));
    assert_eq!(root.read("etc/x").as_deref(), Some("A\n"));
    assert!(!root.join("run/holo.pid").exists());

    let output = holo(&root, &["apply"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "");
}

#[test]
fn refused_force_sets_exit_code() {
    let root = files_root();
    holo(&root, &["apply"]);
    root.write("etc/x", "B\n");

    let output = holo(&root, &["apply", "file:/etc/x"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("requires --force to overwrite"));
    assert_eq!(root.read("etc/x").as_deref(), Some("B\n"));

    let output = holo(&root, &["apply", "--force", "file:/etc/x"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(root.read("etc/x").as_deref(), Some("A\n"));
}

#[test]
fn unknown_selector_is_a_usage_error() {
    let root = files_root();
    let output = holo(&root, &["scan", "file:/etc/nope"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("!! Unrecognized argument: file:/etc/nope"));
}

#[test]
fn held_lock_refuses_the_run() {
    let root = files_root();
    root.write("run/holo.pid", "1\n");
    let output = holo(&root, &["apply"]);
    assert_eq!(output.status.code(), Some(255));
    assert_eq!(root.read("etc/x"), None);
}

#[test]
fn missing_holorc_is_a_setup_failure() {
    let root = TestRootBuilder::new().build();
    assert_eq!(holo(&root, &["scan"]).status.code(), Some(255));
}

#[test]
fn generated_resources_are_applied() {
    let root = TestRootBuilder::new()
        .with_holorc("plugin files\n")
        .build();
    with_generator(
        &root,
        "mkdir -p \"$OUT/files/10-gen/etc\"\necho generated > \"$OUT/files/10-gen/etc/g\"",
    );

    let output = holo(&root, &["apply"]);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
    assert_eq!(root.read("etc/g").as_deref(), Some("generated\n"));
}

#[test]
fn static_resources_stay_visible_next_to_generated_ones() {
    let root = files_root();
    with_generator(
        &root,
        "mkdir -p \"$OUT/files/10-gen/etc\"\necho generated > \"$OUT/files/10-gen/etc/g\"",
    );

    let output = holo(&root, &["scan", "--porcelain", "file:/etc/x"]);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let static_source = root.join("usr/share/holo/files/10-foo/etc/x");
    assert!(
        stdout(&output).contains(&format!("SOURCE: {}\n", static_source.display())),
        "{}",
        stdout(&output)
    );

    let output = holo(&root, &["apply"]);
    assert_eq!(output.status.code(), Some(0), "{output:?}");
    assert_eq!(root.read("etc/x").as_deref(), Some("A\n"));
    assert!(
        !std::fs::symlink_metadata(root.join("etc/x"))
            .unwrap()
            .file_type()
            .is_symlink()
    );
}
