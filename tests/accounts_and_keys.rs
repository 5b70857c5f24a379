#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::wildcard_imports,
    clippy::indexing_slicing
)]
//! End-to-end behaviour of the `users-groups` and `ssh-keys` plugins.

mod common;

use common::{TestRootBuilder, dispatch};
use holo::accounts::AccountsPlugin;
use holo::error::HoloError;
use holo::plugin::Plugin as _;
use holo::platform::Platform;
use holo::sshkeys::SshKeysPlugin;

const KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGq3cM4iu2g5n5dC8dYkC4S4m0aTyyCNu7lGq3sWw1zQ laptop";

// ---------------------------------------------------------------------------
// users-groups
// ---------------------------------------------------------------------------

#[test]
fn conflicting_declarations_are_reported() {
    let root = TestRootBuilder::new()
        .with_resource("users-groups", "01-u1.toml", "[[user]]\nname = \"j\"\nuid = 1000\n")
        .with_resource("users-groups", "02-u2.toml", "[[user]]\nname = \"j\"\nuid = 1001\n")
        .build();
    let rt = root.runtime("users-groups", Platform::Generic);
    let plugin = AccountsPlugin::default();

    let err = plugin.scan(&rt).unwrap_err();
    let conflict = err.downcast_ref::<HoloError>().unwrap();
    assert!(
        matches!(conflict, HoloError::MergeConflict { field, id, .. }
            if field == "uid" && id == "user:j"),
        "{conflict}"
    );
    assert!(plugin.apply(&rt, "user:j", false).is_err());
}

#[test]
fn stacked_declarations_are_merged_in_scan() {
    let root = TestRootBuilder::new()
        .with_resource(
            "users-groups",
            "01-base.toml",
            "[[group]]\nname = \"wheel\"\n\n[[user]]\nname = \"j\"\nuid = 1000\n",
        )
        .with_resource(
            "users-groups",
            "02-extra.toml",
            "[[user]]\nname = \"j\"\ngroups = [\"wheel\"]\nshell = \"/bin/zsh\"\n",
        )
        .build();
    let rt = root.runtime("users-groups", Platform::Generic);

    let scan = AccountsPlugin::default().scan(&rt).unwrap();
    let ids: Vec<_> = scan.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["group:wheel", "user:j"]);
    let user = &scan[1];
    assert_eq!(user.sources.len(), 2);
    assert!(user.info.contains(&("uid".to_string(), "1000".to_string())));
    assert!(user.info.contains(&("login shell".to_string(), "/bin/zsh".to_string())));
}

// ---------------------------------------------------------------------------
// ssh-keys
// ---------------------------------------------------------------------------

#[test]
fn authorized_keys_are_created() {
    let root = TestRootBuilder::new()
        .with_user("u", 1000)
        .with_resource("ssh-keys", "u/laptop.pub", &format!("{KEY}\n"))
        .build();
    let rt = root.runtime("ssh-keys", Platform::Generic);
    let plugin = SshKeysPlugin::default();

    let fd3 = dispatch(&plugin, &rt, &["apply", "ssh-key:u/laptop"]);
    assert_eq!(fd3, "");
    assert_eq!(
        root.read("home/u/.ssh/authorized_keys").as_deref(),
        Some(format!("{KEY}\n").as_str())
    );
    assert_eq!(root.mode("home/u/.ssh/authorized_keys"), 0o600);
    assert_eq!(root.mode("home/u/.ssh"), 0o700);

    let fd3 = dispatch(&plugin, &rt, &["apply", "ssh-key:u/laptop"]);
    assert_eq!(fd3, "not changed\n");
}

#[test]
fn removed_fragment_is_scrubbed() {
    let root = TestRootBuilder::new()
        .with_user("u", 1000)
        .with_resource("ssh-keys", "u/laptop.pub", &format!("{KEY}\n"))
        .with_file("home/u/.ssh/authorized_keys", "# mine\n")
        .build();
    let rt = root.runtime("ssh-keys", Platform::Generic);
    let plugin = SshKeysPlugin::default();
    dispatch(&plugin, &rt, &["apply", "ssh-key:u/laptop"]);
    assert_eq!(
        root.read("home/u/.ssh/authorized_keys").as_deref(),
        Some(format!("# mine\n{KEY}\n").as_str())
    );

    std::fs::remove_file(root.join("usr/share/holo/ssh-keys/u/laptop.pub")).unwrap();
    let scan = plugin.scan(&rt).unwrap();
    assert_eq!(scan.len(), 1);
    assert_eq!(scan[0].action_verb, "Scrubbing");

    dispatch(&plugin, &rt, &["apply", "ssh-key:u/laptop"]);
    assert_eq!(root.read("home/u/.ssh/authorized_keys").as_deref(), Some("# mine\n"));
    assert!(plugin.scan(&rt).unwrap().is_empty());
}
