//! Three-version reconciliation of groups and users.
//!
//! The three versions are the merged declaration, the pre-image recorded
//! before the first apply, and the live entry in the user database.
//! Changes are made exclusively through the shadow-utils commands.
use anyhow::{Context as _, Result};

use super::definition::{Entity, EntityKind, Group, User};
use super::image::{self, PreImage};
use super::live::UserDatabase;
use super::merge::{MergeMode, merge, overlay};
use super::scan::AccountEntity;
use crate::error::HoloError;
use crate::exec::Executor;
use crate::plugin::ResourceChange;
use crate::runtime::Runtime;

/// Reconcile one account entity.
///
/// # Errors
///
/// Returns [`HoloError::NeedForceToOverwrite`] or
/// [`HoloError::NeedForceToRestore`] when local modifications would be
/// lost without `force`, and any error from the database, the pre-image
/// store, or the account tools.
pub fn apply(
    rt: &Runtime,
    entity: &AccountEntity,
    force: bool,
    exec: &dyn Executor,
) -> Result<ResourceChange> {
    let db = UserDatabase::load(&rt.root)?;
    let live = db.lookup(entity.kind, &entity.name);
    let id = entity.id();

    let Some(declared) = &entity.declared else {
        return scrub(rt, entity, live.as_ref(), exec);
    };

    let stored = image::load(rt, &id)?;
    let desired = desired_state(declared, &stored, live.as_ref());

    if let Some(live) = &live
        && serialize(&live.restricted_to(&desired))? == serialize(&desired)?
    {
        if stored == PreImage::Missing {
            image::store(rt, &id, Some(live))?;
        }
        return Ok(ResourceChange::AlreadyCorrect);
    }

    match &live {
        Some(live) if !force => {
            let compatible = merge(live, declared, MergeMode::Strict);
            let diverged = match compatible {
                Ok(compatible) => {
                    serialize(&compatible.restricted_to(&desired))? != serialize(&desired)?
                }
                Err(_) => true,
            };
            if diverged {
                return Err(HoloError::NeedForceToOverwrite { entity: id }.into());
            }
        }
        None if !force && stored != PreImage::Missing => {
            return Err(HoloError::NeedForceToRestore { entity: id }.into());
        }
        _ => {}
    }

    let command = match &live {
        Some(_) => modify_command(&desired),
        None => Some(add_command(&desired)),
    };
    if let Some((program, args)) = command {
        run(exec, program, &args).with_context(|| format!("applying {id}"))?;
    }
    if stored == PreImage::Missing {
        image::store(rt, &id, live.as_ref())?;
    }
    Ok(ResourceChange::Applied)
}

/// The state `declared` converges to: the declaration, with open
/// properties taken from the pre-image (or from the live entry before the
/// first apply).
#[must_use]
pub fn desired_state(declared: &Entity, stored: &PreImage, live: Option<&Entity>) -> Entity {
    let pre_image = match stored {
        PreImage::Present(pre) => Some(pre),
        PreImage::Absent => None,
        PreImage::Missing => live,
    };
    pre_image.map_or_else(|| declared.clone(), |pre| overlay(declared, pre))
}

/// Restore an orphaned entity to its pre-image, or delete it if it did not
/// exist before, then forget the pre-image.
fn scrub(
    rt: &Runtime,
    entity: &AccountEntity,
    live: Option<&Entity>,
    exec: &dyn Executor,
) -> Result<ResourceChange> {
    let id = entity.id();
    match image::load(rt, &id)? {
        PreImage::Missing => {
            tracing::debug!("{id}: no pre-image, nothing to scrub");
            return Ok(ResourceChange::AlreadyCorrect);
        }
        PreImage::Absent => {
            if live.is_some() {
                let (program, args) = delete_command(entity);
                run(exec, program, &args).with_context(|| format!("deleting {id}"))?;
            }
        }
        PreImage::Present(pre) => {
            let command = match live {
                Some(live) if serialize(&live.restricted_to(&pre))? == serialize(&pre)? => None,
                Some(_) => modify_command(&pre),
                None => Some(add_command(&pre)),
            };
            if let Some((program, args)) = command {
                run(exec, program, &args).with_context(|| format!("restoring {id}"))?;
            }
        }
    }
    image::remove(rt, &id)?;
    Ok(ResourceChange::Applied)
}

fn serialize(entity: &Entity) -> Result<String> {
    entity
        .to_toml_body()
        .with_context(|| format!("serialising {}", entity.id()))
}

fn run(exec: &dyn Executor, program: &str, args: &[String]) -> Result<()> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    exec.run(program, &args)?;
    Ok(())
}

/// `groupadd` or `useradd` invocation creating `entity`.
#[must_use]
pub fn add_command(entity: &Entity) -> (&'static str, Vec<String>) {
    match entity {
        Entity::Group(g) => {
            let mut args = group_args(g);
            if g.system {
                args.push("--system".to_string());
            }
            args.push(g.name.clone());
            ("groupadd", args)
        }
        Entity::User(u) => {
            let mut args = user_args(u);
            if u.system {
                args.push("--system".to_string());
            }
            args.push(u.name.clone());
            ("useradd", args)
        }
    }
}

/// `groupmod` or `usermod` invocation enforcing `entity` on an existing
/// entry, or `None` if nothing is enforced.
#[must_use]
pub fn modify_command(entity: &Entity) -> Option<(&'static str, Vec<String>)> {
    let (program, mut args, name) = match entity {
        Entity::Group(g) => ("groupmod", group_args(g), &g.name),
        Entity::User(u) => ("usermod", user_args(u), &u.name),
    };
    if args.is_empty() {
        return None;
    }
    args.push(name.clone());
    Some((program, args))
}

/// `groupdel` or `userdel` invocation.
#[must_use]
pub fn delete_command(entity: &AccountEntity) -> (&'static str, Vec<String>) {
    let program = match entity.kind {
        EntityKind::Group => "groupdel",
        EntityKind::User => "userdel",
    };
    (program, vec![entity.name.clone()])
}

fn group_args(group: &Group) -> Vec<String> {
    group
        .gid
        .map_or_else(Vec::new, |gid| vec!["--gid".to_string(), gid.to_string()])
}

fn user_args(user: &User) -> Vec<String> {
    let mut args = Vec::new();
    let mut push = |flag: &str, value: Option<String>| {
        if let Some(value) = value {
            args.push(flag.to_string());
            args.push(value);
        }
    };
    push("--uid", user.uid.as_ref().map(ToString::to_string));
    push("--comment", user.comment.clone());
    push("--home-dir", user.home.clone());
    push("--gid", user.group.clone());
    push(
        "--groups",
        (!user.groups.is_empty()).then(|| user.groups.join(",")),
    );
    push("--shell", user.shell.clone());
    args
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::exec::test_helpers::MockExecutor;
    use crate::platform::Platform;
    use std::fs;
    use std::path::Path;

    fn runtime(dir: &Path, passwd: &str, group: &str) -> Runtime {
        let rt = Runtime::new(
            dir.join("root"),
            dir.join("res"),
            dir.join("state"),
            dir.join("cache"),
            Platform::Generic,
        );
        fs::create_dir_all(rt.root.join("etc")).unwrap();
        fs::write(rt.root.join("etc/passwd"), passwd).unwrap();
        fs::write(rt.root.join("etc/group"), group).unwrap();
        rt
    }

    fn declared_user(f: impl FnOnce(&mut User)) -> AccountEntity {
        let mut user = User {
            name: "j".to_string(),
            ..User::default()
        };
        f(&mut user);
        AccountEntity {
            kind: EntityKind::User,
            name: "j".to_string(),
            declared: Some(Entity::User(user)),
            sources: Vec::new(),
        }
    }

    const GROUP: &str = "users:x:100:\nwheel:x:10:\n";
    const PASSWD_J: &str = "j:x:1000:100::/home/j:/bin/bash\n";

    #[test]
    fn missing_user_is_created_and_absence_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), "", GROUP);
        let entity = declared_user(|u| {
            u.uid = Some(1000);
            u.system = true;
            u.groups = vec!["wheel".to_string(), "users".to_string()];
        });
        let exec = MockExecutor::new();

        let change = apply(&rt, &entity, false, &exec).unwrap();
        assert_eq!(change, ResourceChange::Applied);
        assert_eq!(
            exec.calls(),
            vec!["useradd --uid 1000 --groups wheel,users --system j"]
        );
        assert_eq!(image::load(&rt, "user:j").unwrap(), PreImage::Absent);
    }

    #[test]
    fn matching_user_is_not_changed() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), PASSWD_J, GROUP);
        let entity = declared_user(|u| {
            u.uid = Some(1000);
            u.shell = Some("/bin/bash".to_string());
        });
        let exec = MockExecutor::new();

        let change = apply(&rt, &entity, false, &exec).unwrap();
        assert_eq!(change, ResourceChange::AlreadyCorrect);
        assert!(exec.calls().is_empty());
        assert!(matches!(
            image::load(&rt, "user:j").unwrap(),
            PreImage::Present(_)
        ));
    }

    #[test]
    fn conflicting_live_user_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), PASSWD_J, GROUP);
        let entity = declared_user(|u| u.shell = Some("/bin/zsh".to_string()));
        let exec = MockExecutor::new();

        let err = apply(&rt, &entity, false, &exec).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HoloError>(),
            Some(HoloError::NeedForceToOverwrite { .. })
        ));
        assert!(exec.calls().is_empty());

        let change = apply(&rt, &entity, true, &exec).unwrap();
        assert_eq!(change, ResourceChange::Applied);
        assert_eq!(
            exec.calls(),
            vec!["usermod --uid 1000 --home-dir /home/j --gid users --shell /bin/zsh j"]
        );
    }

    #[test]
    fn declared_value_wins_over_stored_pre_image() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), PASSWD_J, GROUP);
        let pre = Entity::User(User {
            name: "j".to_string(),
            uid: Some(1000),
            shell: Some("/bin/bash".to_string()),
            ..User::default()
        });
        image::store(&rt, "user:j", Some(&pre)).unwrap();
        let entity = declared_user(|u| u.shell = Some("/bin/zsh".to_string()));

        let desired = desired_state(
            entity.declared.as_ref().unwrap(),
            &image::load(&rt, "user:j").unwrap(),
            None,
        );
        assert!(matches!(&desired, Entity::User(u)
            if u.shell.as_deref() == Some("/bin/zsh") && u.uid == Some(1000)));

        let exec = MockExecutor::new();
        apply(&rt, &entity, true, &exec).unwrap();
        assert_eq!(exec.calls(), vec!["usermod --uid 1000 --shell /bin/zsh j"]);
    }

    #[test]
    fn differing_supplementary_groups_need_force() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), PASSWD_J, "users:x:100:\nwheel:x:10:\naudio:x:11:j\n");
        let entity = declared_user(|u| u.groups = vec!["wheel".to_string()]);

        let err = apply(&rt, &entity, false, &MockExecutor::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HoloError>(),
            Some(HoloError::NeedForceToOverwrite { .. })
        ));
    }

    #[test]
    fn added_supplementary_group_is_compatible() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), PASSWD_J, GROUP);
        let entity = declared_user(|u| u.groups = vec!["wheel".to_string()]);
        let exec = MockExecutor::new();

        let change = apply(&rt, &entity, false, &exec).unwrap();
        assert_eq!(change, ResourceChange::Applied);
        assert_eq!(
            exec.calls(),
            vec!["usermod --uid 1000 --home-dir /home/j --gid users --groups wheel --shell /bin/bash j"]
        );
    }

    #[test]
    fn deleted_user_needs_force_to_restore() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), "", GROUP);
        let entity = declared_user(|u| u.uid = Some(1000));
        image::store(&rt, "user:j", None).unwrap();

        let err = apply(&rt, &entity, false, &MockExecutor::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HoloError>(),
            Some(HoloError::NeedForceToRestore { .. })
        ));

        let exec = MockExecutor::new();
        apply(&rt, &entity, true, &exec).unwrap();
        assert_eq!(exec.calls(), vec!["useradd --uid 1000 j"]);
    }

    #[test]
    fn orphan_without_pre_existing_entry_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), PASSWD_J, GROUP);
        image::store(&rt, "user:j", None).unwrap();
        let entity = AccountEntity {
            kind: EntityKind::User,
            name: "j".to_string(),
            declared: None,
            sources: Vec::new(),
        };
        let exec = MockExecutor::new();

        apply(&rt, &entity, false, &exec).unwrap();
        assert_eq!(exec.calls(), vec!["userdel j"]);
        assert_eq!(image::load(&rt, "user:j").unwrap(), PreImage::Missing);
    }

    #[test]
    fn orphan_with_pre_image_is_restored() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), "", "g:x:20:\n");
        let pre = Entity::Group(Group {
            name: "g".to_string(),
            gid: Some(10),
            system: false,
        });
        image::store(&rt, "group:g", Some(&pre)).unwrap();
        let entity = AccountEntity {
            kind: EntityKind::Group,
            name: "g".to_string(),
            declared: None,
            sources: Vec::new(),
        };
        let exec = MockExecutor::new();

        apply(&rt, &entity, false, &exec).unwrap();
        assert_eq!(exec.calls(), vec!["groupmod --gid 10 g"]);
        assert_eq!(image::load(&rt, "group:g").unwrap(), PreImage::Missing);
    }

    #[test]
    fn failing_tool_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path(), "", "");
        let entity = AccountEntity {
            kind: EntityKind::Group,
            name: "g".to_string(),
            declared: Some(Entity::Group(Group {
                name: "g".to_string(),
                gid: None,
                system: true,
            })),
            sources: Vec::new(),
        };
        let exec = MockExecutor::with_responses(vec![(false, String::new())]);
        assert!(apply(&rt, &entity, false, &exec).is_err());
        assert_eq!(exec.calls(), vec!["groupadd --system g"]);
    }

    #[test]
    fn group_without_gid_needs_no_modification() {
        let group = Entity::Group(Group {
            name: "g".to_string(),
            gid: None,
            system: true,
        });
        assert_eq!(modify_command(&group), None);
    }
}
