//! Declarations of UNIX groups and users.
//!
//! Declaration files are TOML documents with `[[group]]` and `[[user]]`
//! arrays. Properties left out are not enforced.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::HoloError;

/// A UNIX group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Group {
    /// Group name.
    pub name: String,
    /// Numeric group ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    /// Create as a system group. Not a property of the live group, so
    /// never written to a pre-image.
    #[serde(default, skip_serializing)]
    pub system: bool,
}

/// A UNIX user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct User {
    /// Login name.
    pub name: String,
    /// Numeric user ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// Create as a system user. Never written to a pre-image.
    #[serde(default, skip_serializing)]
    pub system: bool,
    /// GECOS field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Home directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    /// Name of the login group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Supplementary group names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    /// Login shell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
}

/// Kind of account entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntityKind {
    /// `group:<name>`
    Group,
    /// `user:<name>`
    User,
}

impl EntityKind {
    /// Prefix of entity IDs and the TOML array name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::User => "user",
        }
    }
}

/// A group or user declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// A group.
    Group(Group),
    /// A user.
    User(User),
}

impl Entity {
    /// Kind of this entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Group(_) => EntityKind::Group,
            Self::User(_) => EntityKind::User,
        }
    }

    /// Group or user name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Group(g) => &g.name,
            Self::User(u) => &u.name,
        }
    }

    /// Entity ID (`group:<name>` or `user:<name>`).
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}:{}", self.kind().as_str(), self.name())
    }

    /// Deterministic TOML body (no array header).
    ///
    /// Field order is fixed and the system flag is omitted, so byte
    /// equality of two serialisations is equality of the live-relevant
    /// properties.
    ///
    /// # Errors
    ///
    /// Returns an error if TOML encoding fails.
    pub fn to_toml_body(&self) -> Result<String, toml::ser::Error> {
        match self {
            Self::Group(g) => toml::to_string(g),
            Self::User(u) => toml::to_string(u),
        }
    }

    /// Restrict this entity to the properties `template` enforces.
    ///
    /// Used to compare a fully populated live entity against a partial
    /// declaration.
    #[must_use]
    pub fn restricted_to(&self, template: &Self) -> Self {
        fn keep<T: Clone>(value: Option<&T>, template: Option<&T>) -> Option<T> {
            template.and(value).cloned()
        }
        match (self, template) {
            (Self::Group(g), Self::Group(t)) => Self::Group(Group {
                name: g.name.clone(),
                gid: keep(g.gid.as_ref(), t.gid.as_ref()),
                system: t.system,
            }),
            (Self::User(u), Self::User(t)) => Self::User(User {
                name: u.name.clone(),
                uid: keep(u.uid.as_ref(), t.uid.as_ref()),
                system: t.system,
                comment: keep(u.comment.as_ref(), t.comment.as_ref()),
                home: keep(u.home.as_ref(), t.home.as_ref()),
                group: keep(u.group.as_ref(), t.group.as_ref()),
                groups: if t.groups.is_empty() {
                    Vec::new()
                } else {
                    u.groups.clone()
                },
                shell: keep(u.shell.as_ref(), t.shell.as_ref()),
            }),
            _ => self.clone(),
        }
    }
}

/// Contents of one declaration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeclarationFile {
    /// `[[group]]` tables.
    #[serde(default)]
    pub group: Vec<Group>,
    /// `[[user]]` tables.
    #[serde(default)]
    pub user: Vec<User>,
}

impl DeclarationFile {
    /// Parse a declaration file.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::InvalidDeclaration`] for malformed TOML, unknown
    /// keys, or entries with an empty name.
    pub fn parse(path: &Path, text: &str) -> Result<Self, HoloError> {
        let parsed: Self = toml::from_str(text).map_err(|e| HoloError::InvalidDeclaration {
            path: path.display().to_string(),
            reason: e.message().to_string(),
        })?;
        let invalid = |reason: &str| HoloError::InvalidDeclaration {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };
        if parsed.group.iter().any(|g| g.name.trim().is_empty()) {
            return Err(invalid("group without name"));
        }
        if parsed.user.iter().any(|u| u.name.trim().is_empty()) {
            return Err(invalid("user without name"));
        }
        Ok(parsed)
    }

    /// All entities in file order, groups first.
    pub fn into_entities(self) -> impl Iterator<Item = Entity> {
        self.group
            .into_iter()
            .map(Entity::Group)
            .chain(self.user.into_iter().map(Entity::User))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn parse_groups_and_users() {
        let text = r#"
[[group]]
name = "wheel"
gid = 10
system = true

[[user]]
name = "j"
uid = 1000
groups = ["wheel", "video"]
shell = "/bin/zsh"
"#;
        let file = DeclarationFile::parse(Path::new("x.toml"), text).unwrap();
        let entities: Vec<_> = file.into_entities().collect();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id(), "group:wheel");
        assert_eq!(entities[1].id(), "user:j");
        assert_eq!(
            entities[1],
            Entity::User(User {
                name: "j".to_string(),
                uid: Some(1000),
                groups: vec!["wheel".to_string(), "video".to_string()],
                shell: Some("/bin/zsh".to_string()),
                ..User::default()
            })
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = DeclarationFile::parse(Path::new("x.toml"), "[[user]]\nname=\"j\"\nfoo=1\n")
            .unwrap_err();
        assert!(matches!(err, HoloError::InvalidDeclaration { .. }));
    }

    #[test]
    fn empty_name_is_rejected() {
        assert!(DeclarationFile::parse(Path::new("x.toml"), "[[group]]\nname=\"\"\n").is_err());
    }

    #[test]
    fn body_is_deterministic_and_omits_system() {
        let user = Entity::User(User {
            name: "j".to_string(),
            uid: Some(1000),
            system: true,
            shell: Some("/bin/sh".to_string()),
            ..User::default()
        });
        insta::assert_snapshot!(user.to_toml_body().unwrap(), @r#"
        name = "j"
        uid = 1000
        shell = "/bin/sh"
        "#);
    }

    #[test]
    fn restricted_to_keeps_only_enforced_properties() {
        let live = Entity::User(User {
            name: "j".to_string(),
            uid: Some(1000),
            home: Some("/home/j".to_string()),
            shell: Some("/bin/bash".to_string()),
            groups: vec!["wheel".to_string()],
            ..User::default()
        });
        let template = Entity::User(User {
            name: "j".to_string(),
            shell: Some("/bin/zsh".to_string()),
            ..User::default()
        });
        let restricted = live.restricted_to(&template);
        assert_eq!(
            restricted,
            Entity::User(User {
                name: "j".to_string(),
                shell: Some("/bin/bash".to_string()),
                ..User::default()
            })
        );
    }
}
