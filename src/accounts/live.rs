//! Reading the live user database below the target root.
use std::collections::BTreeMap;
use std::path::Path;

use super::definition::{Entity, EntityKind, Group, User};
use crate::error::HoloError;

/// Parsed `/etc/passwd` and `/etc/group`.
#[derive(Debug, Clone, Default)]
pub struct UserDatabase {
    groups: BTreeMap<String, GroupRecord>,
    users: BTreeMap<String, PasswdRecord>,
}

#[derive(Debug, Clone)]
struct GroupRecord {
    gid: u32,
    members: Vec<String>,
}

#[derive(Debug, Clone)]
struct PasswdRecord {
    uid: u32,
    gid: u32,
    gecos: String,
    home: String,
    shell: String,
}

impl UserDatabase {
    /// Load the database of the system mounted at `root`. Missing files
    /// yield an empty database.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::InvalidRegistryEntry`] for malformed lines and
    /// [`HoloError::Io`] for unreadable files.
    pub fn load(root: &Path) -> Result<Self, HoloError> {
        let group_path = root.join("etc/group");
        let passwd_path = root.join("etc/passwd");
        let group_text = read_optional(&group_path)?;
        let passwd_text = read_optional(&passwd_path)?;
        Self::parse(&group_path, &group_text, &passwd_path, &passwd_text)
    }

    /// Parse database contents; the paths are only used in errors.
    ///
    /// # Errors
    ///
    /// See [`UserDatabase::load`].
    pub fn parse(
        group_path: &Path,
        group_text: &str,
        passwd_path: &Path,
        passwd_text: &str,
    ) -> Result<Self, HoloError> {
        let mut db = Self::default();
        for (line_no, fields) in records(group_path, group_text, 4)? {
            let [name, _, gid, members] = fields.as_slice() else {
                continue;
            };
            let gid = parse_id(group_path, line_no, gid)?;
            let members = members
                .split(',')
                .filter(|m| !m.is_empty())
                .map(ToString::to_string)
                .collect();
            db.groups
                .insert((*name).to_string(), GroupRecord { gid, members });
        }
        for (line_no, fields) in records(passwd_path, passwd_text, 7)? {
            let [name, _, uid, gid, gecos, home, shell] = fields.as_slice() else {
                continue;
            };
            db.users.insert(
                (*name).to_string(),
                PasswdRecord {
                    uid: parse_id(passwd_path, line_no, uid)?,
                    gid: parse_id(passwd_path, line_no, gid)?,
                    gecos: (*gecos).to_string(),
                    home: (*home).to_string(),
                    shell: (*shell).to_string(),
                },
            );
        }
        Ok(db)
    }

    /// The live entity of the given kind and name, fully populated, or
    /// `None` if it does not exist.
    #[must_use]
    pub fn lookup(&self, kind: EntityKind, name: &str) -> Option<Entity> {
        match kind {
            EntityKind::Group => self.groups.get(name).map(|g| {
                Entity::Group(Group {
                    name: name.to_string(),
                    gid: Some(g.gid),
                    system: false,
                })
            }),
            EntityKind::User => self.users.get(name).map(|u| Entity::User(self.user(name, u))),
        }
    }

    /// Home directory of `user`, if the user exists.
    #[must_use]
    pub fn home_of(&self, user: &str) -> Option<&str> {
        self.users
            .get(user)
            .map(|u| u.home.as_str())
            .filter(|h| !h.is_empty())
    }

    /// Numeric uid and login gid of `user`.
    #[must_use]
    pub fn ids_of(&self, user: &str) -> Option<(u32, u32)> {
        self.users.get(user).map(|u| (u.uid, u.gid))
    }

    fn user(&self, name: &str, record: &PasswdRecord) -> User {
        let group = self
            .groups
            .iter()
            .find(|(_, g)| g.gid == record.gid)
            .map_or_else(|| record.gid.to_string(), |(n, _)| n.clone());
        let mut groups: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, g)| g.members.iter().any(|m| m == name))
            .map(|(n, _)| n.clone())
            .collect();
        groups.sort();
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        User {
            name: name.to_string(),
            uid: Some(record.uid),
            system: false,
            comment: non_empty(&record.gecos),
            home: non_empty(&record.home),
            group: Some(group),
            groups,
            shell: non_empty(&record.shell),
        }
    }
}

fn read_optional(path: &Path) -> Result<String, HoloError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(HoloError::io(path, e)),
    }
}

/// Colon-separated records with exactly `width` fields, skipping blank
/// lines and comments. Line numbers are 1-based.
fn records<'a>(
    path: &Path,
    text: &'a str,
    width: usize,
) -> Result<Vec<(usize, Vec<&'a str>)>, HoloError> {
    let mut result = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != width {
            return Err(HoloError::InvalidRegistryEntry {
                path: path.display().to_string(),
                line: idx + 1,
                reason: format!("expected {width} fields, found {}", fields.len()),
            });
        }
        result.push((idx + 1, fields));
    }
    Ok(result)
}

fn parse_id(path: &Path, line: usize, value: &str) -> Result<u32, HoloError> {
    value.parse().map_err(|_| HoloError::InvalidRegistryEntry {
        path: path.display().to_string(),
        line,
        reason: format!("invalid numeric ID {value:?}"),
    })
}
