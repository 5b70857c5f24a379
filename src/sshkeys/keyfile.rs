//! Line-preserving rewriting of `authorized_keys` files.
use std::path::Path;

use super::key::{Key, KeyError};
use crate::error::HoloError;
use crate::fs::atomic_write;

/// Result of one pass over a key file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// New file contents.
    pub text: String,
    /// Whether any key was changed, removed or appended.
    pub changed: bool,
}

/// Run `edit` over every key line of `text`, then append the keys returned
/// by `append`.
///
/// Comments, blank lines and unparseable lines pass through unchanged. A
/// key for which `edit` returns an identical key keeps its original line
/// byte for byte; `None` removes the line.
pub fn rewrite(
    text: &str,
    mut edit: impl FnMut(&Key) -> Option<Key>,
    append: impl FnOnce() -> Vec<Key>,
) -> Rewrite {
    let mut out = String::with_capacity(text.len());
    let mut changed = false;
    for line in text.lines() {
        match Key::parse(line) {
            Ok(key) => match edit(&key) {
                Some(new) if new == key => push_line(&mut out, line),
                Some(new) => {
                    push_line(&mut out, &new.to_string());
                    changed = true;
                }
                None => changed = true,
            },
            Err(KeyError::Empty) => push_line(&mut out, line),
            Err(e) => {
                tracing::warn!("keeping unrecognised line {line:?}: {e}");
                push_line(&mut out, line);
            }
        }
    }
    for key in append() {
        push_line(&mut out, &key.to_string());
        changed = true;
    }
    Rewrite { text: out, changed }
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

/// Parse all keys of a key fragment, skipping comments and blank lines.
///
/// # Errors
///
/// Returns [`HoloError::InvalidDeclaration`] for the first line that is not
/// a key.
pub fn parse_keys(path: &Path, text: &str) -> Result<Vec<Key>, HoloError> {
    let mut keys = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        match Key::parse(line) {
            Ok(key) => keys.push(key),
            Err(KeyError::Empty) => {}
            Err(e) => {
                return Err(HoloError::InvalidDeclaration {
                    path: path.display().to_string(),
                    reason: format!("line {}: {e}", idx + 1),
                });
            }
        }
    }
    Ok(keys)
}

/// Read a key file, treating a missing file as empty.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if the file exists but cannot be read.
pub fn read(path: &Path) -> Result<String, HoloError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(HoloError::io(path, e)),
    }
}

/// Apply [`rewrite`] to the file at `path`, writing it back (mode 0600)
/// only if something changed. Missing parent directories are created with
/// mode 0700 and, with `owner` set, chowned together with the file.
///
/// Returns whether the file was written.
///
/// # Errors
///
/// Returns [`HoloError::Io`] if reading, writing or chowning fails.
pub fn process(
    path: &Path,
    owner: Option<(u32, u32)>,
    edit: impl FnMut(&Key) -> Option<Key>,
    append: impl FnOnce() -> Vec<Key>,
) -> Result<bool, HoloError> {
    let result = rewrite(&read(path)?, edit, append);
    if !result.changed {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        create_private_dir(dir, owner)?;
    }
    atomic_write(path, result.text.as_bytes(), 0o600)?;
    if let Some((uid, gid)) = owner {
        std::os::unix::fs::chown(path, Some(uid), Some(gid)).map_err(|e| HoloError::io(path, e))?;
    }
    Ok(true)
}

fn create_private_dir(dir: &Path, owner: Option<(u32, u32)>) -> Result<(), HoloError> {
    use std::os::unix::fs::PermissionsExt as _;

    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| HoloError::io(dir, e))?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| HoloError::io(dir, e))?;
    if let Some((uid, gid)) = owner {
        std::os::unix::fs::chown(dir, Some(uid), Some(gid)).map_err(|e| HoloError::io(dir, e))?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt as _;

    const A: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGq3cM4iu2g5n5dC8dYkC4S4m0aTyyCNu7lGq3sWw1zQ a";
    const B: &str = "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAAAgQC7 b";

    #[test]
    fn pass_through_is_byte_identical() {
        let text = format!("# keys\n\n{A}\nno-pty   {B}\ngarbage line\n");
        let result = rewrite(&text, |k| Some(k.clone()), Vec::new);
        assert!(!result.changed);
        assert_eq!(result.text, text);
    }

    #[test]
    fn edit_removes_and_rewrites() {
        let text = format!("{A}\n{B}\n");
        let result = rewrite(
            &text,
            |k| {
                (k.algorithm == "ssh-ed25519").then(|| Key {
                    comment: "renamed".to_string(),
                    ..k.clone()
                })
            },
            Vec::new,
        );
        assert!(result.changed);
        assert_eq!(
            result.text,
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGq3cM4iu2g5n5dC8dYkC4S4m0aTyyCNu7lGq3sWw1zQ renamed\n"
        );
    }

    #[test]
    fn append_to_missing_file_creates_private_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("home/u/.ssh/authorized_keys");
        let key = Key::parse(A).unwrap();

        let written = process(&path, None, |k| Some(k.clone()), || vec![key.clone()]).unwrap();
        assert!(written);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{A}\n"));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o7777;
        assert_eq!(dir_mode, 0o700);

        let again = process(&path, None, |k| Some(k.clone()), Vec::new).unwrap();
        assert!(!again);
    }

    #[test]
    fn fragments_must_be_valid() {
        let keys = parse_keys(Path::new("x.pub"), &format!("# c\n{A}\n\n{B}\n")).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(parse_keys(Path::new("x.pub"), "nonsense here\n").is_err());
    }
}
