//! Package-manager adapter.
//!
//! Given a target path, find out whether the system package manager has
//! deposited an updated stock version next to it (`.pacnew`, `.rpmnew`,
//! `.dpkg-dist`, `.apk-new`) and which backup sidecars should be cleaned up
//! once the target is no longer managed.
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::HoloError;

/// Package-manager family of the running distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Arch Linux and derivatives.
    Pacman,
    /// Fedora, RHEL, openSUSE and derivatives.
    Rpm,
    /// Debian, Ubuntu and derivatives.
    Dpkg,
    /// Alpine Linux.
    Apk,
    /// Anything else: no sidecar handling at all.
    Generic,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pacman => write!(f, "pacman"),
            Self::Rpm => write!(f, "rpm"),
            Self::Dpkg => write!(f, "dpkg"),
            Self::Apk => write!(f, "apk"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// Where an updated stock version currently lives, and how to report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedBase {
    /// Path holding the updated content.
    pub actual: PathBuf,
    /// Human-readable description for scan output and logs.
    pub reported: String,
}

impl Platform {
    /// Detect the platform for the filesystem below `root`.
    ///
    /// `distribution` (the value of `HOLO_CURRENT_DISTRIBUTION`) wins when it
    /// names a known distribution; otherwise `<root>/etc/os-release` and then
    /// `<root>/usr/lib/os-release` are consulted.
    #[must_use]
    pub fn detect(root: &Path, distribution: Option<&str>) -> Self {
        if let Some(id) = distribution
            && let Some(platform) = Self::from_distribution_id(id)
        {
            return platform;
        }
        ["etc/os-release", "usr/lib/os-release"]
            .iter()
            .find_map(|rel| fs::read_to_string(root.join(rel)).ok())
            .map_or(Self::Generic, |content| Self::from_os_release(&content))
    }

    /// Pick a platform from the contents of an `os-release` file.
    ///
    /// `ID` is tried first, then every token of `ID_LIKE` in order.
    #[must_use]
    pub fn from_os_release(content: &str) -> Self {
        let mut id = None;
        let mut id_like = None;
        for line in content.lines() {
            if let Some((key, value)) = line.trim().split_once('=') {
                let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
                match key {
                    "ID" => id = Some(value.to_string()),
                    "ID_LIKE" => id_like = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        id.as_deref()
            .and_then(Self::from_distribution_id)
            .or_else(|| {
                id_like
                    .as_deref()?
                    .split_whitespace()
                    .find_map(Self::from_distribution_id)
            })
            .unwrap_or(Self::Generic)
    }

    /// Map a distribution ID (as in `os-release`) to a platform.
    #[must_use]
    pub fn from_distribution_id(id: &str) -> Option<Self> {
        match id {
            "arch" | "archlinux" | "manjaro" | "endeavouros" => Some(Self::Pacman),
            "fedora" | "rhel" | "centos" | "rocky" | "almalinux" | "suse" | "opensuse"
            | "opensuse-leap" | "opensuse-tumbleweed" | "mageia" => Some(Self::Rpm),
            "debian" | "ubuntu" | "linuxmint" | "raspbian" => Some(Self::Dpkg),
            "alpine" => Some(Self::Apk),
            "generic" | "unittest" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Locate an updated stock version for `target`, if the package manager
    /// left one behind.
    ///
    /// For rpm and dpkg, a backup of the custom version (`.rpmsave`,
    /// `.dpkg-old`) means the package manager already replaced `target`
    /// with the new stock version. Both files are swapped back first so that
    /// `target` holds the custom version again and the stock version ends up
    /// in the `.rpmnew`/`.dpkg-dist` sidecar. This moves files, so it must
    /// run before `target` is inspected.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::Io`] if a sidecar cannot be inspected or moved.
    pub fn find_updated_base(self, target: &Path) -> Result<Option<UpdatedBase>, HoloError> {
        let (new_suffix, save_suffix) = match self {
            Self::Pacman => (".pacnew", None),
            Self::Rpm => (".rpmnew", Some(".rpmsave")),
            Self::Dpkg => (".dpkg-dist", Some(".dpkg-old")),
            Self::Apk => (".apk-new", None),
            Self::Generic => return Ok(None),
        };
        let new_path = with_suffix(target, new_suffix);

        if let Some(save_suffix) = save_suffix {
            let save_path = with_suffix(target, save_suffix);
            if is_manageable(&save_path)? {
                fs::rename(target, &new_path).map_err(|e| HoloError::io(target, e))?;
                fs::rename(&save_path, target).map_err(|e| HoloError::io(&save_path, e))?;
                return Ok(Some(UpdatedBase {
                    actual: new_path,
                    reported: format!("{} (with {save_suffix})", target.display()),
                }));
            }
        }

        if is_manageable(&new_path)? {
            let reported = new_path.display().to_string();
            return Ok(Some(UpdatedBase {
                actual: new_path,
                reported,
            }));
        }
        Ok(None)
    }

    /// List sidecars to delete when `target` is scrubbed and already gone.
    ///
    /// Only pacman leaves such files: `.pacsave` and numbered
    /// `.pacsave.<n>` backups.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::Io`] if the parent directory cannot be read.
    pub fn additional_cleanup(self, target: &Path) -> Result<Vec<PathBuf>, HoloError> {
        if self != Self::Pacman {
            return Ok(Vec::new());
        }
        let (Some(dir), Some(name)) = (target.parent(), target.file_name()) else {
            return Ok(Vec::new());
        };
        let plain = format!("{}.pacsave", name.to_string_lossy());
        let numbered = format!("{plain}.");

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HoloError::io(dir, e)),
        };

        let mut result = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HoloError::io(dir, e))?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let matches = *file_name == plain
                || file_name.strip_prefix(&numbered).is_some_and(|n| {
                    !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())
                });
            if matches && is_manageable(&entry.path())? {
                result.push(entry.path());
            }
        }
        result.sort();
        Ok(result)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// `true` if `path` exists and is a regular file or symlink.
fn is_manageable(path: &Path) -> Result<bool, HoloError> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(meta.file_type().is_file() || meta.file_type().is_symlink()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(HoloError::io(path, e)),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn os_release_id_wins() {
        let content = "NAME=\"Arch Linux\"\nID=arch\n";
        assert_eq!(Platform::from_os_release(content), Platform::Pacman);
    }

    #[test]
    fn os_release_falls_back_to_id_like() {
        let content = "ID=\"pop\"\nID_LIKE=\"ubuntu debian\"\n";
        assert_eq!(Platform::from_os_release(content), Platform::Dpkg);
    }

    #[test]
    fn os_release_unknown_is_generic() {
        assert_eq!(Platform::from_os_release("ID=plan9\n"), Platform::Generic);
        assert_eq!(Platform::from_os_release(""), Platform::Generic);
    }

    #[test]
    fn detect_prefers_override() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("etc")).unwrap();
        fs::write(root.path().join("etc/os-release"), "ID=fedora\n").unwrap();
        assert_eq!(Platform::detect(root.path(), None), Platform::Rpm);
        assert_eq!(Platform::detect(root.path(), Some("alpine")), Platform::Apk);
        assert_eq!(
            Platform::detect(root.path(), Some("nonsense")),
            Platform::Rpm,
            "unknown override should fall back to os-release"
        );
    }

    #[test]
    fn pacnew_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x");
        fs::write(&target, "A\n").unwrap();
        assert_eq!(Platform::Pacman.find_updated_base(&target).unwrap(), None);

        fs::write(dir.path().join("x.pacnew"), "A2\n").unwrap();
        let found = Platform::Pacman.find_updated_base(&target).unwrap().unwrap();
        assert_eq!(found.actual, dir.path().join("x.pacnew"));
    }

    #[test]
    fn directory_sidecar_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x");
        fs::create_dir(dir.path().join("x.apk-new")).unwrap();
        assert_eq!(Platform::Apk.find_updated_base(&target).unwrap(), None);
    }

    #[test]
    fn rpmsave_is_swapped_back() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x");
        fs::write(&target, "stock\n").unwrap();
        fs::write(dir.path().join("x.rpmsave"), "custom\n").unwrap();

        let found = Platform::Rpm.find_updated_base(&target).unwrap().unwrap();
        assert_eq!(found.actual, dir.path().join("x.rpmnew"));
        assert!(found.reported.ends_with("x (with .rpmsave)"));
        assert_eq!(fs::read_to_string(&target).unwrap(), "custom\n");
        assert_eq!(fs::read_to_string(&found.actual).unwrap(), "stock\n");
        assert!(!dir.path().join("x.rpmsave").exists());
    }

    #[test]
    fn dpkg_dist_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x");
        fs::write(dir.path().join("x.dpkg-dist"), "new\n").unwrap();
        let found = Platform::Dpkg.find_updated_base(&target).unwrap().unwrap();
        assert_eq!(found.actual, dir.path().join("x.dpkg-dist"));
    }

    #[test]
    fn generic_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x");
        fs::write(dir.path().join("x.pacnew"), "new\n").unwrap();
        assert_eq!(Platform::Generic.find_updated_base(&target).unwrap(), None);
        assert!(Platform::Generic.additional_cleanup(&target).unwrap().is_empty());
    }

    #[test]
    fn pacsave_cleanup_lists_numbered_backups() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x");
        for name in ["x.pacsave", "x.pacsave.1", "x.pacsave.12", "x.pacsave.a", "y.pacsave"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let cleanup = Platform::Pacman.additional_cleanup(&target).unwrap();
        let names: Vec<_> = cleanup
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["x.pacsave", "x.pacsave.1", "x.pacsave.12"]);
        assert!(Platform::Rpm.additional_cleanup(&target).unwrap().is_empty());
    }

    #[test]
    fn display_names() {
        assert_eq!(Platform::Pacman.to_string(), "pacman");
        assert_eq!(Platform::Generic.to_string(), "generic");
    }
}
