//! In-memory snapshot of one manageable filesystem object.
use std::fmt;
use std::fs;
use std::os::unix::fs::{MetadataExt as _, PermissionsExt as _};
use std::path::{Path, PathBuf};

use crate::error::HoloError;

/// Permission bits preserved by a buffer (triads plus setuid/setgid/sticky).
const MODE_MASK: u32 = 0o7777;

/// Mode reported for every symlink buffer.
const SYMLINK_MODE: u32 = 0o777;

/// Contents of a [`FileBuffer`]: either file bytes or a link target.
#[derive(Clone, PartialEq, Eq)]
pub enum Payload {
    /// Contents of a regular file.
    Regular(Vec<u8>),
    /// Target of a symbolic link, verbatim.
    Symlink(PathBuf),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular(bytes) => write!(f, "Regular({:?})", String::from_utf8_lossy(bytes)),
            Self::Symlink(target) => write!(f, "Symlink({})", target.display()),
        }
    }
}

/// A regular file or symlink, held in memory.
///
/// Buffers are plain values: operations return a new buffer instead of
/// mutating in place. Equality ignores [`FileBuffer::path`] so that the
/// base, provisioned and current versions of one target compare directly.
#[derive(Debug, Clone)]
pub struct FileBuffer {
    /// Where this buffer was loaded from, or where it is meant to go.
    pub path: PathBuf,
    /// Permission bits. Always `0o777` for symlinks.
    pub mode: u32,
    /// Owner UID.
    pub uid: u32,
    /// Group GID.
    pub gid: u32,
    /// File contents or link target.
    pub payload: Payload,
}

impl PartialEq for FileBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.mode == other.mode
            && self.uid == other.uid
            && self.gid == other.gid
            && self.payload == other.payload
    }
}

impl Eq for FileBuffer {}

impl FileBuffer {
    /// An empty regular file at `path`, owned by root with mode `0o644`.
    #[must_use]
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: 0o644,
            uid: 0,
            gid: 0,
            payload: Payload::Regular(Vec::new()),
        }
    }

    /// Load the object at `path`.
    ///
    /// With `follow`, a symlink is resolved (relative targets against the
    /// link's directory) and the destination is returned as a buffer for
    /// `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::NotManageable`] if the object is neither a
    /// regular file nor a symlink, or [`HoloError::Io`] if it cannot be read
    /// (including when it does not exist).
    pub fn load(path: &Path, follow: bool) -> Result<Self, HoloError> {
        let meta = fs::symlink_metadata(path).map_err(|e| HoloError::io(path, e))?;
        let file_type = meta.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| HoloError::io(path, e))?;
            if follow {
                let resolved = match path.parent() {
                    Some(dir) if target.is_relative() => dir.join(&target),
                    _ => target,
                };
                let mut buffer = Self::load(&resolved, true)?;
                buffer.path = path.to_path_buf();
                return Ok(buffer);
            }
            return Ok(Self {
                path: path.to_path_buf(),
                mode: SYMLINK_MODE,
                uid: meta.uid(),
                gid: meta.gid(),
                payload: Payload::Symlink(target),
            });
        }

        if !file_type.is_file() {
            return Err(HoloError::NotManageable {
                path: path.display().to_string(),
            });
        }

        let contents = fs::read(path).map_err(|e| HoloError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            mode: meta.permissions().mode() & MODE_MASK,
            uid: meta.uid(),
            gid: meta.gid(),
            payload: Payload::Regular(contents),
        })
    }

    /// Like [`FileBuffer::load`], but a missing object yields `None`.
    ///
    /// # Errors
    ///
    /// See [`FileBuffer::load`].
    pub fn load_optional(path: &Path, follow: bool) -> Result<Option<Self>, HoloError> {
        match Self::load(path, follow) {
            Ok(buffer) => Ok(Some(buffer)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Return the same buffer, addressed to `path`.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Return a regular-file buffer with `contents`, keeping ownership.
    ///
    /// A symlink buffer becomes a regular file with mode `0o644`.
    #[must_use]
    pub fn with_contents(mut self, contents: Vec<u8>) -> Self {
        if self.is_symlink() {
            self.mode = 0o644;
        }
        self.payload = Payload::Regular(contents);
        self
    }

    /// Whether this buffer describes a symlink.
    #[must_use]
    pub const fn is_symlink(&self) -> bool {
        matches!(self.payload, Payload::Symlink(_))
    }

    /// File contents, or `None` for a symlink.
    #[must_use]
    pub fn contents(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Regular(bytes) => Some(bytes),
            Payload::Symlink(_) => None,
        }
    }

    /// Resolve a symlink buffer into a regular-file buffer for the same path.
    ///
    /// Regular-file buffers are returned unchanged. The link target is read
    /// from the live filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the link destination cannot be loaded.
    pub fn resolve_symlink(self) -> Result<Self, HoloError> {
        let Payload::Symlink(target) = &self.payload else {
            return Ok(self);
        };
        let resolved = match self.path.parent() {
            Some(dir) if target.is_relative() => dir.join(target),
            _ => target.clone(),
        };
        let loaded = Self::load(&resolved, true)?;
        Ok(Self {
            path: self.path,
            mode: loaded.mode,
            uid: self.uid,
            gid: self.gid,
            payload: loaded.payload,
        })
    }

    /// Write the buffer to `path`.
    ///
    /// An existing regular file or symlink at `path` is removed first; the
    /// new object is created, ownership applied, then the mode (regular
    /// files only).
    ///
    /// # Errors
    ///
    /// Returns [`HoloError::UnexpectedTargetType`] if `path` holds something
    /// other than a regular file or symlink, or [`HoloError::Io`] on any
    /// filesystem failure.
    pub fn write(&self, path: &Path) -> Result<(), HoloError> {
        match fs::symlink_metadata(path) {
            Ok(meta) => {
                let file_type = meta.file_type();
                if !file_type.is_file() && !file_type.is_symlink() {
                    return Err(HoloError::UnexpectedTargetType {
                        path: path.display().to_string(),
                    });
                }
                fs::remove_file(path).map_err(|e| HoloError::io(path, e))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(HoloError::io(path, e)),
        }

        match &self.payload {
            Payload::Regular(contents) => {
                fs::write(path, contents).map_err(|e| HoloError::io(path, e))?;
            }
            Payload::Symlink(target) => {
                std::os::unix::fs::symlink(target, path).map_err(|e| HoloError::io(path, e))?;
            }
        }

        // chown before chmod: changing ownership clears setuid/setgid bits.
        let meta = fs::symlink_metadata(path).map_err(|e| HoloError::io(path, e))?;
        if meta.uid() != self.uid || meta.gid() != self.gid {
            std::os::unix::fs::lchown(path, Some(self.uid), Some(self.gid))
                .map_err(|e| HoloError::io(path, e))?;
        }
        if !self.is_symlink() {
            fs::set_permissions(path, fs::Permissions::from_mode(self.mode))
                .map_err(|e| HoloError::io(path, e))?;
        }
        Ok(())
    }

    /// Replace `target` with this buffer without ever leaving it missing or
    /// half-written: the buffer goes to `<target>.holonew` first, which is
    /// then renamed over `target`.
    ///
    /// # Errors
    ///
    /// See [`FileBuffer::write`].
    pub fn write_atomic(&self, target: &Path) -> Result<(), HoloError> {
        let mut sidecar = target.as_os_str().to_os_string();
        sidecar.push(".holonew");
        let sidecar = PathBuf::from(sidecar);

        if let Some(meta) = fs::symlink_metadata(target).ok()
            && meta.is_dir()
        {
            return Err(HoloError::UnexpectedTargetType {
                path: target.display().to_string(),
            });
        }
        self.write(&sidecar)?;
        fs::rename(&sidecar, target).map_err(|e| HoloError::io(target, e))
    }
}
