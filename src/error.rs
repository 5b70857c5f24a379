//! Domain-specific error types for the Holo engine.
//!
//! Reconcilers, parsers and the plugin host return [`HoloError`] values where
//! a caller needs to branch on the failure kind (most notably the
//! `NeedForceTo*` variants, which are surfaced as status messages rather than
//! failures). Command handlers and plugin entry points carry them inside
//! [`anyhow::Error`] and recover the typed value with `downcast_ref`.
//!
//! # Error taxonomy
//!
//! ```text
//! HoloError
//! ├── NotManageable            target is neither regular file nor symlink
//! ├── UnexpectedTargetType     write target exists but is not manageable
//! ├── NeedForceToOverwrite     local modifications detected
//! ├── NeedForceToRestore       live file missing but a base exists
//! ├── MergeConflict            stacked declarations disagree
//! ├── InvalidDeclaration       malformed declaration file
//! ├── InvalidRegistryEntry     malformed /etc/passwd or /etc/group line
//! ├── PluginProtocol           scan report or API version mismatch
//! ├── ExternalTool             child process exited non-zero
//! ├── Io                       filesystem failure
//! ├── LockHeld                 another instance is running
//! └── Aggregate                several errors collected while scrubbing
//! ```

use std::path::Path;

use thiserror::Error;

/// Top-level error type for the Holo engine.
#[derive(Error, Debug)]
pub enum HoloError {
    /// The object at `path` is neither a regular file nor a symlink.
    #[error("{path} is not a manageable file")]
    NotManageable {
        /// Path of the offending object.
        path: String,
    },

    /// A write target exists but is not a regular file or symlink.
    #[error("cannot write {path}: target exists and is not a regular file or symlink")]
    UnexpectedTargetType {
        /// Path of the offending object.
        path: String,
    },

    /// The live state was modified since the last apply.
    #[error("{entity} has been modified by user (use --force to overwrite)")]
    NeedForceToOverwrite {
        /// Entity ID or target path.
        entity: String,
    },

    /// The live object is gone while a base version is still recorded.
    #[error("{entity} has been deleted by user (use --force to restore)")]
    NeedForceToRestore {
        /// Entity ID or target path.
        entity: String,
    },

    /// Two declarations (or a declaration and a recorded state) disagree.
    #[error("conflicting {field} for {id}: {a:?} vs. {b:?}")]
    MergeConflict {
        /// Name of the conflicting property.
        field: String,
        /// Entity ID.
        id: String,
        /// Value on the left-hand side of the merge.
        a: String,
        /// Value on the right-hand side of the merge.
        b: String,
    },

    /// A declaration file could not be parsed or violates the schema.
    #[error("invalid declaration in {path}: {reason}")]
    InvalidDeclaration {
        /// Path of the declaration file.
        path: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// A record in the user database is malformed.
    #[error("malformed entry in {path}, line {line}: {reason}")]
    InvalidRegistryEntry {
        /// Path of the database file.
        path: String,
        /// 1-based line number.
        line: usize,
        /// Human-readable explanation.
        reason: String,
    },

    /// A plugin produced output that violates the plugin protocol.
    #[error("plugin protocol violation: {0}")]
    PluginProtocol(String),

    /// An external program exited with a non-zero status.
    #[error("{program} failed (exit {exit_code}): {stderr}")]
    ExternalTool {
        /// Name of the program that was invoked.
        program: String,
        /// Exit code returned by the process (`-1` when killed by a signal).
        exit_code: i32,
        /// Captured standard error output.
        stderr: String,
    },

    /// A filesystem operation failed.
    #[error("{path}: {source}")]
    Io {
        /// Path the operation was acting on.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The run lock is held by another process.
    #[error("cannot create {path}: another instance of holo may be running")]
    LockHeld {
        /// Path of the lock file.
        path: String,
    },

    /// Several independent failures collected while finishing an operation.
    #[error("{}", join_messages(.0))]
    Aggregate(Vec<HoloError>),
}

impl HoloError {
    /// Wrap an I/O error together with the path it occurred on.
    #[must_use]
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Collapse a list of errors: `None` when empty, the sole error when there
    /// is exactly one, and [`HoloError::Aggregate`] otherwise.
    #[must_use]
    pub fn aggregate(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Return `true` for the variants that are reported as status messages
    /// instead of failures.
    #[must_use]
    pub const fn is_force_required(&self) -> bool {
        matches!(
            self,
            Self::NeedForceToOverwrite { .. } | Self::NeedForceToRestore { .. }
        )
    }

    /// Return `true` if `path` did not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

fn join_messages(errors: &[HoloError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
