//! Core logging types: entity entries, status, and the [`Log`] trait.

/// Per-entity outcome recorded by the frontend while dispatching `apply`.
#[derive(Debug, Clone)]
pub struct EntityEntry {
    /// Entity ID (`file:/etc/x`, `user:j`, ...).
    pub id: String,
    /// Final status of the entity.
    pub status: EntityStatus,
    /// Optional detail message (error description, refused force hint).
    pub message: Option<String>,
}

/// Outcome of applying one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// The plugin changed the live state.
    Changed,
    /// The live state already matched; nothing was written.
    Unchanged,
    /// The plugin refused to act without `--force`.
    NeedsForce,
    /// The plugin failed for this entity.
    Failed,
}

/// Abstraction over logging backends.
///
/// Reconcilers and command handlers log through this trait so that tests can
/// inspect recorded outcomes without installing a global subscriber.
pub trait Log: Send + Sync {
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (suppressed on console unless verbose).
    fn debug(&self, msg: &str);
    /// Log a warning message (`>> ` prefix on the console).
    fn warn(&self, msg: &str);
    /// Log an error message (`!! ` prefix on the console).
    fn error(&self, msg: &str);
    /// Record an entity result for the exit code.
    fn record_entity(&self, id: &str, status: EntityStatus, message: Option<&str>);
}
