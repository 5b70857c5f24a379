//! Structured logger with per-entity outcome collection.
use std::sync::Mutex;

use super::types::{EntityEntry, EntityStatus, Log};

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
///
/// The `record_entity` method is **not** included because its signature
/// differs from the `fn(&self, &str)` pattern shared by the display methods.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Logger that forwards messages to [`tracing`] and collects entity outcomes.
///
/// The frontend derives its exit code from [`Logger::failure_count`].
#[derive(Debug, Default)]
pub struct Logger {
    entities: Mutex<Vec<EntityEntry>>,
}

impl Logger {
    /// Create a new logger with no recorded outcomes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a clone of all recorded entity entries.
    #[must_use]
    pub fn entries(&self) -> Vec<EntityEntry> {
        self.entities.lock().map_or_else(|_| vec![], |g| g.clone())
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed unless verbose).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Record an entity result.
    pub fn record_entity(&self, id: &str, status: EntityStatus, message: Option<&str>) {
        if let Ok(mut guard) = self.entities.lock() {
            guard.push(EntityEntry {
                id: id.to_string(),
                status,
                message: message.map(String::from),
            });
        }
    }

    /// Count entities that failed or were refused for lack of `--force`.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.entities.lock().map_or(0, |guard| {
            guard
                .iter()
                .filter(|e| matches!(e.status, EntityStatus::Failed | EntityStatus::NeedsForce))
                .count()
        })
    }

    /// Return `true` if any recorded entity failed or needs `--force`.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }
}

impl Log for Logger {
    forward_log_methods!(info, debug, warn, error);

    fn record_entity(&self, id: &str, status: EntityStatus, message: Option<&str>) {
        self.record_entity(id, status, message);
    }
}
