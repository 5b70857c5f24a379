//! Scan reports: the paragraph-oriented text a plugin prints for `scan`.
//!
//! ```text
//! ENTITY: file:/etc/x
//! SOURCE: /usr/share/holo/files/10-foo/etc/x
//! store at: /var/lib/holo/files/base/etc/x
//!
//! ENTITY: file:/etc/y
//! ACTION: Scrubbing (all repository files were deleted)
//! ```
use std::fmt::Write as _;
use std::iter::Peekable;
use std::str::Lines;

use crate::error::HoloError;

/// Action verb used when a paragraph has no `ACTION` line.
pub const DEFAULT_ACTION: &str = "Working on";

/// Metadata for one entity, as reported by a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntity {
    /// Entity ID.
    pub id: String,
    /// Action verb (`Working on`, `Scrubbing`, ...).
    pub action_verb: String,
    /// Optional reason shown in parentheses after the verb.
    pub action_reason: Option<String>,
    /// Source paths contributing to this entity.
    pub sources: Vec<String>,
    /// Additional `(key, value)` lines, in order.
    pub info: Vec<(String, String)>,
}

impl ScanEntity {
    /// A new entity with the default action and no sources.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_verb: DEFAULT_ACTION.to_string(),
            action_reason: None,
            sources: Vec::new(),
            info: Vec::new(),
        }
    }

    /// Set the action verb and reason.
    #[must_use]
    pub fn with_action(mut self, verb: impl Into<String>, reason: Option<&str>) -> Self {
        self.action_verb = verb.into();
        self.action_reason = reason.map(String::from);
        self
    }

    /// Append a source path.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Append an info line.
    #[must_use]
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.push((key.into(), value.into()));
        self
    }

    /// Whether `selector` names this entity by ID or by one of its sources.
    #[must_use]
    pub fn matches(&self, selector: &str) -> bool {
        self.id == selector || self.sources.iter().any(|s| s == selector)
    }

    /// Render the protocol paragraph for this entity (no trailing blank line).
    #[must_use]
    pub fn to_protocol(&self) -> String {
        let mut out = String::new();
        writeln!(out, "ENTITY: {}", self.id).ok();
        match &self.action_reason {
            Some(reason) => {
                writeln!(out, "ACTION: {} ({reason})", self.action_verb).ok();
            }
            None if self.action_verb != DEFAULT_ACTION => {
                writeln!(out, "ACTION: {}", self.action_verb).ok();
            }
            None => {}
        }
        for source in &self.sources {
            writeln!(out, "SOURCE: {source}").ok();
        }
        for (key, value) in &self.info {
            writeln!(out, "{key}: {value}").ok();
        }
        out
    }

    /// Render the human-readable form used by `holo scan` and `holo apply`.
    #[must_use]
    pub fn to_human(&self) -> String {
        let mut out = String::new();
        match &self.action_reason {
            Some(reason) => writeln!(out, "{} {} ({reason})", self.action_verb, self.id).ok(),
            None => writeln!(out, "{} {}", self.action_verb, self.id).ok(),
        };
        for source in &self.sources {
            writeln!(out, "    found at {source}").ok();
        }
        for (key, value) in &self.info {
            writeln!(out, "    {key}: {value}").ok();
        }
        out
    }
}

/// Render a complete scan report: paragraphs separated by blank lines.
#[must_use]
pub fn render_report(entities: &[ScanEntity]) -> String {
    entities
        .iter()
        .map(ScanEntity::to_protocol)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lazy parser over a scan report, yielding one entity per paragraph.
///
/// Stops after the first error.
#[derive(Debug)]
pub struct ReportParser<'a> {
    lines: Peekable<std::iter::Enumerate<Lines<'a>>>,
    plugin_id: &'a str,
    failed: bool,
}

/// Parse the scan report printed by plugin `plugin_id`.
#[must_use]
pub fn parse_report<'a>(plugin_id: &'a str, text: &'a str) -> ReportParser<'a> {
    ReportParser {
        lines: text.lines().enumerate().peekable(),
        plugin_id,
        failed: false,
    }
}

impl ReportParser<'_> {
    fn error(&mut self, line_no: usize, reason: &str) -> HoloError {
        self.failed = true;
        HoloError::PluginProtocol(format!(
            "scan report of plugin {}, line {}: {reason}",
            self.plugin_id,
            line_no + 1
        ))
    }

    fn parse_entity(&mut self, line_no: usize, id: &str) -> Result<ScanEntity, HoloError> {
        if id.is_empty() {
            return Err(self.error(line_no, "empty entity ID"));
        }
        let mut entity = ScanEntity::new(id);

        while let Some((line_no, line)) = self.lines.peek().copied() {
            if line.trim().is_empty() || line.starts_with("ENTITY:") {
                break;
            }
            self.lines.next();
            let Some((key, value)) = line.split_once(':') else {
                return Err(self.error(line_no, &format!("expected \"KEY: value\", got {line:?}")));
            };
            let value = value.trim();
            match key.trim() {
                "SOURCE" => entity.sources.push(value.to_string()),
                "ACTION" => {
                    let (verb, reason) = parse_action(value);
                    entity.action_verb = verb.to_string();
                    entity.action_reason = reason.map(String::from);
                }
                other => entity.info.push((other.to_string(), value.to_string())),
            }
        }
        Ok(entity)
    }
}

/// Split `verb (reason)` into its parts.
fn parse_action(value: &str) -> (&str, Option<&str>) {
    if let Some(inner) = value.strip_suffix(')')
        && let Some((verb, reason)) = inner.split_once(" (")
    {
        return (verb.trim(), Some(reason));
    }
    (value, None)
}

impl Iterator for ReportParser<'_> {
    type Item = Result<ScanEntity, HoloError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let (line_no, line) = self.lines.next()?;
            if line.trim().is_empty() {
                continue;
            }
            return Some(match line.strip_prefix("ENTITY:") {
                Some(id) => self.parse_entity(line_no, id.trim()),
                None => Err(self.error(line_no, &format!("expected \"ENTITY:\", got {line:?}"))),
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const REPORT: &str = "\
ENTITY: file:/etc/x
SOURCE: /usr/share/holo/files/10-a/etc/x
SOURCE: /usr/share/holo/files/20-b/etc/x.holoscript
store at: /var/lib/holo/files/base/etc/x


ENTITY: file:/etc/y
ACTION: Scrubbing (all repository files were deleted)
";

    #[test]
    fn parses_paragraphs() {
        let entities: Vec<_> = parse_report("files", REPORT)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, "file:/etc/x");
        assert_eq!(entities[0].action_verb, "Working on");
        assert_eq!(entities[0].sources.len(), 2);
        assert_eq!(
            entities[0].info,
            vec![(
                "store at".to_string(),
                "/var/lib/holo/files/base/etc/x".to_string()
            )]
        );
        assert_eq!(entities[1].action_verb, "Scrubbing");
        assert_eq!(
            entities[1].action_reason.as_deref(),
            Some("all repository files were deleted")
        );
    }

    #[test]
    fn consecutive_entity_lines_start_new_entities() {
        let entities: Vec<_> = parse_report("x", "ENTITY: a\nENTITY: b\n")
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entities.len(), 2);
    }

    #[test]
    fn garbage_stops_the_parser() {
        let mut parser = parse_report("files", "ENTITY: a\n\nnonsense\nENTITY: b\n");
        assert!(parser.next().unwrap().is_ok());
        let err = parser.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
        assert!(parser.next().is_none());
    }

    #[test]
    fn line_without_colon_is_an_error() {
        let mut parser = parse_report("files", "ENTITY: a\nno colon here\n");
        assert!(parser.next().unwrap().is_err());
    }

    #[test]
    fn render_then_parse_preserves_entities() {
        let entities = vec![
            ScanEntity::new("user:j")
                .with_source("/usr/share/holo/users-groups/01.toml")
                .with_info("uid", "1000"),
            ScanEntity::new("group:g").with_action("Scrubbing", Some("gone")),
        ];
        let text = render_report(&entities);
        let parsed: Vec<_> = parse_report("users-groups", &text)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(parsed, entities);
    }

    #[test]
    fn human_rendering() {
        let entity = ScanEntity::new("file:/etc/x")
            .with_source("/res/10-a/etc/x")
            .with_info("store at", "/state/base/etc/x");
        insta::assert_snapshot!(entity.to_human(), @r"
        Working on file:/etc/x
            found at /res/10-a/etc/x
            store at: /state/base/etc/x
        ");
    }

    #[test]
    fn matches_id_or_source() {
        let entity = ScanEntity::new("file:/etc/x").with_source("/res/10-a/etc/x");
        assert!(entity.matches("file:/etc/x"));
        assert!(entity.matches("/res/10-a/etc/x"));
        assert!(!entity.matches("/etc/x"));
    }
}
