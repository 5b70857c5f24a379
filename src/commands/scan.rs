//! `holo scan`: list entities in human, short, or porcelain form.
use std::io::Write;

use anyhow::Result;

use super::Context;
use crate::orchestrator::ScannedEntity;
use crate::plugin::{ScanEntity, render_report};

/// Output form of `holo scan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanFormat {
    /// Action line, sources, and info lines per entity.
    #[default]
    Human,
    /// One entity ID per line.
    Short,
    /// The plugin protocol report.
    Porcelain,
}

/// Render selected entities in `format`.
#[must_use]
pub fn render(entities: &[ScannedEntity<'_>], format: ScanFormat) -> String {
    match format {
        ScanFormat::Human => entities
            .iter()
            .map(|s| s.entity.to_human())
            .collect::<Vec<_>>()
            .join("\n"),
        ScanFormat::Short => entities
            .iter()
            .map(|s| format!("{}\n", s.entity.id))
            .collect(),
        ScanFormat::Porcelain => {
            let reports: Vec<ScanEntity> = entities.iter().map(|s| s.entity.clone()).collect();
            render_report(&reports)
        }
    }
}

/// Run `holo scan`.
///
/// # Errors
///
/// Returns an error if scanning fails or output cannot be written.
pub fn run(ctx: &Context<'_>, format: ScanFormat, out: &mut dyn Write) -> Result<i32> {
    let selected = ctx.session.select(&ctx.selectors)?;
    out.write_all(render(&selected, format).as_bytes())?;
    out.flush()?;
    Ok(ctx.selector_exit_code(0))
}
