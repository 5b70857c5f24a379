//! `holo apply`: reconcile entities and report per-entity outcomes.
use std::io::Write;

use anyhow::Result;

use super::Context;
use crate::logging::{EntityStatus, colorize_diagnostic, stdout_color};
use crate::orchestrator::ScannedEntity;
use crate::plugin::{PluginOutput, Status};

/// Classify a plugin's answer to `apply`.
#[must_use]
pub fn classify(output: &PluginOutput) -> (EntityStatus, Option<Status>) {
    let statuses = output.statuses();
    let force = statuses
        .iter()
        .copied()
        .find(|s| matches!(s, Status::RequiresForceToOverwrite | Status::RequiresForceToRestore));
    if !output.success {
        (EntityStatus::Failed, force)
    } else if force.is_some() {
        (EntityStatus::NeedsForce, force)
    } else if statuses.contains(&Status::NotChanged) {
        (EntityStatus::Unchanged, None)
    } else {
        (EntityStatus::Changed, None)
    }
}

fn apply_one(
    ctx: &Context<'_>,
    scanned: &ScannedEntity<'_>,
    force: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let color = stdout_color();
    let id = &scanned.entity.id;
    let output = match scanned.plugin.apply(id, force) {
        Ok(output) => output,
        Err(e) => {
            write!(out, "{}", scanned.entity.to_human())?;
            writeln!(out, "{}\n", colorize_diagnostic(&format!("!! {e:#}"), color))?;
            ctx.log.record_entity(id, EntityStatus::Failed, Some(&format!("{e:#}")));
            return Ok(());
        }
    };
    let (status, force_status) = classify(&output);

    let quiet = status == EntityStatus::Unchanged && output.stderr.trim().is_empty();
    if quiet && !ctx.verbose {
        ctx.log.record_entity(id, status, None);
        return Ok(());
    }

    write!(out, "{}", scanned.entity.to_human())?;
    for line in output.stderr.lines() {
        writeln!(out, "{}", colorize_diagnostic(line, color))?;
    }
    let message = match (status, force_status) {
        (EntityStatus::NeedsForce, Some(s)) => {
            let hint = format!("!! skipping entity: {}", s.as_line());
            writeln!(out, "{}", colorize_diagnostic(&hint, color))?;
            if s == Status::RequiresForceToOverwrite {
                match super::diff::entity_diff(ctx, scanned, color) {
                    Ok(Some(diff)) => out.write_all(diff.as_bytes())?,
                    Ok(None) => {}
                    Err(e) => ctx.log.warn(&format!("cannot show diff for {id}: {e:#}")),
                }
            }
            Some(s.as_line().to_string())
        }
        (EntityStatus::Failed, _) => Some(format!("plugin {} failed", scanned.plugin.id)),
        _ => None,
    };
    writeln!(out)?;
    ctx.log.record_entity(id, status, message.as_deref());
    Ok(())
}

/// Run `holo apply`.
///
/// # Errors
///
/// Returns an error if scanning fails or output cannot be written.
pub fn run(ctx: &Context<'_>, force: bool, out: &mut dyn Write) -> Result<i32> {
    for scanned in ctx.session.select(&ctx.selectors)? {
        apply_one(ctx, &scanned, force, out)?;
        out.flush()?;
    }

    let failures = ctx.log.failure_count();
    if failures > 0 {
        let refused = ctx
            .log
            .entries()
            .iter()
            .filter(|e| e.status == EntityStatus::NeedsForce)
            .count();
        if refused > 0 {
            ctx.log
                .warn(&format!("{refused} entities need --force; review the diffs above"));
        }
    }
    Ok(ctx.selector_exit_code(i32::from(failures > 0)))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn output(success: bool, fd3: &str) -> PluginOutput {
        PluginOutput {
            success,
            fd3: fd3.as_bytes().to_vec(),
            ..PluginOutput::default()
        }
    }

    #[test]
    fn classify_statuses() {
        assert_eq!(classify(&output(true, "")), (EntityStatus::Changed, None));
        assert_eq!(
            classify(&output(true, "not changed\n")),
            (EntityStatus::Unchanged, None)
        );
        assert_eq!(
            classify(&output(true, "requires --force to restore\n")),
            (
                EntityStatus::NeedsForce,
                Some(Status::RequiresForceToRestore)
            )
        );
        assert_eq!(classify(&output(false, "")), (EntityStatus::Failed, None));
    }
}
