//! `holo diff`: unified diffs between declared and live state.
use std::io::Write;
use std::path::Path;

use anyhow::{Result, bail};

use super::Context;
use crate::exec::Executor;
use crate::logging::strip_ansi;
use crate::orchestrator::ScannedEntity;
use crate::plugin::DiffPair;

/// Unified diff from the expected to the actual state of one entity, with
/// temporary paths replaced by `label`. Empty if both sides are equal.
///
/// # Errors
///
/// Returns an error if `git` is missing or fails.
pub fn render_diff(pair: &DiffPair, label: &str, color: bool, exec: &dyn Executor) -> Result<String> {
    if !exec.which("git") {
        bail!("git is required to render diffs");
    }
    let expected = pair.expected.display().to_string();
    let actual = pair.actual.display().to_string();
    let color_arg = if color { "--color=always" } else { "--color=never" };
    let result = exec.run_unchecked(
        "git",
        &["diff", "--no-index", color_arg, "--", &expected, &actual],
    )?;
    // Exit code 1 means "differences found".
    if !matches!(result.code, Some(0 | 1)) {
        bail!("git diff failed: {}", result.stderr.trim());
    }
    Ok(postprocess(&result.stdout, &[&expected, &actual], label))
}

/// Drop `index` lines and replace each of `paths` (as git prints them,
/// without the leading slash) by `label`.
fn postprocess(output: &str, paths: &[&str], label: &str) -> String {
    let mut out = String::with_capacity(output.len());
    for line in output.lines() {
        if strip_ansi(line).starts_with("index ") {
            continue;
        }
        let mut line = line.to_string();
        for path in paths.iter().filter(|p| **p != "/dev/null") {
            line = line.replace(path.trim_start_matches('/'), label);
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Name shown in diff headers: the target path below the root, or the
/// entity ID when the entity does not exist live.
#[must_use]
pub fn diff_label(entity_id: &str, pair: &DiffPair, root: &Path) -> String {
    if pair.actual != Path::new("/dev/null")
        && let Ok(relative) = pair.actual.strip_prefix(root)
    {
        return relative.display().to_string();
    }
    entity_id.to_string()
}

/// Ask the entity's plugin for a diff pair and render it. `None` if the
/// plugin does not support diffing the entity.
///
/// # Errors
///
/// Returns an error if the plugin fails or the diff cannot be rendered.
pub fn entity_diff(
    ctx: &Context<'_>,
    scanned: &ScannedEntity<'_>,
    color: bool,
) -> Result<Option<String>> {
    let output = scanned.plugin.diff(&scanned.entity.id)?;
    if !output.success {
        bail!(
            "plugin {} failed to diff {}:\n{}",
            scanned.plugin.id,
            scanned.entity.id,
            output.stderr.trim_end()
        );
    }
    let Some(pair) = output.diff_pair()? else {
        return Ok(None);
    };
    let label = diff_label(&scanned.entity.id, &pair, ctx.session.root());
    render_diff(&pair, &label, color, ctx.exec).map(Some)
}

/// Run `holo diff`.
///
/// # Errors
///
/// Returns an error if scanning fails or output cannot be written.
pub fn run(ctx: &Context<'_>, out: &mut dyn Write) -> Result<i32> {
    let color = crate::logging::stdout_color();
    let mut failed = false;
    for scanned in ctx.session.select(&ctx.selectors)? {
        match entity_diff(ctx, &scanned, color) {
            Ok(Some(diff)) => out.write_all(diff.as_bytes())?,
            Ok(None) => ctx
                .log
                .debug(&format!("{} does not support diffing", scanned.entity.id)),
            Err(e) => {
                ctx.log.error(&format!("{}: {e:#}", scanned.entity.id));
                failed = true;
            }
        }
    }
    out.flush()?;
    Ok(ctx.selector_exit_code(i32::from(failed)))
}
