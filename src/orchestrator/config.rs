//! Parsing of `<root>/etc/holorc`.
//!
//! ```text
//! # comment
//! plugin files
//! plugin custom=/usr/local/bin/my-plugin
//! ```
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};

/// One configured plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    /// Plugin ID.
    pub id: String,
    /// Explicit executable, if given.
    pub executable: Option<PathBuf>,
}

impl PluginSpec {
    /// The executable to run: the explicit one, else `holo-<id>` next to the
    /// running binary, else `holo-<id>` from `PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if no executable can be found.
    pub fn resolve_executable(&self, root: &Path) -> Result<PathBuf> {
        if let Some(exe) = &self.executable {
            return Ok(root.join(exe.strip_prefix("/").unwrap_or(exe)));
        }
        let name = format!("holo-{}", self.id);
        if let Ok(current) = std::env::current_exe()
            && let Some(dir) = current.parent()
        {
            let sibling = dir.join(&name);
            if sibling.is_file() {
                return Ok(sibling);
            }
        }
        which::which(&name).with_context(|| format!("cannot find plugin executable {name}"))
    }
}

/// Path of the configuration file below `root`.
#[must_use]
pub fn holorc_path(root: &Path) -> PathBuf {
    root.join("etc/holorc")
}

/// Load the plugin list from `<root>/etc/holorc`.
///
/// # Errors
///
/// Returns an error if the file is missing or malformed.
pub fn load(root: &Path) -> Result<Vec<PluginSpec>> {
    let path = holorc_path(root);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Parse holorc contents.
///
/// # Errors
///
/// Returns an error naming the line of the first unknown directive,
/// malformed plugin line, or duplicate plugin ID.
pub fn parse(text: &str) -> Result<Vec<PluginSpec>> {
    let mut plugins = Vec::<PluginSpec>::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(arg) = line.strip_prefix("plugin ") else {
            bail!("line {line_no}: unknown directive {line:?}");
        };
        let arg = arg.trim();
        let (id, executable) = match arg.split_once('=') {
            Some((id, exe)) => (id.trim(), Some(PathBuf::from(exe.trim()))),
            None => (arg, None),
        };
        if id.is_empty() || id.contains(char::is_whitespace) || id.contains('/') {
            bail!("line {line_no}: invalid plugin ID {id:?}");
        }
        if executable.as_ref().is_some_and(|e| e.as_os_str().is_empty()) {
            bail!("line {line_no}: empty executable path for plugin {id}");
        }
        if plugins.iter().any(|p| p.id == id) {
            bail!("line {line_no}: plugin {id} configured twice");
        }
        plugins.push(PluginSpec {
            id: id.to_string(),
            executable,
        });
    }
    Ok(plugins)
}
