//! Terminal helpers: ANSI stripping and colour detection.
use std::io::IsTerminal as _;

/// Strip ANSI escape sequences from a string.
///
/// Handles SGR sequences (ending in `m`) and other CSI sequences (ending
/// in any letter in the `@`..`~` range), so cursor movement, erase, etc.
/// are also stripped without consuming unrelated text.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if let Some(next) = chars.next()
                && next == '['
            {
                for inner in chars.by_ref() {
                    if ('@'..='~').contains(&inner) {
                        break;
                    }
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Whether colour output is wanted on `stream`.
///
/// `NO_COLOR` (any value) disables colour.
pub fn color_enabled(stream: &impl std::io::IsTerminal) -> bool {
    std::env::var_os("NO_COLOR").is_none() && stream.is_terminal()
}

/// Whether stderr should receive ANSI colour codes.
pub fn stderr_color() -> bool {
    color_enabled(&std::io::stderr())
}

/// Whether stdout should receive ANSI colour codes.
pub fn stdout_color() -> bool {
    color_enabled(&std::io::stdout())
}

/// Colourise one line of plugin stderr: `!! ` in red, `>> ` in yellow.
///
/// Lines without a recognised prefix, and every line when `color` is false,
/// are returned unchanged.
#[must_use]
pub fn colorize_diagnostic(line: &str, color: bool) -> String {
    if !color {
        return line.to_string();
    }
    if line.starts_with("!! ") {
        format!("\x1b[1;31m{line}\x1b[0m")
    } else if line.starts_with(">> ") {
        format!("\x1b[1;33m{line}\x1b[0m")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn strip_ansi_removes_colors() {
        assert_eq!(strip_ansi("\x1b[31m!! boom\x1b[0m"), "!! boom");
        assert_eq!(strip_ansi("no codes here"), "no codes here");
    }

    #[test]
    fn strip_ansi_handles_csi_sequences() {
        assert_eq!(strip_ansi("\x1b[2;5Htext"), "text");
        assert_eq!(strip_ansi("\x1b[Kworld"), "world");
        assert_eq!(strip_ansi("\x1bMtext"), "text");
    }

    #[test]
    fn strip_ansi_empty_string() {
        assert_eq!(strip_ansi(""), "");
    }

    #[test]
    fn colorize_marks_errors_and_warnings() {
        assert_eq!(
            colorize_diagnostic("!! broken", true),
            "\x1b[1;31m!! broken\x1b[0m"
        );
        assert_eq!(
            colorize_diagnostic(">> careful", true),
            "\x1b[1;33m>> careful\x1b[0m"
        );
        assert_eq!(colorize_diagnostic("plain", true), "plain");
    }

    #[test]
    fn colorize_is_noop_without_color() {
        assert_eq!(colorize_diagnostic("!! broken", false), "!! broken");
    }
}
