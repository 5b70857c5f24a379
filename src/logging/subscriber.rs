//! Tracing subscriber setup: the Holo console formatter and initialisation.
use std::fmt::Write as _;

/// Extracts the `message` field from a [`tracing::Event`].
#[derive(Default)]
struct MessageExtractor {
    message: String,
}

impl tracing::field::Visit for MessageExtractor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

/// A [`tracing_subscriber::fmt::FormatEvent`] that emits Holo-style
/// diagnostics: `!! ` for errors, `>> ` for warnings.
///
/// Multi-line messages get the prefix on every line so that the frontend
/// can colourise plugin stderr line by line.
#[derive(Debug, Clone, Copy)]
pub(super) struct HoloFormatter {
    pub(super) color: bool,
}

impl HoloFormatter {
    pub(super) fn render(self, level: tracing::Level, msg: &str) -> String {
        let (prefix, open) = match level {
            tracing::Level::ERROR => ("!! ", "\x1b[1;31m"),
            tracing::Level::WARN => (">> ", "\x1b[1;33m"),
            tracing::Level::INFO => ("", ""),
            _ => ("", "\x1b[2m"),
        };
        let mut out = String::new();
        for line in msg.lines() {
            if self.color && !open.is_empty() {
                writeln!(out, "{open}{prefix}{line}\x1b[0m").ok();
            } else {
                writeln!(out, "{prefix}{line}").ok();
            }
        }
        if out.is_empty() {
            out.push_str(prefix.trim_end());
            out.push('\n');
        }
        out
    }
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for HoloFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let mut extractor = MessageExtractor::default();
        event.record(&mut extractor);
        write!(writer, "{}", self.render(*event.metadata().level(), &extractor.message))
    }
}

/// Whether debug output was requested through the environment.
fn debug_from_env() -> bool {
    std::env::var("HOLO_DEBUG").is_ok_and(|v| !v.is_empty() && v != "0")
}

/// Initialise the global [`tracing`] subscriber.
///
/// All output goes to stderr; stdout is reserved for scan reports and
/// rendered entity output. Debug events are shown when `verbose` is set or
/// `HOLO_DEBUG` is non-empty and not `0`. Calling this more than once is
/// harmless (later calls are ignored).
pub fn init_subscriber(verbose: bool) {
    use tracing_subscriber::{
        Layer as _, filter::LevelFilter, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let level = if verbose || debug_from_env() {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let console_layer = fmt::layer()
        .event_format(HoloFormatter {
            color: super::utils::stderr_color(),
        })
        .with_writer(std::io::stderr)
        .with_filter(level);

    tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .ok();
}
