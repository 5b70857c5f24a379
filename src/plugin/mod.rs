//! The plugin protocol: scan reports, the plugin-side dispatcher, and the
//! frontend-side process host.
pub mod host;
pub mod protocol;
pub mod report;

pub use host::{PluginHandle, PluginOutput};
pub use protocol::{DiffPair, Plugin, ResourceChange, Status, StatusChannel};
pub use report::{DEFAULT_ACTION, ScanEntity, parse_report, render_report};
