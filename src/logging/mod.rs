//! Logging infrastructure: Holo-style console diagnostics on stderr.

mod logger;
mod subscriber;
mod types;
mod utils;

pub use logger::Logger;
pub use subscriber::init_subscriber;
pub use types::{EntityEntry, EntityStatus, Log};
pub use utils::{colorize_diagnostic, stderr_color, stdout_color, strip_ansi};
