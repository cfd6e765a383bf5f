//! Tracing setup.
//!
//! The terminal belongs to the UI, so events go to a log file instead of
//! stderr. `DEVCLASS_LOG` takes the usual filter directives
//! (e.g. "debug" or "info,devclass::session=debug").

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "DEVCLASS_LOG";

/// Install the global subscriber writing to `log_path`.
///
/// Returns false when the file cannot be opened; logging then stays off.
pub fn init_tracing(log_path: &Path) -> bool {
    if let Some(parent) = log_path.parent() {
        if std::fs::create_dir_all(parent).is_err() {
            return false;
        }
    }

    let file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => file,
        Err(_) => return false,
    };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .is_ok()
}
