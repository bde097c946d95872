//! Logging utilities built on the standard log facade

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
pub fn init() {
    env_logger::init();
}

/// Initialize the logging system, tolerating repeated calls (embedding hosts
/// may not know whether a logger is already installed)
pub fn try_init() {
    let _ = env_logger::try_init();
}
