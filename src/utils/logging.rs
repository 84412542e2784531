//! Logging setup and module-gated logging macros.
//!
//! Modules with noisy paths (the scan session, the camera pump) define a
//! local `ENABLE_LOGS` flag and log through these macros so they can be
//! silenced without touching `RUST_LOG`:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info};
//!
//! log_info!("camera started");
//! ```

use env_logger::Env;

/// Initialise `env_logger` once. `RUST_LOG` wins when set; otherwise the
/// crate logs at info, or debug when `verbose` is on.
pub fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if verbose && std::env::var_os("RUST_LOG").is_none() {
        builder.filter_module("gatescan_lib", log::LevelFilter::Debug);
    }
    // A second call (tests, re-entry from the shell) keeps the first logger.
    let _ = builder.try_init();
}

/// Debug logging gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Info logging gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn logging gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Error logging gated on the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
