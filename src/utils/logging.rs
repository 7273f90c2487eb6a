//! Tagged logging macros gated by a module-level `ENABLE_LOGS` flag, plus the
//! process-wide logger setup.
//!
//! Each module that uses the macros defines both constants:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TAG: &str = "[DB]";
//!
//! use crate::log_info;
//! log_info!("Saved {} settings", count);
//! ```
//! The tag is prepended to every line so database, save and import traffic can
//! be told apart when grepping a device log.

/// Conditional debug logging with the module's `LOG_TAG` prefix.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!("{} {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Conditional info logging with the module's `LOG_TAG` prefix.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!("{} {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Conditional warn logging with the module's `LOG_TAG` prefix.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!("{} {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Conditional error logging with the module's `LOG_TAG` prefix.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!("{} {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Initialize `env_logger` (reads `RUST_LOG`, falling back to info or debug).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(debug: bool) {
    let default_level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .try_init();
}
