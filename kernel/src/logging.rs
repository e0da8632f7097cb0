//! Kernel logging facility
//!
//! Provides thread-safe logging for the memory manager using the `log` crate.
//! Log levels are configured based on build configuration (debug/release).

use log::{LevelFilter, Log, Metadata, Record};

/// Global logger instance available throughout the kernel
pub static LOGGER: Logger = Logger;

/// Writes every record to the serial console; the console lock keeps
/// lines from different threads apart.
pub struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    /// Formats messages as "[LEVEL] message"
    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::serial_println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Initializes the logging system
///
/// # Notes
/// * Sets different log levels for debug/release builds:
///   - Debug builds: LevelFilter::Debug
///   - Release builds: LevelFilter::Info
/// * Safe to call more than once; only the first call installs the logger
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(
            #[cfg(debug_assertions)]
            LevelFilter::Debug,
            #[cfg(not(debug_assertions))]
            LevelFilter::Info,
        );
    }
}
