//! Kernel print utilities.
//!
//! The console is the host's standard output. Leveled messages go through the
//! [`log`] facade; [`init`] installs the console as its backend.

use crate::QUIET;
use core::sync::atomic::Ordering;
use log::{Level, LevelFilter, Log, Metadata, Record};

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    std::print!("{fmt}");
}

struct Console;

impl Log for Console {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level() && !QUIET.load(Ordering::SeqCst)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        _print(format_args!("[{tag}] {}\n", record.args()));
    }

    fn flush(&self) {}
}

static CONSOLE: Console = Console;

/// Installs the console as the backend of the [`log`] facade and sets the
/// maximum level.
///
/// The backend is installed once per host process; later calls only adjust
/// the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&CONSOLE);
    log::set_max_level(level);
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the standard output.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the standard output.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ($crate::__log::info!($($arg)*));
}

/// Display a warning message.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => ($crate::__log::warn!($($arg)*));
}

/// Display a debug message.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => ($crate::__log::debug!($($arg)*));
}
