// Kernel Logging Subsystem
//
// Multi-level, timestamped log output for the interrupt layer and its
// drivers. Every entry carries a severity, a cycle timestamp and the
// subsystem origin; DEBUG entries also carry `file:line`.
//
// Key responsibilities:
// - Provide standardized log levels (Debug, Info, Warn, Error, Panic)
// - Drop entries below the configured level before any formatting work
// - Forward formatted entries to the serial sink
//
// Implementation details:
// - The level filter is a single atomic byte, readable from interrupt context
// - Timestamps are raw TSC cycles; there is no tick source at this layer
// - Convenience macros (`log_debug!`, `log_info!`, ...) wrap `_log` and
//   capture `file!()` / `line!()`
//
// Correctness and safety notes:
// - The serial sink masks interrupts while it holds the port, so logging
//   from a handler cannot interleave with a half-written line
// - The fatal path logs at `Panic` level, which is never filtered and never
//   waits for the serial lock

use crate::arch;
use crate::serial;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Panic = 4,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO ",
            LogLevel::Warn => "WARN ",
            LogLevel::Error => "ERROR",
            LogLevel::Panic => "PANIC",
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Panic,
        }
    }
}

static CURRENT_LOG_LEVEL: AtomicU8 = AtomicU8::new(crate::config::DEFAULT_LOG_LEVEL as u8);

pub fn set_level(level: LogLevel) {
    CURRENT_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn get_level() -> LogLevel {
    LogLevel::from_u8(CURRENT_LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn enabled(level: LogLevel) -> bool {
    level >= get_level()
}

pub fn _log(level: LogLevel, origin: &str, args: fmt::Arguments, file: &str, line: u32) {
    if !enabled(level) {
        return;
    }

    let cycles = arch::timestamp();

    // the fatal path may run while this CPU already holds the port
    let emit: fn(fmt::Arguments) = if level == LogLevel::Panic {
        serial::_print_unblocked
    } else {
        serial::_print
    };

    if level == LogLevel::Debug {
        emit(format_args!(
            "[tsc={:>14}] [{}] [{}] {} ({}:{})\n",
            cycles,
            level.as_str(),
            origin,
            args,
            file,
            line
        ));
    } else {
        emit(format_args!(
            "[tsc={:>14}] [{}] [{}] {}\n",
            cycles,
            level.as_str(),
            origin,
            args
        ));
    }
}

#[macro_export]
macro_rules! log_debug {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Debug,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_info {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Info,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Warn,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Error,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[macro_export]
macro_rules! log_panic {
    ($origin:expr, $($arg:tt)*) => {
        $crate::log::_log(
            $crate::log::LogLevel::Panic,
            $origin,
            format_args!($($arg)*),
            file!(),
            line!()
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_by_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Error < LogLevel::Panic);
        assert_eq!(LogLevel::from_u8(LogLevel::Warn as u8), LogLevel::Warn);
        assert_eq!(LogLevel::from_u8(200), LogLevel::Panic);
    }

    #[test]
    fn panic_entries_are_never_filtered() {
        assert!(enabled(LogLevel::Panic));
    }
}
