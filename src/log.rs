//! House logging: a small `log!`/`fatal!` macro pair over a global sink,
//! gated by a per-process [`LogLevel`]. Deliberately not the `log` or
//! `tracing` crate facades: this mirrors the teacher lineage's own rolled
//! logger (see the sibling `rd` fork's `log.rs`), which predates those
//! facades being pulled in and is kept here for the same reason the
//! original kept it -- the scheduler's hot paths call `log!` at `LogDebug`
//! on every switch decision, and a single global `Mutex` with an early
//! `log_enabled` check is cheaper than formatting through a dyn dispatch
//! layer when the level check fails.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::io::{self, Write};

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

struct LogGlobals {
    level: LogLevel,
    sink: Box<dyn Write + Send>,
}

fn default_level() -> LogLevel {
    match std::env::var("TRACESCHED_LOG").ok().as_deref() {
        Some("fatal") => LogFatal,
        Some("error") => LogError,
        Some("warn") => LogWarn,
        Some("debug") => LogDebug,
        _ => LogInfo,
    }
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = Mutex::new(LogGlobals {
        level: default_level(),
        sink: Box::new(io::stderr()),
    });
}

/// Override the global level, e.g. from `SchedulerConfig::verbosity`.
pub fn set_level(level: LogLevel) {
    LOG_GLOBALS.lock().level = level;
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogFatal => "FATAL",
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

#[doc(hidden)]
pub fn log_enabled(level: LogLevel) -> bool {
    level <= LOG_GLOBALS.lock().level
}

#[doc(hidden)]
pub fn write_line(level: LogLevel, file: &str, line: u32, args: std::fmt::Arguments) {
    let mut g = LOG_GLOBALS.lock();
    let _ = writeln!(g.sink, "[{}] {}:{} {}", level_name(level), file, line, args);
    let _ = g.sink.flush();
}

/// Log at `level` if enabled. Matches the teacher's `log!(LogDebug, "...")`
/// call sites verbatim.
macro_rules! log {
    ($level:expr, $($args:tt)*) => {{
        if crate::log::log_enabled($level) {
            crate::log::write_line($level, file!(), line!(), format_args!($($args)*));
        }
    }};
}

/// Log at `LogFatal` and abort. Used for internal invariant violations
/// (§7): a hard abort in debug builds, a logged-but-swallowed error in
/// release so the scheduler is left in a defined-but-unspecified state
/// rather than taking the whole process down in the field.
macro_rules! fatal {
    ($($args:tt)+) => {{
        crate::log::write_line(crate::log::LogLevel::LogFatal, file!(), line!(), format_args!($($args)+));
        crate::log::notifying_abort();
    }};
}

pub fn notifying_abort() {
    if cfg!(debug_assertions) {
        let bt = backtrace::Backtrace::new();
        eprintln!("=== tracesched fatal backtrace:\n{:?}\n=== end backtrace", bt);
        std::process::abort();
    }
}
