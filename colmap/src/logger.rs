use chrono::Local;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    fn parse(s: &str) -> Option<Level> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(Level::Error),
            "warn" => Some(Level::Warn),
            "info" => Some(Level::Info),
            "debug" => Some(Level::Debug),
            "trace" => Some(Level::Trace),
            _ => None,
        }
    }
}

static MAX_LEVEL: Lazy<AtomicU8> = Lazy::new(|| {
    let level = std::env::var("COLMAP_LOG").ok().and_then(|v| Level::parse(&v)).unwrap_or(Level::Info);
    AtomicU8::new(level as u8)
});

pub fn set_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= MAX_LEVEL.load(Ordering::Relaxed)
}

pub fn log(level: Level, args: fmt::Arguments) {
    if !enabled(level) {
        return;
    }
    let now = Local::now();
    match level {
        Level::Error | Level::Warn => eprintln!("[{}] {} {}", now.format("%Y-%m-%d %H:%M:%S"), level.label(), args),
        _ => println!("[{}] {} {}", now.format("%Y-%m-%d %H:%M:%S"), level.label(), args),
    }
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::logger::log($crate::logger::Level::Debug, format_args!($($arg)*))
    };
}

/// Per-value tracing; the level check happens before the arguments are formatted.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        if $crate::logger::enabled($crate::logger::Level::Trace) {
            $crate::logger::log($crate::logger::Level::Trace, format_args!($($arg)*))
        }
    };
}
