/// Kernel log: leveled messages with a bounded in-memory ring.
///
/// Every entry goes to the serial console immediately (subject to the
/// minimum level) and into a ring of the most recent `KLOG_CAPACITY`
/// entries that the shell can dump after the fact. The ring stores
/// heap-allocated text, so entries are only retained once the allocator
/// is up; console output works from the first line of boot.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::KLOG_CAPACITY;
use crate::sync::spinlock::SpinLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<LogLevel> {
        match name {
            "debug" | "0" => Some(LogLevel::Debug),
            "info" | "1" => Some(LogLevel::Info),
            "warn" | "2" => Some(LogLevel::Warn),
            "error" | "3" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct LogEntry {
    pub seq: u32,
    pub level: LogLevel,
    pub text: String,
}

struct Klog {
    entries: VecDeque<LogEntry>,
    next_seq: u32,
    min_level: LogLevel,
}

static KLOG: SpinLock<Klog> = SpinLock::new(Klog {
    entries: VecDeque::new(),
    next_seq: 0,
    min_level: LogLevel::Info,
});

static RING_READY: AtomicBool = AtomicBool::new(false);

/// Enable the in-memory ring. Call once the heap is initialized.
pub fn init() {
    RING_READY.store(true, Ordering::Release);
}

pub fn set_level(level: LogLevel) {
    KLOG.lock().min_level = level;
}

pub fn level() -> LogLevel {
    KLOG.lock().min_level
}

#[doc(hidden)]
pub fn _emit(level: LogLevel, module: &str, args: fmt::Arguments) {
    if level < KLOG.lock().min_level {
        return;
    }

    crate::println!("[{:5}] {}: {}", level.name(), module, args);

    if RING_READY.load(Ordering::Acquire) {
        let mut klog = KLOG.lock();
        let seq = klog.next_seq;
        klog.next_seq = klog.next_seq.wrapping_add(1);
        if klog.entries.len() == KLOG_CAPACITY {
            klog.entries.pop_front();
        }
        klog.entries.push_back(LogEntry {
            seq,
            level,
            text: alloc::format!("{}: {}", module, args),
        });
    }
}

/// Copy out up to `max` of the most recent entries, oldest first.
pub fn tail(max: usize) -> Vec<LogEntry> {
    let klog = KLOG.lock();
    let skip = klog.entries.len().saturating_sub(max);
    klog.entries.iter().skip(skip).cloned().collect()
}

#[macro_export]
macro_rules! klog_debug {
    ($module:expr, $($arg:tt)*) => {
        $crate::klog::_emit($crate::klog::LogLevel::Debug, $module, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_info {
    ($module:expr, $($arg:tt)*) => {
        $crate::klog::_emit($crate::klog::LogLevel::Info, $module, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_warn {
    ($module:expr, $($arg:tt)*) => {
        $crate::klog::_emit($crate::klog::LogLevel::Warn, $module, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_error {
    ($module:expr, $($arg:tt)*) => {
        $crate::klog::_emit($crate::klog::LogLevel::Error, $module, ::core::format_args!($($arg)*))
    };
}
