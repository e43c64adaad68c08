//! Kernel-style leveled print macros.
//!
//! Ground: `gvthread-core::kprint` — carried over near-verbatim as the
//! runtime's ambient logging layer (see SPEC_FULL.md §2.2). Context tags
//! are renamed from `[w<worker>:g<gvthread>]` to `[w<worker>:t<task>]` to
//! match this runtime's worker/task vocabulary instead of the original
//! worker/gvthread one.
//!
//! # Environment variables
//!
//! - `COIO_RS_FLUSH_LOG=1` — flush stderr after each print.
//! - `COIO_RS_LOG_LEVEL=<level>` — off/error/warn/info/debug/trace or 0-5.
//! - `COIO_RS_LOG_TIME=1` — prefix each line with elapsed nanoseconds.

use crate::env::env_get_bool;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static TIME_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    START_TIME.get_or_init(Instant::now);
    FLUSH_ENABLED.store(env_get_bool("COIO_RS_FLUSH_LOG", false), Ordering::Relaxed);
    TIME_ENABLED.store(env_get_bool("COIO_RS_LOG_TIME", false), Ordering::Relaxed);
    if let Ok(val) = std::env::var("COIO_RS_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Info,
        };
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn time_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    TIME_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn set_time_enabled(enabled: bool) {
    TIME_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level as u8 <= log_level() as u8
}

#[inline]
pub fn elapsed_ns() -> u64 {
    let start = START_TIME.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

thread_local! {
    static WORKER_ID: std::cell::Cell<Option<u32>> = const { std::cell::Cell::new(None) };
    static TASK_ID: std::cell::Cell<Option<u64>> = const { std::cell::Cell::new(None) };
}

pub fn set_worker_id(id: u32) {
    WORKER_ID.with(|w| w.set(Some(id)));
}

pub fn clear_worker_id() {
    WORKER_ID.with(|w| w.set(None));
}

pub fn set_task_id(id: u64) {
    TASK_ID.with(|t| t.set(Some(id)));
}

pub fn clear_task_id() {
    TASK_ID.with(|t| t.set(None));
}

pub fn get_worker_id() -> Option<u32> {
    WORKER_ID.with(|w| w.get())
}

pub fn get_task_id() -> Option<u64> {
    TASK_ID.with(|t| t.get())
}

fn format_context() -> String {
    let worker = match get_worker_id() {
        Some(id) => format!("w{id}"),
        None => "w--".to_string(),
    };
    let task = match get_task_id() {
        Some(id) => format!("t{id}"),
        None => "t--".to_string(),
    };
    format!("[{worker}:{task}]")
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} ", level.prefix());
    if time_enabled() {
        let _ = write!(handle, "[{}] ", elapsed_ns());
    }
    let _ = write!(handle, "{} ", format_context());
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {{
        $crate::log::_klog_impl($crate::log::LogLevel::Error, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {{
        $crate::log::_klog_impl($crate::log::LogLevel::Warn, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {{
        $crate::log::_klog_impl($crate::log::LogLevel::Info, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => {{
        $crate::log::_klog_impl($crate::log::LogLevel::Debug, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => {{
        $crate::log::_klog_impl($crate::log::LogLevel::Trace, format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn context_roundtrip() {
        set_worker_id(2);
        set_task_id(7);
        assert_eq!(get_worker_id(), Some(2));
        assert_eq!(get_task_id(), Some(7));
        clear_worker_id();
        clear_task_id();
        assert_eq!(get_worker_id(), None);
    }

    #[test]
    fn macros_compile() {
        set_log_level(LogLevel::Off);
        klog_error!("error {}", "msg");
        klog_warn!("warn");
        klog_info!("info");
        klog_debug!("debug");
        klog_trace!("trace");
    }
}
