//! Error taxonomy (spec §7).
//!
//! "Operation stopped" is deliberately *not* a variant here — spec.md is
//! explicit that it is not an error, it is the `stopped` completion
//! channel. Keeping it out of `IoError` means a receiver can never
//! accidentally match `stopped` as an `error(...)`.
//!
//! Ground: `gvthread-core::error::SchedError` — hand-rolled enum with a
//! manual `Display`/`std::error::Error` impl, no `thiserror`. That
//! convention is carried over unchanged.

use std::fmt;

#[derive(Debug)]
pub enum IoError {
    /// An OS-level error, as returned by a syscall (errno).
    System(std::io::Error),
    /// A stream read returned zero bytes into a non-empty buffer.
    Eof,
    /// The I/O object was already open when `open` was called again.
    AlreadyOpen,
    /// The requested resource (e.g. a resolver hostname) could not be found.
    NotFound,
    /// A buffer or counter would overflow its representable range.
    Overflow,
    /// A malformed argument was supplied (e.g. an invalid IP literal).
    InvalidArgument(String),
    /// User code inside a task panicked; the panic message is captured and
    /// delivered on the error channel instead of unwinding across the
    /// executor. Rust's closest analogue to spec §7's
    /// `error(exception_ptr)`.
    Panic(String),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::System(e) => write!(f, "system error: {e}"),
            IoError::Eof => write!(f, "end of file"),
            IoError::AlreadyOpen => write!(f, "I/O object already open"),
            IoError::NotFound => write!(f, "not found"),
            IoError::Overflow => write!(f, "overflow"),
            IoError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            IoError::Panic(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::System(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::System(e)
    }
}

impl From<nix::Error> for IoError {
    fn from(e: nix::Error) -> Self {
        IoError::System(std::io::Error::from_raw_os_error(e as i32))
    }
}

pub type IoResult<T> = Result<T, IoError>;

/// Runs `f`, turning a panic into `IoError::Panic` instead of unwinding.
///
/// Ground: spec §7's propagation policy ("exceptions escape until the next
/// await/return, at which point they become error completions"); this is
/// the Rust rendering of that rule, used at every task-resumption boundary.
pub fn catch_unwind_as_error<F, T>(f: F) -> IoResult<T>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    match std::panic::catch_unwind(f) {
        Ok(v) => Ok(v),
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            Err(IoError::Panic(msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_unwind_converts_panic_to_error() {
        let result = catch_unwind_as_error(|| -> i32 { panic!("boom") });
        assert!(matches!(result, Err(IoError::Panic(msg)) if msg == "boom"));
    }

    #[test]
    fn catch_unwind_passes_through_value() {
        let result = catch_unwind_as_error(|| 42);
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(IoError::Eof.to_string(), "end of file");
        assert_eq!(IoError::AlreadyOpen.to_string(), "I/O object already open");
    }
}
