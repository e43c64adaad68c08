//! `sync_wait` (spec §4.2): blocks the calling thread until `sender`
//! completes, installing a private run-loop as the fallback scheduler in
//! the receiver's environment (spec: "Installs a private run-loop as the
//! fallback scheduler").
//!
//! Ground: `coio/sync_wait.h`'s dedicated single-shot execution context
//! plus condition-variable parking; the private run-loop here is literally
//! a fresh [`rt_runtime::TimeLoop`] — the same type user code schedules
//! real work on — rather than a bespoke struct, since its `run()` already
//! blocks until work drains exactly the way `sync_wait` needs, and tasks
//! awaited inside `sender` can use this loop's scheduler (via
//! [`SyncWaitScope::scheduler`]) precisely as spec.md's "fallback
//! scheduler" language describes.
//!
//! Spec §9 open question: "Behavior of `sync_wait` when called
//! re-entrantly from inside a task awaiting on the same context is not
//! defined... recommendation: forbid and document as undefined." This is
//! enforced here with a thread-local re-entrancy guard that panics in
//! debug builds (see DESIGN.md).

use rt_core::Completion;
use rt_runtime::TimeLoop;
use std::cell::Cell;
use std::future::Future;

thread_local! {
    static IN_SYNC_WAIT: Cell<bool> = const { Cell::new(false) };
}

struct ReentrancyGuard;

impl ReentrancyGuard {
    fn enter() -> Self {
        IN_SYNC_WAIT.with(|f| {
            debug_assert!(!f.get(), "sync_wait called re-entrantly on the same thread");
            f.set(true);
        });
        Self
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        IN_SYNC_WAIT.with(|f| f.set(false));
    }
}

/// Blocks the calling thread until `sender` completes. Returns `Some(v)`
/// on a value completion, `None` on stopped, and rethrows (panics, this
/// runtime's closest analogue — see `rt_core::error::IoError::Panic`) an
/// error by returning `Err` instead, since Rust has no ambient exception
/// channel to rethrow into — callers get a `Result` and decide.
pub fn sync_wait<S>(sender: S) -> Result<Option<S::Value>, S::Error>
where
    S: Future<Output = Completion<S::Value, S::Error>> + Send + 'static,
    S::Value: Send + 'static,
    S::Error: Send + 'static,
{
    let _guard = ReentrancyGuard::enter();
    let private_loop = TimeLoop::default();
    let result = std::sync::Arc::new(std::sync::Mutex::new(None));
    let r = std::sync::Arc::clone(&result);
    let lc = private_loop.clone();
    private_loop.spawn(async move {
        let completion = sender.await;
        *r.lock().unwrap() = Some(completion);
        lc.request_stop();
    });
    private_loop.run();
    match result.lock().unwrap().take().expect("sync_wait loop exited without a completion") {
        Completion::Value(v) => Ok(Some(v)),
        Completion::Stopped => Ok(None),
        Completion::Error(e) => Err(e),
    }
}

/// A handle to the private run-loop `sync_wait` installs, usable as a
/// [`rt_core::Scheduler`]/[`rt_core::TimedScheduler`] by senders awaited
/// inside it (spec's "fallback scheduler" language). Obtained by using
/// [`sync_wait_with_scheduler`] instead of plain [`sync_wait`] when the
/// awaited sender needs somewhere to schedule continuations.
pub type SyncWaitScope = TimeLoop;

/// As [`sync_wait`], but `make_sender` is handed the private loop so it
/// can build a sender that schedules work on it (e.g. `continues_on`).
pub fn sync_wait_with_scheduler<S, F>(make_sender: F) -> Result<Option<S::Value>, S::Error>
where
    S: Future<Output = Completion<S::Value, S::Error>> + Send + 'static,
    S::Value: Send + 'static,
    S::Error: Send + 'static,
    F: FnOnce(SyncWaitScope) -> S,
{
    let _guard = ReentrancyGuard::enter();
    let private_loop = TimeLoop::default();
    let sender = make_sender(private_loop.clone());
    let result = std::sync::Arc::new(std::sync::Mutex::new(None));
    let r = std::sync::Arc::clone(&result);
    let lc = private_loop.clone();
    private_loop.spawn(async move {
        let completion = sender.await;
        *r.lock().unwrap() = Some(completion);
        lc.request_stop();
    });
    private_loop.run();
    match result.lock().unwrap().take().expect("sync_wait loop exited without a completion") {
        Completion::Value(v) => Ok(Some(v)),
        Completion::Stopped => Ok(None),
        Completion::Error(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_core::{just, just_error, just_stopped};

    #[test]
    fn sync_wait_just_returns_the_value() {
        let r: Result<Option<i32>, ()> = sync_wait(just(7));
        assert_eq!(r, Ok(Some(7)));
    }

    #[test]
    fn sync_wait_just_stopped_returns_none() {
        let r: Result<Option<i32>, ()> = sync_wait(just_stopped());
        assert_eq!(r, Ok(None));
    }

    #[test]
    fn sync_wait_just_error_returns_err() {
        let r: Result<Option<i32>, &str> = sync_wait(just_error("boom"));
        assert_eq!(r, Err("boom"));
    }

    #[test]
    fn sync_wait_then_runs_the_continuation() {
        let r: Result<Option<i32>, ()> = sync_wait(rt_core::then(just::<i32, ()>(2), |v| v * 10));
        assert_eq!(r, Ok(Some(20)));
    }

    #[test]
    fn sync_wait_drives_an_async_block() {
        let r: Result<Option<i32>, ()> = sync_wait(async { Completion::Value(42) });
        assert_eq!(r, Ok(Some(42)));
    }
}
