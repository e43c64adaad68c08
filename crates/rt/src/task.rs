//! Task (spec §4.3).
//!
//! Ground for the central move: `rt_core::sender` already folds
//! `connect`/`start`/`set_value`/`set_error`/`set_stopped` into
//! `Future<Output = Completion<T, E>>`. A C++ `task<T>` *is* its own
//! promise/coroutine-frame pair acting as both sender and awaitable; the
//! direct Rust counterpart is an `async fn`/`async` block, which is
//! already lazily-started, suspendable, and awaitable. `Task<T, E>` here
//! is the owned, boxed, pinned handle spec §3 describes ("owns its state
//! until connected... not copyable, movable by handle only"): a `Pin<Box<
//! dyn Future<...> + Send>>` is exactly that — movable as a handle,
//! non-`Copy`, and its heap frame is the "suspendable procedure's frame"
//! spec §4.3 refers to.
//!
//! **Allocator-aware storage.** The C++ source plumbs a caller-supplied
//! allocator through the coroutine promise so the frame itself is
//! allocated with it (spec §9 "Allocator-aware coroutine frames"). Stable
//! Rust has no custom-allocator `Box` (that is gated behind the nightly
//! `allocator_api` feature), so this is rendered as a statistics-only
//! seam: [`FrameAllocator`] is consulted at construction time to record
//! "a task frame of this size was allocated" and nothing more; the actual
//! byte allocation always goes through the global allocator via `Box`.
//! This is recorded as an Open Question resolution in DESIGN.md.
//!
//! **Stop-token propagation.** `get_env()` in the C++ source returns the
//! stop token threaded in from the connected receiver. Plain `Future`s
//! have no environment parameter to carry that through, so this module
//! renders it as an ambient, poll-scoped context: [`with_stop_token`]
//! installs a token for the duration of one `poll` call (cleared
//! afterward, even across thread migration between polls — each poll
//! call re-establishes its own ambient token), and [`current_stop_token`]
//! reads it back. A task's body calls `current_stop_token()` wherever the
//! original would have called `co_await get_env().query(get_stop_token)`.
//!
//! **Unhandled exceptions.** The promise's `unhandled_exception()` (spec
//! §3, §7 — "any thrown exception becomes an `error(exception_ptr)`
//! completion") is rendered by routing every poll through
//! [`catch_unwind_as_error`]: a panic inside the wrapped future becomes
//! `Completion::Error` instead of unwinding across the executor. This
//! requires `E: From<IoError>` so the caught panic has somewhere to go.

use rt_core::error::{catch_unwind_as_error, IoError};
use rt_core::stop_token::InplaceStopToken;
use rt_core::Completion;
use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    static CURRENT_STOP_TOKEN: RefCell<Option<InplaceStopToken>> = const { RefCell::new(None) };
}

/// Reads the stop token installed by the innermost enclosing
/// [`with_stop_token`]/[`Task::connect_with`] scope, or a never-stoppable
/// token if none is installed (mirrors spec §4.1's `never_stop_token`
/// default).
pub fn current_stop_token() -> InplaceStopToken {
    CURRENT_STOP_TOKEN.with(|cell| cell.borrow().clone().unwrap_or_default())
}

/// Installs `token` as the ambient stop token for the duration of `f`,
/// restoring whatever was installed before on return (including panic
/// unwind, since the guard's `Drop` always runs).
pub fn with_stop_token<R>(token: InplaceStopToken, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT_STOP_TOKEN.with(|cell| cell.replace(Some(token)));
    struct Restore(Option<InplaceStopToken>);
    impl Drop for Restore {
        fn drop(&mut self) {
            CURRENT_STOP_TOKEN.with(|cell| *cell.borrow_mut() = self.0.take());
        }
    }
    let _restore = Restore(previous);
    f()
}

/// Statistics-only allocator seam for task frames (see module docs).
/// `System` is the default; tests and callers wanting to observe
/// allocation counts can supply their own.
pub trait FrameAllocator: Send + Sync {
    fn record_alloc(&self, bytes: usize);
}

pub struct SystemFrameAllocator;

impl FrameAllocator for SystemFrameAllocator {
    fn record_alloc(&self, _bytes: usize) {}
}

/// A lazily-started, suspendable, cancellation-aware operation producing
/// a typed result (spec §3 "Task"). Equivalent to a boxed `async` block
/// that also completes on the `stopped` channel.
pub struct Task<T, E> {
    fut: Pin<Box<dyn Future<Output = Completion<T, E>> + Send>>,
}

impl<T, E> Task<T, E> {
    /// Boxes `fut` as a task. Nothing runs until the task is polled —
    /// spec §3's "lazily started": constructing a `Task` allocates a
    /// frame but does no work.
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Completion<T, E>> + Send + 'static,
    {
        Self::new_in(fut, &SystemFrameAllocator)
    }

    /// As [`Task::new`], but records the frame size with `alloc` first
    /// (spec §3 "allocator-aware storage" / spec §9's restatement "every
    /// asynchronous operation that may heap-allocate takes an allocator
    /// argument").
    pub fn new_in<F>(fut: F, alloc: &dyn FrameAllocator) -> Self
    where
        F: Future<Output = Completion<T, E>> + Send + 'static,
    {
        alloc.record_alloc(std::mem::size_of::<F>());
        Self { fut: Box::pin(fut) }
    }

    /// Runs this task to completion with `token` installed as the
    /// ambient stop token for every poll (the Rust rendering of
    /// `connect(task, receiver)` threading the receiver's stop token
    /// into `get_env()` — see module docs).
    pub fn with_stop_token(self, token: InplaceStopToken) -> WithStopToken<T, E> {
        WithStopToken {
            inner: self,
            token,
        }
    }
}

impl<T, E> Future for Task<T, E>
where
    E: From<IoError>,
{
    type Output = Completion<T, E>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };
        let fut = &mut this.fut;
        match catch_unwind_as_error(AssertUnwindSafe(|| fut.as_mut().poll(cx))) {
            Ok(poll) => poll,
            Err(e) => Poll::Ready(Completion::Error(E::from(e))),
        }
    }
}

/// A [`Task`] wrapped so every poll happens with its stop token installed
/// as the ambient one (see [`Task::with_stop_token`]).
pub struct WithStopToken<T, E> {
    inner: Task<T, E>,
    token: InplaceStopToken,
}

impl<T, E> Future for WithStopToken<T, E>
where
    E: From<IoError>,
{
    type Output = Completion<T, E>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };
        let token = this.token.clone();
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };
        match catch_unwind_as_error(AssertUnwindSafe(|| with_stop_token(token, || inner.poll(cx)))) {
            Ok(poll) => poll,
            Err(e) => Poll::Ready(Completion::Error(E::from(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_core::stop_token::InplaceStopSource;

    fn block_on<F: Future>(mut fut: F) -> F::Output {
        use std::task::{RawWaker, RawWakerVTable, Waker};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let waker = unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) };
        let mut cx = Context::from_waker(&waker);
        let mut fut = unsafe { Pin::new_unchecked(&mut fut) };
        loop {
            if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return v;
            }
        }
    }

    #[test]
    fn task_runs_lazily_and_completes() {
        let task: Task<i32, IoError> = Task::new(async { Completion::Value(42) });
        assert!(matches!(block_on(task), Completion::Value(42)));
    }

    #[test]
    fn a_panic_inside_the_task_becomes_an_error_completion() {
        let task: Task<i32, IoError> = Task::new(async { panic!("boom") });
        assert!(matches!(block_on(task), Completion::Error(IoError::Panic(msg)) if msg == "boom"));
    }

    #[test]
    fn current_stop_token_defaults_to_unstoppable() {
        assert!(!current_stop_token().stop_possible());
    }

    #[test]
    fn with_stop_token_is_visible_inside_the_task_and_restored_after() {
        let src = InplaceStopSource::new();
        src.request_stop();
        let token = src.get_token();
        let task: Task<bool, IoError> =
            Task::new(async { Completion::Value(current_stop_token().stop_requested()) });
        let result = block_on(task.with_stop_token(token));
        assert!(matches!(result, Completion::Value(true)));
        assert!(!current_stop_token().stop_possible());
    }
}
