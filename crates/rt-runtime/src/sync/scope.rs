//! `async_scope` (spec §4.5): tracks a set of in-flight spawned
//! operations and lets a caller `join()` once every associated operation
//! has completed, or `request_stop()` to ask them all to wind down early.
//!
//! Ground: the state machine is spec §4.5's `{unused, open,
//! open_and_joining, closed, closed_and_joining, unused_and_closed,
//! joined}` set, collapsed here into one `SpinLock`-guarded
//! `{count, closed}` pair plus a `bool` recording whether `join` has
//! already resolved — the named states are exactly the reachable
//! combinations of those three fields, so naming them as an explicit
//! enum would just restate the lock invariants. `associate`/`disassociate`
//! bookkeeping and the "wake join once the count drops to zero after
//! close" rule are grounded the same way as [`crate::sync::mutex`]'s
//! lock hand-off: the decision ("are we done now?") and the listener
//! registration must happen under the same lock, or a `disassociate`
//! racing a `join` could decide "not done" and finalize before the
//! joiner finishes registering. [`rt_core::WaitStack`] holds the
//! registered join wakers; unlike the mutex/semaphore case there is no
//! specific waiter to hand anything to, just "wake everyone", so the
//! lock-free stack is still the right structure — it is only ever
//! drained while already holding the scope's own lock, which is what
//! makes the registration race-free.

use rt_core::sender::StopWhen;
use rt_core::spinlock::SpinLock;
use rt_core::stop_token::{InplaceStopSource, InplaceStopToken};
use rt_core::{stop_when, Completion, Sender, WaitStack};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct State {
    count: usize,
    closed: bool,
    done: bool,
}

/// A scope over a dynamic set of concurrently spawned operations.
pub struct AsyncScope {
    state: SpinLock<State>,
    listeners: WaitStack<Waker>,
    stop: InplaceStopSource,
}

impl Default for AsyncScope {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncScope {
    pub fn new() -> Self {
        Self {
            state: SpinLock::new(State {
                count: 0,
                closed: false,
                done: false,
            }),
            listeners: WaitStack::new(),
            stop: InplaceStopSource::new(),
        }
    }

    pub fn stop_token(&self) -> InplaceStopToken {
        self.stop.get_token()
    }

    /// Requests cooperative cancellation of every operation associated
    /// with this scope. [`spawn`](Self::spawn) already wraps each sender
    /// it associates with `stop_when(sender, scope.stop_token())`, so
    /// every outstanding operation observes this on its own next poll.
    pub fn request_stop(&self) -> bool {
        self.stop.request_stop()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.stop_requested()
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().count
    }

    /// Marks the scope closed: no further associations are meaningful,
    /// and `join()` will resolve once the outstanding count reaches zero.
    /// Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        self.maybe_finish(&mut state);
    }

    fn associate(&self) {
        self.state.lock().count += 1;
    }

    fn disassociate(&self) {
        let mut state = self.state.lock();
        state.count -= 1;
        self.maybe_finish(&mut state);
    }

    fn maybe_finish(&self, state: &mut State) {
        if state.closed && state.count == 0 && !state.done {
            state.done = true;
            for w in self.listeners.drain_fifo() {
                w.wake();
            }
        }
    }

    /// Tries to associate `sender` with this scope and, on success,
    /// connects it to an internal receiver and hands back the future that
    /// drives it (spec §4.5: "`spawn(S)` tries to associate; on success,
    /// connects `S` with an internal receiver and starts it"). The sender
    /// is wrapped with `stop_when(sender, self.stop_token())` internally,
    /// so a `request_stop()` on this scope — from any cause, including
    /// another spawned operation erroring out — reaches it without the
    /// caller doing any wrapping of its own. Both the value and stopped
    /// completions just disassociate; an error completion is fatal and
    /// also trips the scope's own stop source (spec §4.5 "errors are
    /// fatal (terminate)"), which in turn stops every sibling operation
    /// still associated with this scope. The returned future must still
    /// be handed to an executor (e.g. `EpollReactor::spawn`) to actually
    /// run. `stop_when` requires its wrapped sender to be `Unpin`; an
    /// async body that borrows across its own await points and so isn't
    /// `Unpin` should be boxed into a `Pin<Box<dyn Future<...>>>` (e.g.
    /// `rt`'s `Task`) before it is spawned here.
    pub fn spawn<S>(self: &Arc<Self>, sender: S) -> Spawned<S>
    where
        S: Future + Unpin,
    {
        self.associate();
        Spawned {
            scope: Arc::clone(self),
            inner: stop_when(sender, self.stop_token()),
        }
    }

    /// Fire-and-forget [`spawn`](Self::spawn) for plain `()`-returning
    /// futures that never error — a thin wrapper for operations with no
    /// error channel of their own to report through.
    pub fn guard<F>(self: &Arc<Self>, fut: F) -> Guarded<F>
    where
        F: Future<Output = ()> + Unpin,
    {
        let f: fn(()) -> Completion<(), Infallible> = |()| Completion::Value(());
        Guarded {
            inner: self.spawn(rt_core::then(fut, f)),
        }
    }

    /// A sender that completes once every associated operation has
    /// finished and the scope has been [`close`](Self::close)d.
    pub fn join(self: &Arc<Self>) -> Join {
        Join {
            scope: Arc::clone(self),
            registered: false,
        }
    }
}

pub struct Spawned<S: Future + Unpin> {
    scope: Arc<AsyncScope>,
    inner: StopWhen<S, InplaceStopToken>,
}

impl<S> Future for Spawned<S>
where
    S: Sender + Unpin,
{
    type Output = Completion<S::Value, S::Error>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let out = Pin::new(&mut this.inner).poll(cx);
        if let Poll::Ready(completion) = &out {
            if matches!(completion, Completion::Error(_)) {
                this.scope.request_stop();
            }
            this.scope.disassociate();
        }
        out
    }
}

pub struct Guarded<F>
where
    F: Future<Output = ()> + Unpin,
{
    inner: Spawned<rt_core::sender::Then<F, fn(()) -> Completion<(), Infallible>>>,
}

impl<F> Future for Guarded<F>
where
    F: Future<Output = ()> + Unpin,
{
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(_) => Poll::Ready(()),
        }
    }
}

pub struct Join {
    scope: Arc<AsyncScope>,
    registered: bool,
}

impl Future for Join {
    type Output = Completion<(), Infallible>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.scope.state.lock();
        if state.done {
            return Poll::Ready(Completion::Value(()));
        }
        this.scope.listeners.push(cx.waker().clone());
        this.registered = true;
        // Re-check under the same guard: a concurrent `disassociate`
        // that ran between our `done` check and the push above would
        // have drained an empty listener list and missed us otherwise.
        if state.done {
            return Poll::Ready(Completion::Value(()));
        }
        drop(state);
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{RawWaker, RawWakerVTable};

    fn block_on<F: Future>(mut fut: F) -> F::Output {
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
    fn join_resolves_immediately_once_empty_and_closed() {
        let scope = Arc::new(AsyncScope::new());
        scope.close();
        assert_eq!(block_on(scope.join()), Completion::Value(()));
    }

    #[test]
    fn join_waits_for_outstanding_work_and_close() {
        use std::thread;

        let scope = Arc::new(AsyncScope::new());
        let count = Arc::new(AtomicUsize::new(0));
        let guarded = scope.guard({
            let count = Arc::clone(&count);
            async move {
                thread::sleep(std::time::Duration::from_millis(20));
                count.store(1, Ordering::SeqCst);
            }
        });

        let worker = thread::spawn(move || block_on(guarded));
        scope.close();
        let result = block_on(scope.join());
        worker.join().unwrap();
        assert_eq!(result, Completion::Value(()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_stop_trips_the_scopes_token() {
        let scope = Arc::new(AsyncScope::new());
        assert!(!scope.stop_requested());
        scope.request_stop();
        assert!(scope.stop_requested());
        assert!(scope.stop_token().stop_requested());
    }

    #[test]
    fn an_erroring_spawn_trips_the_scopes_stop_source() {
        let scope = Arc::new(AsyncScope::new());
        let spawned = scope.spawn(rt_core::just_error::<(), &str>("boom"));
        assert!(matches!(block_on(spawned), Completion::Error("boom")));
        assert!(scope.stop_requested());
    }

    #[test]
    fn a_spawned_sender_observes_the_scopes_own_stop_request() {
        struct PendingForever;
        impl Future for PendingForever {
            type Output = Completion<(), Infallible>;
            fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
                Poll::Pending
            }
        }

        let scope = Arc::new(AsyncScope::new());
        let mut spawned = scope.spawn(PendingForever);
        scope.request_stop();
        assert!(matches!(block_on(&mut spawned), Completion::Stopped));
    }
}
