//! `async_latch` (spec §4.5): a single-use countdown gate. `count_down`
//! decrements the counter; once it reaches zero every waiter registered
//! via `wait()` is woken, and subsequent `wait()` calls resolve
//! immediately. Ground: the same `SpinLock`-guarded-state shape as
//! [`crate::sync::mutex`]/[`crate::sync::semaphore`], simplified since a
//! latch has no hand-off — reaching zero just wakes everyone once.

use rt_core::spinlock::SpinLock;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

struct State {
    count: usize,
    waiters: Vec<Waker>,
}

pub struct AsyncLatch {
    state: SpinLock<State>,
}

impl AsyncLatch {
    pub fn new(count: usize) -> Self {
        Self {
            state: SpinLock::new(State {
                count,
                waiters: Vec::new(),
            }),
        }
    }

    /// Decrements the counter. Returns `true` if this call brought it to
    /// zero (and thus woke every waiter). Counting down past zero is a
    /// no-op, mirroring `std::latch::count_down`'s saturating behavior.
    pub fn count_down(&self) -> bool {
        let mut state = self.state.lock();
        if state.count == 0 {
            return false;
        }
        state.count -= 1;
        if state.count == 0 {
            let waiters = std::mem::take(&mut state.waiters);
            drop(state);
            for w in waiters {
                w.wake();
            }
            true
        } else {
            false
        }
    }

    pub fn try_wait(&self) -> bool {
        self.state.lock().count == 0
    }

    pub fn wait(&self) -> Wait<'_> {
        Wait { latch: self }
    }
}

pub struct Wait<'a> {
    latch: &'a AsyncLatch,
}

impl<'a> Future for Wait<'a> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.latch.state.lock();
        if state.count == 0 {
            Poll::Ready(())
        } else {
            state.waiters.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn reaching_zero_releases_waiters() {
        let latch = AsyncLatch::new(2);
        assert!(!latch.try_wait());
        assert!(!latch.count_down());
        assert!(latch.count_down());
        assert!(latch.try_wait());
        block_on(latch.wait());
    }

    #[test]
    fn counting_down_past_zero_is_a_no_op() {
        let latch = AsyncLatch::new(1);
        assert!(latch.count_down());
        assert!(!latch.count_down());
        assert!(latch.try_wait());
    }
}
