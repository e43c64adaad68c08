//! `async_semaphore` (spec §4.5).
//!
//! Same combined-lock shape as [`crate::sync::mutex`] and for the same
//! reason: a lock-free `WaitStack` push-then-check is not atomic with a
//! concurrent `release()`'s "are there waiters" check, so a release can
//! land between a failed fast-path acquire and the waiter registering
//! itself, and the waiter never gets woken. Folding `count` and
//! `waiters` under one [`SpinLock`] makes "decrement, or register as a
//! waiter" a single atomic step, and likewise for "increment, or hand a
//! permit directly to the next waiter".

use rt_core::spinlock::SpinLock;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll, Waker};

struct Waiter {
    granted: std::sync::atomic::AtomicBool,
    waker: StdMutex<Option<Waker>>,
}

struct State {
    count: isize,
    waiters: VecDeque<Arc<Waiter>>,
}

/// A counting semaphore whose `acquire()` suspends the caller rather
/// than blocking an OS thread when no permits are available.
pub struct AsyncSemaphore {
    state: SpinLock<State>,
}

impl AsyncSemaphore {
    pub fn new(initial: isize) -> Self {
        Self {
            state: SpinLock::new(State {
                count: initial,
                waiters: VecDeque::new(),
            }),
        }
    }

    pub fn acquire(&self) -> Acquire<'_> {
        Acquire {
            sem: self,
            waiter: None,
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    /// Releases one permit, handing it directly to the longest-waiting
    /// acquirer if any, otherwise incrementing the count.
    pub fn release(&self) {
        let mut state = self.state.lock();
        match state.waiters.pop_front() {
            Some(waiter) => {
                drop(state);
                waiter.granted.store(true, std::sync::atomic::Ordering::Release);
                if let Some(w) = waiter.waker.lock().unwrap().take() {
                    w.wake();
                }
            }
            None => {
                state.count += 1;
            }
        }
    }

    pub fn available(&self) -> isize {
        self.state.lock().count
    }
}

pub struct Acquire<'a> {
    sem: &'a AsyncSemaphore,
    waiter: Option<Arc<Waiter>>,
}

impl<'a> Future for Acquire<'a> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if let Some(waiter) = &this.waiter {
            if waiter.granted.load(std::sync::atomic::Ordering::Acquire) {
                return Poll::Ready(());
            }
            *waiter.waker.lock().unwrap() = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let mut state = this.sem.state.lock();
        if state.count > 0 {
            state.count -= 1;
            return Poll::Ready(());
        }
        let waiter = Arc::new(Waiter {
            granted: std::sync::atomic::AtomicBool::new(false),
            waker: StdMutex::new(Some(cx.waker().clone())),
        });
        state.waiters.push_back(Arc::clone(&waiter));
        this.waiter = Some(waiter);
        Poll::Pending
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
    fn acquire_decrements_available_permits() {
        let sem = AsyncSemaphore::new(2);
        assert!(sem.try_acquire());
        assert_eq!(sem.available(), 1);
        block_on(sem.acquire());
        assert_eq!(sem.available(), 0);
        assert!(!sem.try_acquire());
    }

    #[test]
    fn release_hands_permit_to_waiter_directly() {
        use std::thread;

        let sem = Arc::new(AsyncSemaphore::new(0));
        let woke = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let s = Arc::clone(&sem);
        let w = Arc::clone(&woke);
        let handle = thread::spawn(move || {
            block_on(s.acquire());
            w.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!woke.load(std::sync::atomic::Ordering::SeqCst));
        sem.release();
        handle.join().unwrap();
        assert!(woke.load(std::sync::atomic::Ordering::SeqCst));
    }
}
