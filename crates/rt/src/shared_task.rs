//! `shared_task<T>` (spec §4.3, §3 "briefly referenced in examples";
//! fully specified in SPEC_FULL.md §3).
//!
//! Ground: `coio/task.h`'s promise split between the plain and shared
//! variants plus `coio/detail/waiting_list.h`'s intrusive wait list — the
//! first awaiter drives the underlying operation, stores its result, and
//! wakes every other registered waiter. Rendered here with the same
//! `SpinLock`-guarded-state shape used throughout this workspace
//! ([`rt_runtime::sync::mutex`], [`rt_runtime::sync::scope`]): "take the
//! driver role, or register as a waiter" must be one atomic decision, or
//! two concurrent first-pollers could both think they're the driver.

use rt_core::spinlock::SpinLock;
use rt_core::Completion;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

type BoxSender<T, E> = Pin<Box<dyn Future<Output = Completion<T, E>> + Send>>;

enum State<T: Clone, E: Clone> {
    Pending {
        fut: Option<BoxSender<T, E>>,
        waiters: Vec<Waker>,
    },
    Done(Completion<T, E>),
}

struct Inner<T: Clone, E: Clone> {
    state: SpinLock<State<T, E>>,
}

/// A task whose completion may be awaited by multiple consumers. The
/// first awaiter to poll drives the underlying sender; once it
/// completes, every other awaiter (present and future) observes the same
/// result synchronously.
#[derive(Clone)]
pub struct SharedTask<T: Clone, E: Clone> {
    inner: Arc<Inner<T, E>>,
}

impl<T: Clone + Send + 'static, E: Clone + Send + 'static> SharedTask<T, E> {
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Completion<T, E>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                state: SpinLock::new(State::Pending {
                    fut: Some(Box::pin(fut)),
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    /// A fresh, independently-pollable handle onto the same underlying
    /// task. Whichever handle is polled first becomes the driver.
    pub fn handle(&self) -> SharedTaskHandle<T, E> {
        SharedTaskHandle {
            inner: Arc::clone(&self.inner),
            registered: false,
        }
    }
}

pub struct SharedTaskHandle<T: Clone, E: Clone> {
    inner: Arc<Inner<T, E>>,
    registered: bool,
}

impl<T: Clone, E: Clone> Future for SharedTaskHandle<T, E> {
    type Output = Completion<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            let mut state = this.inner.state.lock();
            match &mut *state {
                State::Done(c) => return Poll::Ready(c.clone()),
                State::Pending { fut, waiters } => {
                    if let Some(mut driver) = fut.take() {
                        drop(state);
                        match driver.as_mut().poll(cx) {
                            Poll::Pending => {
                                let mut state = this.inner.state.lock();
                                if let State::Pending { fut, .. } = &mut *state {
                                    *fut = Some(driver);
                                }
                                return Poll::Pending;
                            }
                            Poll::Ready(completion) => {
                                let to_wake = {
                                    let mut state = this.inner.state.lock();
                                    let waiters = match &mut *state {
                                        State::Pending { waiters, .. } => {
                                            std::mem::take(waiters)
                                        }
                                        State::Done(_) => Vec::new(),
                                    };
                                    *state = State::Done(completion.clone());
                                    waiters
                                };
                                for w in to_wake {
                                    w.wake();
                                }
                                return Poll::Ready(completion);
                            }
                        }
                    } else {
                        if !this.registered {
                            waiters.push(cx.waker().clone());
                            this.registered = true;
                        } else if let Some(w) = waiters.iter_mut().find(|w| w.will_wake(cx.waker()))
                        {
                            *w = cx.waker().clone();
                        } else {
                            waiters.push(cx.waker().clone());
                        }
                        return Poll::Pending;
                    }
                }
            }
        }
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
    fn second_awaiter_observes_cached_result() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        let shared: SharedTask<i32, ()> = SharedTask::new(async move {
            r.fetch_add(1, Ordering::SeqCst);
            Completion::Value(7)
        });

        let h1 = shared.handle();
        assert_eq!(block_on(h1), Completion::Value(7));
        let h2 = shared.handle();
        assert_eq!(block_on(h2), Completion::Value(7));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_waiter_is_woken_once_driver_finishes() {
        use std::thread;

        let shared: SharedTask<i32, ()> = SharedTask::new(async {
            thread::sleep(std::time::Duration::from_millis(20));
            Completion::Value(9)
        });
        let driver = shared.handle();
        let waiter = shared.handle();

        let t1 = thread::spawn(move || block_on(driver));
        thread::sleep(std::time::Duration::from_millis(5));
        let t2 = thread::spawn(move || block_on(waiter));

        assert_eq!(t1.join().unwrap(), Completion::Value(9));
        assert_eq!(t2.join().unwrap(), Completion::Value(9));
    }
}
