//! Shared scaffolding between [`crate::time_loop::TimeLoop`] and
//! [`crate::epoll_reactor::EpollReactor`]: the ready-operation queue plus
//! the bookkeeping needed to poll an arbitrary `Future<Output = ()>` to
//! completion (spec §4.4, invariant 1 — "every operation enqueued into the
//! ready queue is resumed by exactly one `run`/`poll` iteration").
//!
//! Rust's `Future`/`Waker` protocol already *is* the "enqueue a ready
//! continuation, resume it later" model spec.md describes for the op
//! queue, so a spawned task is simply a boxed future plus a `Waker` that
//! re-enqueues it. Ground for the queue+waker shape: `gvthread-runtime::
//! ready_queue::simple::GlobalQueue` (a `SpinLock`-guarded `VecDeque` of
//! runnable handles) generalized from green-thread handles to arbitrary
//! futures.

use rt_core::spinlock::SpinLock;
use rt_core::OpQueue;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Something a [`TaskSlot`] can prod to interrupt a blocked worker: a
/// parked condition variable for `time_loop`, a self-pipe write for
/// `epoll_reactor`. Ground: spec §4.4.1's "wake earlier on external
/// interrupt" / §4.4.2's self-pipe interrupter, unified behind one trait
/// so [`TaskSlot`] doesn't need to know which context owns it.
pub trait WakeNotify: Send + Sync {
    fn notify(&self);
}

/// A `Mutex`+`Condvar` pair used by `time_loop` to block until the next
/// timer deadline or an external wakeup, whichever comes first.
#[derive(Default)]
pub struct Parker {
    gate: Mutex<()>,
    cv: Condvar,
}

impl Parker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks until `notify` is called, `deadline` passes, or (as a
    /// correctness backstop against a missed wakeup) 50ms elapse.
    pub fn wait_until(&self, deadline: Option<Instant>) {
        let guard = self.gate.lock().unwrap();
        let cap = Duration::from_millis(50);
        let timeout = match deadline {
            Some(d) => d.saturating_duration_since(Instant::now()).min(cap),
            None => cap,
        };
        let _ = self.cv.wait_timeout(guard, timeout);
    }
}

impl WakeNotify for Parker {
    fn notify(&self) {
        let _guard = self.gate.lock().unwrap();
        self.cv.notify_all();
    }
}

/// A spawned task's control block. Implements [`Wake`] so that a `Waker`
/// cloned from it re-enqueues the task onto its owning context's ready
/// queue — the Rust rendering of spec §4.4's "ready operation queue" —
/// and pokes the context's [`WakeNotify`] in case a worker is blocked.
pub struct TaskSlot {
    id: u64,
    future: SpinLock<Option<BoxFuture>>,
    queue: Weak<OpQueue<Arc<TaskSlot>>>,
    notify: Weak<dyn WakeNotify>,
}

impl Wake for TaskSlot {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(queue) = self.queue.upgrade() {
            queue.enqueue(Arc::clone(self));
        }
        if let Some(notify) = self.notify.upgrade() {
            notify.notify();
        }
    }
}

/// Shared ready-queue plus the work counter every context tracks (spec
/// §3: "a work counter — number of outstanding scheduled operations").
pub struct ReadyQueue {
    queue: Arc<OpQueue<Arc<TaskSlot>>>,
    next_id: AtomicU64,
    work_count: AtomicUsize,
    notify: Arc<dyn WakeNotify>,
}

impl ReadyQueue {
    pub fn new(notify: Arc<dyn WakeNotify>) -> Self {
        Self {
            queue: Arc::new(OpQueue::new()),
            next_id: AtomicU64::new(1),
            work_count: AtomicUsize::new(0),
            notify,
        }
    }

    pub fn work_count(&self) -> usize {
        self.work_count.load(Ordering::Acquire)
    }

    pub fn work_inc(&self) {
        self.work_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn work_dec(&self) -> usize {
        self.work_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Boxes `fut`, wraps it in a fresh [`TaskSlot`] and enqueues it ready
    /// to run. Bumps the work counter; the executor decrements it once
    /// the task runs to completion (see [`ReadyQueue::run_one`]).
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(TaskSlot {
            id,
            future: SpinLock::new(Some(Box::pin(fut))),
            queue: Arc::downgrade(&self.queue),
            notify: Arc::downgrade(&self.notify),
        });
        self.work_inc();
        self.queue.enqueue(slot);
        self.notify.notify();
    }

    pub fn queue_handle(&self) -> Arc<OpQueue<Arc<TaskSlot>>> {
        Arc::clone(&self.queue)
    }

    pub fn notify_handle(&self) -> Arc<dyn WakeNotify> {
        Arc::clone(&self.notify)
    }

    /// Pops and polls one ready task, if any. Returns `true` iff a task
    /// was polled (whether or not it completed).
    pub fn run_one(&self) -> bool {
        let Some(slot) = self.queue.try_dequeue() else {
            return false;
        };
        self.poll_slot(&slot);
        true
    }

    fn poll_slot(&self, slot: &Arc<TaskSlot>) {
        let mut guard = slot.future.lock();
        let Some(mut fut) = guard.take() else {
            // Already completed and possibly spuriously woken again.
            return;
        };
        drop(guard);
        let waker: Waker = Waker::from(Arc::clone(slot));
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Pending => {
                *slot.future.lock() = Some(fut);
            }
            Poll::Ready(()) => {
                self.work_dec();
            }
        }
    }
}

impl TaskSlot {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A sender completing with `value(())` only after one extra trip through
/// the ready queue — the Rust rendering of spec §4.2's scheduler contract
/// ("the sender's value completion signifies we are now running on this
/// scheduler"). Any executor built on [`ReadyQueue`]'s `Waker`s re-enqueues
/// a task that calls `wake_by_ref` and returns `Pending`, which is exactly
/// what's needed here: works for `time_loop` and `epoll_reactor` alike
/// without either needing a bespoke `schedule` sender type.
pub struct ScheduleOnQueue {
    yielded: bool,
}

impl Future for ScheduleOnQueue {
    type Output = rt_core::Completion<(), std::convert::Infallible>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(rt_core::Completion::Value(()));
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

pub fn schedule_on_queue() -> ScheduleOnQueue {
    ScheduleOnQueue { yielded: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn notify() -> Arc<dyn WakeNotify> {
        Parker::new() as Arc<dyn WakeNotify>
    }

    #[test]
    fn spawn_and_drain_runs_to_completion() {
        let rq = ReadyQueue::new(notify());
        let done = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&done);
        rq.spawn(async move {
            d.store(true, Ordering::SeqCst);
        });
        assert_eq!(rq.work_count(), 1);
        while rq.run_one() {}
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(rq.work_count(), 0);
    }

    #[test]
    fn pending_future_is_requeued_on_wake() {
        struct YieldOnce(bool);
        impl Future for YieldOnce {
            type Output = ();
            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                if self.0 {
                    Poll::Ready(())
                } else {
                    self.0 = true;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }
        }

        let rq = ReadyQueue::new(notify());
        rq.spawn(YieldOnce(false));
        assert!(rq.run_one());
        assert_eq!(rq.work_count(), 1);
        assert!(rq.run_one());
        assert_eq!(rq.work_count(), 0);
    }
}
