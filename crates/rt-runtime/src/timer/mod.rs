//! Timer-driven waits: the [`TimerHeap`] backend plus the [`Sleep`] sender
//! built on top of it. Ground: `gvthread-runtime::timer` (module split)
//! and `coio/steady_timer.h` / `coio/timer.h` (the sleep-sender shape).

pub mod heap;

pub use heap::{TimerHandle, TimerHeap, TimerShared};
use rt_core::sender::Completion;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// A sender that completes with a value once `deadline` has passed.
///
/// Dropping a `Sleep` before it fires cancels its entry in the backing
/// heap; the backend itself lives as long as the execution context that
/// owns it, referenced weakly so a leaked `Sleep` can never keep a
/// shut-down context's heap alive.
pub struct Sleep {
    heap: Weak<TimerHeap>,
    state: SleepState,
}

enum SleepState {
    NotStarted(Instant),
    Started {
        handle: TimerHandle,
        shared: Arc<TimerShared>,
    },
}

impl Sleep {
    pub fn new(heap: &Arc<TimerHeap>, deadline: Instant) -> Self {
        Self {
            heap: Arc::downgrade(heap),
            state: SleepState::NotStarted(deadline),
        }
    }

    pub fn for_duration(heap: &Arc<TimerHeap>, duration: Duration) -> Self {
        Self::new(heap, Instant::now() + duration)
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let SleepState::Started { handle, .. } = self.state {
            if let Some(heap) = self.heap.upgrade() {
                heap.cancel(handle);
            }
        }
    }
}

impl Future for Sleep {
    type Output = Completion<(), std::convert::Infallible>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &this.state {
                SleepState::NotStarted(deadline) => {
                    let Some(heap) = this.heap.upgrade() else {
                        // The owning context is gone; nothing will ever
                        // fire this deadline, so behave as already due.
                        return Poll::Ready(Completion::Value(()));
                    };
                    let now = Instant::now();
                    if *deadline <= now {
                        return Poll::Ready(Completion::Value(()));
                    }
                    let (handle, shared, _became_earliest) = heap.insert(*deadline);
                    shared.set_waker(cx.waker());
                    this.state = SleepState::Started { handle, shared };
                }
                SleepState::Started { shared, .. } => {
                    if shared.is_fired() {
                        return Poll::Ready(Completion::Value(()));
                    }
                    shared.set_waker(cx.waker());
                    return Poll::Pending;
                }
            }
        }
    }
}
