//! Min-heap timer backend.
//!
//! Ground: `gvthread-runtime::timer::impls::heap::HeapTimerBackend` — same
//! `BinaryHeap` + lazy-`HashSet`-cancellation shape, carried over nearly
//! verbatim. That backend's `TimerEntry` carries a `gvt_id`/`worker_affinity`
//! pair because it wakes a specific green-thread on a specific worker; a
//! task here is an arbitrary `Future`, so each entry instead carries an
//! `Arc<TimerShared>` — the cell a `Sleep` sender polls and the `Waker` it
//! parks there. `coio/detail/op_queue.h`'s `timer_queue<Op, Proj,
//! Allocator>::add` additionally reports whether the new entry became the
//! new earliest deadline, which a reactor uses to decide whether it needs
//! to re-arm its blocking-wait timeout; `insert` here mirrors that by
//! returning the same bool.

use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Waker;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Shared cell between a pending `Sleep` sender and the backend that will
/// wake it. `fired` is the authoritative completion flag; the `Sleep`
/// sender's `poll` checks it directly rather than trusting wakeup alone,
/// since spurious wakes are always legal.
#[derive(Debug)]
pub struct TimerShared {
    fired: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl TimerShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicBool::new(false),
            waker: Mutex::new(None),
        })
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub fn set_waker(&self, waker: &Waker) {
        let mut guard = self.waker.lock().unwrap();
        match &*guard {
            Some(existing) if existing.will_wake(waker) => {}
            _ => *guard = Some(waker.clone()),
        }
    }

    fn fire(&self) {
        self.fired.store(true, Ordering::Release);
        if let Some(waker) = self.waker.lock().unwrap().take() {
            waker.wake();
        }
    }
}

struct HeapEntry {
    deadline: Instant,
    handle: TimerHandle,
    shared: Arc<TimerShared>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.handle == other.handle
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so `BinaryHeap` (a max-heap) behaves as a min-heap on
        // deadline; ties break on handle for a deterministic fire order.
        match other.deadline.cmp(&self.deadline) {
            std::cmp::Ordering::Equal => other.handle.0.cmp(&self.handle.0),
            ord => ord,
        }
    }
}

struct Inner {
    heap: BinaryHeap<HeapEntry>,
    cancelled: HashSet<TimerHandle>,
}

/// A `Sync` min-heap of pending deadlines, shared by `time_loop` and
/// `epoll_reactor` to compute "how long until the next timer fires".
pub struct TimerHeap {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerHeap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                cancelled: HashSet::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Inserts a new deadline, returning its handle, the shared wake cell
    /// a `Sleep` sender polls, and whether this deadline is now the
    /// earliest pending one.
    pub fn insert(&self, deadline: Instant) -> (TimerHandle, Arc<TimerShared>, bool) {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let shared = TimerShared::new();
        let mut inner = self.inner.lock().unwrap();
        let became_earliest = inner
            .heap
            .peek()
            .is_none_or(|top| deadline < top.deadline);
        inner.heap.push(HeapEntry {
            deadline,
            handle,
            shared: Arc::clone(&shared),
        });
        (handle, shared, became_earliest)
    }

    /// Lazily cancels a handle; the entry is dropped from the heap the
    /// next time it would otherwise fire or during `gc`.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        self.inner.lock().unwrap().cancelled.insert(handle)
    }

    /// Wakes every entry whose deadline has passed, returning how many
    /// fired.
    pub fn fire_expired(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut fired = Vec::new();
        while let Some(top) = inner.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = inner.heap.pop().unwrap();
            if inner.cancelled.remove(&entry.handle) {
                continue;
            }
            fired.push(entry.shared);
        }
        if inner.heap.is_empty() {
            inner.cancelled.clear();
        }
        drop(inner);
        let count = fired.len();
        for shared in fired {
            shared.fire();
        }
        count
    }

    /// The soonest pending, non-cancelled deadline, if any. Approximate
    /// in the presence of cancellation: a cancelled entry sitting at the
    /// top is not skipped here, only at `fire_expired` time, matching the
    /// teacher's documented trade-off.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.lock().unwrap().heap.peek().map(|e| e.deadline)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.heap.len().saturating_sub(inner.cancelled.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fires_in_deadline_order() {
        let heap = TimerHeap::new();
        let now = Instant::now();
        let (_h3, s3, _) = heap.insert(now + Duration::from_millis(30));
        let (_h1, s1, became_earliest) = heap.insert(now + Duration::from_millis(10));
        let (_h2, s2, _) = heap.insert(now + Duration::from_millis(20));
        assert!(became_earliest);

        heap.fire_expired(now + Duration::from_millis(50));
        assert!(s1.is_fired());
        assert!(s2.is_fired());
        assert!(s3.is_fired());
    }

    #[test]
    fn cancel_suppresses_firing() {
        let heap = TimerHeap::new();
        let now = Instant::now();
        let (handle, shared, _) = heap.insert(now + Duration::from_millis(5));
        assert!(heap.cancel(handle));
        assert!(!heap.cancel(handle));
        heap.fire_expired(now + Duration::from_millis(10));
        assert!(!shared.is_fired());
    }

    #[test]
    fn next_deadline_reports_earliest() {
        let heap = TimerHeap::new();
        let now = Instant::now();
        assert!(heap.next_deadline().is_none());
        heap.insert(now + Duration::from_millis(100));
        let deadline = heap.next_deadline().unwrap();
        assert!(deadline > now);
    }

    #[test]
    fn len_excludes_cancelled() {
        let heap = TimerHeap::new();
        let now = Instant::now();
        let (h, _, _) = heap.insert(now + Duration::from_secs(1));
        assert_eq!(heap.len(), 1);
        heap.cancel(h);
        assert_eq!(heap.len(), 0);
    }
}
