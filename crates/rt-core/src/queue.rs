//! The ready operation queue (spec §4.4.3).
//!
//! A multi-producer FIFO guarded by a short-critical-section spin lock on
//! the tail — spec.md itself describes this as "lock-free" loosely; the
//! actual guarantee is that no producer blocks for longer than it takes to
//! splice a handful of pointers. Ground: `coio/detail/op_queue.h`'s
//! `op_queue<Op>` (intrusive, `splice`/`bulk_enqueue`), reimplemented here
//! over a `VecDeque` guarded by [`crate::spinlock::SpinLock`] — the
//! teacher's own `SpinLock<VecDeque<T>>` idiom (`gvthread-core::channel`,
//! `gvthread-runtime::ready_queue::simple::GlobalQueue`) rather than a raw
//! intrusive pointer list, since ownership of queued operations in this
//! runtime is through `Box`, not a caller-owned stack frame.

use crate::spinlock::SpinLock;
use std::collections::VecDeque;

pub struct OpQueue<T> {
    items: SpinLock<VecDeque<T>>,
}

impl<T> Default for OpQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OpQueue<T> {
    pub fn new() -> Self {
        Self {
            items: SpinLock::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// Inserts a range of items under a single lock acquisition.
    pub fn bulk_enqueue<I: IntoIterator<Item = T>>(&self, items: I) -> usize {
        let mut guard = self.items.lock();
        let before = guard.len();
        guard.extend(items);
        guard.len() - before
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Atomically appends `other`'s contents to the end of `self`, leaving
    /// `other` empty.
    pub fn splice(&self, other: &OpQueue<T>) {
        let mut other_items = other.items.lock();
        if other_items.is_empty() {
            return;
        }
        let drained: VecDeque<T> = std::mem::take(&mut *other_items);
        drop(other_items);
        self.items.lock().extend(drained);
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let q = OpQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.try_dequeue(), Some(1));
        assert_eq!(q.try_dequeue(), Some(2));
        assert_eq!(q.try_dequeue(), Some(3));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn bulk_enqueue_and_splice() {
        let q = OpQueue::new();
        assert_eq!(q.bulk_enqueue([1, 2, 3]), 3);
        let other = OpQueue::new();
        other.enqueue(4);
        other.enqueue(5);
        q.splice(&other);
        assert!(other.is_empty());
        assert_eq!(q.len(), 5);
        assert_eq!(q.try_dequeue(), Some(1));
    }
}
