//! `when_all` (spec §4.2): parallel start, completes with `value(v1..vn)`
//! only once every child has completed with a value; the first non-value
//! completion seen is remembered and delivered only after every sibling
//! has also finished (spec: "first non-value completion is remembered
//! and delivered after all children finish").
//!
//! Ground: `coio/when_all.h`'s completion bookkeeping, rendered as a
//! `join!`-style combinator over `Future`s — each outer `poll` call polls
//! every not-yet-finished child with the same waker, which is sufficient
//! here because every child sender in this workspace (timers, `just`,
//! I/O ops) already registers its own waker with whatever it's actually
//! waiting on; this combinator doesn't need a per-child waker indirection
//! on top of that.
//!
//! Implemented for arities 2 and 3 directly (the shapes spec §8's
//! worked scenarios exercise) rather than through a variadic macro —
//! three concrete structs are less machinery than a hygienic tuple
//! macro for a combinator only ever used at small, fixed arities.

use rt_core::Completion;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

enum Slot<S: Future> {
    Pending(S),
    Done(S::Output),
    Taken,
}

impl<S: Future + Unpin> Slot<S> {
    fn poll_if_pending(&mut self, cx: &mut Context<'_>) {
        if let Slot::Pending(s) = self {
            if let Poll::Ready(v) = Pin::new(s).poll(cx) {
                *self = Slot::Done(v);
            }
        }
    }

    fn is_done(&self) -> bool {
        matches!(self, Slot::Done(_))
    }

    fn take(&mut self) -> S::Output {
        match std::mem::replace(self, Slot::Taken) {
            Slot::Done(v) => v,
            _ => panic!("when_all: slot taken before it was done"),
        }
    }
}

pub struct WhenAll2<S1, S2>
where
    S1: Future,
    S2: Future,
{
    a: Slot<S1>,
    b: Slot<S2>,
}

impl<T1, T2, E, S1, S2> Future for WhenAll2<S1, S2>
where
    S1: Future<Output = Completion<T1, E>> + Unpin,
    S2: Future<Output = Completion<T2, E>> + Unpin,
{
    type Output = Completion<(T1, T2), E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.a.poll_if_pending(cx);
        this.b.poll_if_pending(cx);
        if !(this.a.is_done() && this.b.is_done()) {
            return Poll::Pending;
        }
        let a = this.a.take();
        let b = this.b.take();
        Poll::Ready(match (a, b) {
            (Completion::Value(v1), Completion::Value(v2)) => Completion::Value((v1, v2)),
            (Completion::Error(e), _) | (_, Completion::Error(e)) => Completion::Error(e),
            _ => Completion::Stopped,
        })
    }
}

/// Starts `s1` and `s2` together; completes with `(v1, v2)` only if both
/// complete with a value (spec §4.2 `when_all`, spec §8 round-trip law
/// `sync_wait(when_all(just(a), just(b))) == Some((a, b))`).
pub fn when_all2<T1, T2, E, S1, S2>(s1: S1, s2: S2) -> WhenAll2<S1, S2>
where
    S1: Future<Output = Completion<T1, E>> + Unpin,
    S2: Future<Output = Completion<T2, E>> + Unpin,
{
    WhenAll2 {
        a: Slot::Pending(s1),
        b: Slot::Pending(s2),
    }
}

pub struct WhenAll3<S1, S2, S3>
where
    S1: Future,
    S2: Future,
    S3: Future,
{
    a: Slot<S1>,
    b: Slot<S2>,
    c: Slot<S3>,
}

impl<T1, T2, T3, E, S1, S2, S3> Future for WhenAll3<S1, S2, S3>
where
    S1: Future<Output = Completion<T1, E>> + Unpin,
    S2: Future<Output = Completion<T2, E>> + Unpin,
    S3: Future<Output = Completion<T3, E>> + Unpin,
{
    type Output = Completion<(T1, T2, T3), E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.a.poll_if_pending(cx);
        this.b.poll_if_pending(cx);
        this.c.poll_if_pending(cx);
        if !(this.a.is_done() && this.b.is_done() && this.c.is_done()) {
            return Poll::Pending;
        }
        let a = this.a.take();
        let b = this.b.take();
        let c = this.c.take();
        Poll::Ready(match (a, b, c) {
            (Completion::Value(v1), Completion::Value(v2), Completion::Value(v3)) => {
                Completion::Value((v1, v2, v3))
            }
            (Completion::Error(e), _, _) | (_, Completion::Error(e), _) | (_, _, Completion::Error(e)) => {
                Completion::Error(e)
            }
            _ => Completion::Stopped,
        })
    }
}

/// Three-way [`when_all2`] (spec §8 scenario 1: "two concurrent sleeps").
pub fn when_all3<T1, T2, T3, E, S1, S2, S3>(s1: S1, s2: S2, s3: S3) -> WhenAll3<S1, S2, S3>
where
    S1: Future<Output = Completion<T1, E>> + Unpin,
    S2: Future<Output = Completion<T2, E>> + Unpin,
    S3: Future<Output = Completion<T3, E>> + Unpin,
{
    WhenAll3 {
        a: Slot::Pending(s1),
        b: Slot::Pending(s2),
        c: Slot::Pending(s3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_core::{just, just_error, just_stopped};
    use std::task::{RawWaker, RawWakerVTable, Waker};

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
    fn when_all2_combines_two_values() {
        let c = block_on(when_all2(just::<i32, ()>(1), just::<&str, ()>("x")));
        assert_eq!(c, Completion::Value((1, "x")));
    }

    #[test]
    fn when_all2_forwards_first_error() {
        let c: Completion<(i32, i32), &str> =
            block_on(when_all2(just_error(Box::leak(Box::new("")) as &str), just(2)));
        assert!(matches!(c, Completion::Error(_)));
    }

    #[test]
    fn when_all2_forwards_stopped() {
        let c: Completion<(i32, i32), ()> = block_on(when_all2(just(1), just_stopped()));
        assert_eq!(c, Completion::Stopped);
    }
}
