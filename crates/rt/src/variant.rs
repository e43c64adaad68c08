//! `into_variant` / `when_all_with_variant` (spec §4.2).
//!
//! Ground: `coio/detail/execution.h`'s `into_variant` — in the C++ source
//! a sender's value channel can carry *several* distinct tuple-of-args
//! signatures (e.g. `set_value_t(int)` and `set_value_t(int, int)` both
//! legal for the same sender), and `into_variant` erases that set into a
//! single `std::variant<std::tuple<Args>...>` so heterogeneous senders
//! can be combined uniformly. This workspace's rendering of a sender as
//! `Future<Output = Completion<T, E>>` (see `rt_core::sender`'s module
//! docs) already pins each sender to exactly one value type `T` via
//! Rust's type system, so there is exactly one alternative to erase into
//! — `into_variant` here degenerates to wrapping that single value in a
//! one-element tuple, the same "degenerate to the trivial case" move
//! `rt_core::stop_token`'s `stop_propagator` doc comment already uses for
//! its `Token == Source::Token` specialization.

use rt_core::{Completion, Sender};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

pub struct IntoVariant<S>(S);

impl<S: Sender + Unpin> Future for IntoVariant<S> {
    type Output = Completion<(S::Value,), S::Error>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().0)
            .poll(cx)
            .map(|c| c.map_value(|v| (v,)))
    }
}

/// Wraps `sender`'s value channel in a one-element tuple (spec §4.2
/// "Value channel becomes a variant over tuple alternatives").
pub fn into_variant<S: Sender>(sender: S) -> IntoVariant<S> {
    IntoVariant(sender)
}

pub struct WhenAllWithVariant2<S1, S2>
where
    S1: Future,
    S2: Future,
{
    inner: crate::when_all::WhenAll2<IntoVariant<S1>, IntoVariant<S2>>,
}

impl<T1, T2, E, S1, S2> Future for WhenAllWithVariant2<S1, S2>
where
    S1: Sender<Value = T1, Error = E> + Unpin,
    S2: Sender<Value = T2, Error = E> + Unpin,
{
    type Output = Completion<((T1,), (T2,)), E>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().inner).poll(cx)
    }
}

/// `when_all_with_variant(s1, s2)`: like [`crate::when_all::when_all2`]
/// but each child's value is wrapped via [`into_variant`] first, so
/// senders whose value types would otherwise need to match can be
/// combined as long as each is individually well-typed.
pub fn when_all_with_variant2<T1, T2, E, S1, S2>(s1: S1, s2: S2) -> WhenAllWithVariant2<S1, S2>
where
    S1: Sender<Value = T1, Error = E> + Unpin,
    S2: Sender<Value = T2, Error = E> + Unpin,
{
    WhenAllWithVariant2 {
        inner: crate::when_all::when_all2(into_variant(s1), into_variant(s2)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_core::just;
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
    fn into_variant_wraps_the_value_in_a_one_tuple() {
        let c = block_on(into_variant(just::<i32, ()>(9)));
        assert_eq!(c, Completion::Value((9,)));
    }

    #[test]
    fn when_all_with_variant_combines_both_wrapped_values() {
        let c = block_on(when_all_with_variant2(just::<i32, ()>(1), just::<&str, ()>("x")));
        assert_eq!(c, Completion::Value(((1,), ("x",))));
    }
}
