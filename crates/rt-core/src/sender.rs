//! Sender/receiver algebra (spec §4.2), rendered atop `std::future::Future`.
//!
//! The C++ source reifies `connect`/`start`/`set_value`/`set_error`/
//! `set_stopped` as a bespoke protocol because C++ has no native coroutine
//! trait to piggyback on. Rust already has one: `Future::poll` *is* the
//! connect/start/set_value protocol — polling to `Ready` is "start", and
//! the `Poll::Ready` payload is the completion. This module formalizes
//! that mapping instead of reinventing it:
//!
//! - A **sender** is any `Future<Output = Completion<T, E>>`.
//! - **Connect + start** is simply polling the future (via `.await` or an
//!   executor).
//! - The three receiver channels collapse into the `Completion` enum's
//!   three variants.
//!
//! This is recorded as the primary Open Question resolution in DESIGN.md.

use crate::stop_token::StopToken;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Stand-in for `pin-project`'s generated boilerplate: every struct built
/// with this macro holds plain owned fields and is only ever pinned as a
/// whole; poll bodies project `sender` out manually via
/// `get_unchecked_mut`, which is sound because none of these wrappers ever
/// move `sender` out except through a `Pin`.
macro_rules! pin_project_like {
    ($(#[$meta:meta])* pub struct $name:ident<$($gen:ident),+> { $($field:ident : $ty:ty),+ $(,)? }) => {
        $(#[$meta])*
        pub struct $name<$($gen),+> { $($field: $ty),+ }
    };
}

/// The three-way outcome of a sender, mirroring spec §3's
/// "value / error / stopped" completion set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<T, E> {
    Value(T),
    Error(E),
    Stopped,
}

impl<T, E> Completion<T, E> {
    pub fn map_value<U>(self, f: impl FnOnce(T) -> U) -> Completion<U, E> {
        match self {
            Completion::Value(v) => Completion::Value(f(v)),
            Completion::Error(e) => Completion::Error(e),
            Completion::Stopped => Completion::Stopped,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Completion::Value(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Completion::Stopped)
    }
}

/// Any future completing with one of value/error/stopped is a sender.
pub trait Sender: Future<Output = Completion<<Self as Sender>::Value, <Self as Sender>::Error>> {
    type Value;
    type Error;
}

impl<F, T, E> Sender for F
where
    F: Future<Output = Completion<T, E>>,
{
    type Value = T;
    type Error = E;
}

/// A type providing `schedule() -> Sender` whose value completion means
/// "now running on this scheduler" (spec §4.2).
pub trait Scheduler: Clone {
    type ScheduleSender: Sender<Value = (), Error = std::convert::Infallible>;
    fn schedule(&self) -> Self::ScheduleSender;
}

/// Extends [`Scheduler`] with deadline-based scheduling (spec §4.2
/// "Timed scheduler concept"). Implemented by both `time_loop` and
/// `epoll_reactor`, which share the same timer-heap backend.
pub trait TimedScheduler: Scheduler {
    type SleepSender: Sender<Value = (), Error = std::convert::Infallible>;

    fn now(&self) -> std::time::Instant;
    fn schedule_after(&self, duration: std::time::Duration) -> Self::SleepSender;
    fn schedule_at(&self, deadline: std::time::Instant) -> Self::SleepSender;
}

/// Extends [`Scheduler`] with the ability to adopt a raw file descriptor
/// for reactor-driven I/O (spec §4.2 "I/O scheduler concept"). The actual
/// `schedule_io(io_object, description) -> Sender` entry points live in
/// `rt-io` as free functions/senders parametrized over the concrete
/// reactor handle, since each I/O description (read/write/accept/…) has
/// its own argument and completion shape that doesn't fit one associated
/// type; this trait captures only the "adopt a raw fd" half of the
/// concept, which is reactor-shaped and belongs here.
pub trait IoScheduler: Scheduler {
    type IoObject;
    fn make_io_object(&self, raw_fd: std::os::fd::RawFd) -> Self::IoObject;
}

// ---------------------------------------------------------------------
// just / just_error / just_stopped
// ---------------------------------------------------------------------

pub struct Just<T, E>(Option<T>, std::marker::PhantomData<E>);

impl<T: Unpin, E> Future for Just<T, E> {
    type Output = Completion<T, E>;
    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        Poll::Ready(Completion::Value(self.0.take().expect("Just polled twice")))
    }
}

pub fn just<T: Unpin, E>(value: T) -> Just<T, E> {
    Just(Some(value), std::marker::PhantomData)
}

pub struct JustError<T, E>(Option<E>, std::marker::PhantomData<T>);

impl<T: Unpin, E: Unpin> Future for JustError<T, E> {
    type Output = Completion<T, E>;
    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        Poll::Ready(Completion::Error(
            self.0.take().expect("JustError polled twice"),
        ))
    }
}

pub fn just_error<T: Unpin, E: Unpin>(err: E) -> JustError<T, E> {
    JustError(Some(err), std::marker::PhantomData)
}

pub struct JustStopped<T, E>(std::marker::PhantomData<(T, E)>);

impl<T: Unpin, E: Unpin> Future for JustStopped<T, E> {
    type Output = Completion<T, E>;
    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        Poll::Ready(Completion::Stopped)
    }
}

pub fn just_stopped<T: Unpin, E: Unpin>() -> JustStopped<T, E> {
    JustStopped(std::marker::PhantomData)
}

// ---------------------------------------------------------------------
// then / upon_error / upon_stopped
// ---------------------------------------------------------------------

pin_project_like! {
    /// On value, invokes `f`; its result becomes the new value. Errors and
    /// stopped are forwarded unchanged (spec §4.2 `then`).
    pub struct Then<S, F> { sender: S, f: Option<F> }
}

impl<S, F, U> Future for Then<S, F>
where
    S: Sender,
    F: FnOnce(S::Value) -> U,
{
    type Output = Completion<U, S::Error>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };
        let sender = unsafe { Pin::new_unchecked(&mut this.sender) };
        match sender.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(c) => {
                let f = this.f.take().expect("Then polled after completion");
                Poll::Ready(c.map_value(f))
            }
        }
    }
}

pub fn then<S: Sender, F: FnOnce(S::Value) -> U, U>(sender: S, f: F) -> Then<S, F> {
    Then {
        sender,
        f: Some(f),
    }
}

pin_project_like! {
    pub struct UponError<S, F> { sender: S, f: Option<F> }
}

impl<S, F> Future for UponError<S, F>
where
    S: Sender,
    F: FnOnce(S::Error) -> S::Value,
{
    type Output = Completion<S::Value, std::convert::Infallible>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };
        let sender = unsafe { Pin::new_unchecked(&mut this.sender) };
        match sender.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Completion::Value(v)) => Poll::Ready(Completion::Value(v)),
            Poll::Ready(Completion::Stopped) => Poll::Ready(Completion::Stopped),
            Poll::Ready(Completion::Error(e)) => {
                let f = this.f.take().expect("UponError polled after completion");
                Poll::Ready(Completion::Value(f(e)))
            }
        }
    }
}

pub fn upon_error<S: Sender, F: FnOnce(S::Error) -> S::Value>(
    sender: S,
    f: F,
) -> UponError<S, F> {
    UponError {
        sender,
        f: Some(f),
    }
}

pin_project_like! {
    pub struct UponStopped<S, F> { sender: S, f: Option<F> }
}

impl<S, F> Future for UponStopped<S, F>
where
    S: Sender,
    F: FnOnce() -> S::Value,
{
    type Output = Completion<S::Value, S::Error>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = unsafe { self.get_unchecked_mut() };
        let sender = unsafe { Pin::new_unchecked(&mut this.sender) };
        match sender.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Completion::Value(v)) => Poll::Ready(Completion::Value(v)),
            Poll::Ready(Completion::Error(e)) => Poll::Ready(Completion::Error(e)),
            Poll::Ready(Completion::Stopped) => {
                let f = this.f.take().expect("UponStopped polled after completion");
                Poll::Ready(Completion::Value(f()))
            }
        }
    }
}

pub fn upon_stopped<S: Sender, F: FnOnce() -> S::Value>(sender: S, f: F) -> UponStopped<S, F> {
    UponStopped {
        sender,
        f: Some(f),
    }
}

// ---------------------------------------------------------------------
// let_value / let_error / let_stopped
// ---------------------------------------------------------------------

enum LetState<S, S2> {
    First(S),
    Second(S2),
    Done,
}

pub struct LetValue<S: Sender, F, S2> {
    state: LetState<S, S2>,
    f: Option<F>,
}

impl<S, F, S2> Future for LetValue<S, F, S2>
where
    S: Sender + Unpin,
    S2: Sender<Error = S::Error> + Unpin,
    F: FnOnce(S::Value) -> S2,
{
    type Output = Completion<S2::Value, S::Error>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                LetState::First(s) => match Pin::new(s).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Completion::Value(v)) => {
                        let f = this.f.take().expect("LetValue polled after completion");
                        this.state = LetState::Second(f(v));
                    }
                    Poll::Ready(Completion::Error(e)) => {
                        this.state = LetState::Done;
                        return Poll::Ready(Completion::Error(e));
                    }
                    Poll::Ready(Completion::Stopped) => {
                        this.state = LetState::Done;
                        return Poll::Ready(Completion::Stopped);
                    }
                },
                LetState::Second(s2) => {
                    let r = Pin::new(s2).poll(cx);
                    if r.is_pending() {
                        return Poll::Pending;
                    }
                    this.state = LetState::Done;
                    return r;
                }
                LetState::Done => panic!("LetValue polled after completion"),
            }
        }
    }
}

pub fn let_value<S, F, S2>(sender: S, f: F) -> LetValue<S, F, S2>
where
    S: Sender + Unpin,
    S2: Sender<Error = S::Error> + Unpin,
    F: FnOnce(S::Value) -> S2,
{
    LetValue {
        state: LetState::First(sender),
        f: Some(f),
    }
}

pub struct LetError<S: Sender, F, S2> {
    state: LetState<S, S2>,
    f: Option<F>,
}

impl<S, F, S2> Future for LetError<S, F, S2>
where
    S: Sender + Unpin,
    S2: Sender<Value = S::Value> + Unpin,
    F: FnOnce(S::Error) -> S2,
{
    type Output = Completion<S::Value, S2::Error>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                LetState::First(s) => match Pin::new(s).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Completion::Error(e)) => {
                        let f = this.f.take().expect("LetError polled after completion");
                        this.state = LetState::Second(f(e));
                    }
                    Poll::Ready(Completion::Value(v)) => {
                        this.state = LetState::Done;
                        return Poll::Ready(Completion::Value(v));
                    }
                    Poll::Ready(Completion::Stopped) => {
                        this.state = LetState::Done;
                        return Poll::Ready(Completion::Stopped);
                    }
                },
                LetState::Second(s2) => {
                    let r = Pin::new(s2).poll(cx);
                    if r.is_pending() {
                        return Poll::Pending;
                    }
                    this.state = LetState::Done;
                    return r;
                }
                LetState::Done => panic!("LetError polled after completion"),
            }
        }
    }
}

/// On error, invokes `f` and connects/starts the sender it returns; its
/// completion becomes the combined completion (spec §4.2 `let_error`).
pub fn let_error<S, F, S2>(sender: S, f: F) -> LetError<S, F, S2>
where
    S: Sender + Unpin,
    S2: Sender<Value = S::Value> + Unpin,
    F: FnOnce(S::Error) -> S2,
{
    LetError {
        state: LetState::First(sender),
        f: Some(f),
    }
}

pub struct LetStopped<S: Sender, F, S2> {
    state: LetState<S, S2>,
    f: Option<F>,
}

impl<S, F, S2> Future for LetStopped<S, F, S2>
where
    S: Sender + Unpin,
    S2: Sender<Value = S::Value, Error = S::Error> + Unpin,
    F: FnOnce() -> S2,
{
    type Output = Completion<S::Value, S::Error>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                LetState::First(s) => match Pin::new(s).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Completion::Stopped) => {
                        let f = this.f.take().expect("LetStopped polled after completion");
                        this.state = LetState::Second(f());
                    }
                    Poll::Ready(Completion::Value(v)) => {
                        this.state = LetState::Done;
                        return Poll::Ready(Completion::Value(v));
                    }
                    Poll::Ready(Completion::Error(e)) => {
                        this.state = LetState::Done;
                        return Poll::Ready(Completion::Error(e));
                    }
                },
                LetState::Second(s2) => {
                    let r = Pin::new(s2).poll(cx);
                    if r.is_pending() {
                        return Poll::Pending;
                    }
                    this.state = LetState::Done;
                    return r;
                }
                LetState::Done => panic!("LetStopped polled after completion"),
            }
        }
    }
}

/// On stopped, invokes `f` and connects/starts the sender it returns
/// (spec §4.2 `let_stopped`).
pub fn let_stopped<S, F, S2>(sender: S, f: F) -> LetStopped<S, F, S2>
where
    S: Sender + Unpin,
    S2: Sender<Value = S::Value, Error = S::Error> + Unpin,
    F: FnOnce() -> S2,
{
    LetStopped {
        state: LetState::First(sender),
        f: Some(f),
    }
}

// ---------------------------------------------------------------------
// stop_when
// ---------------------------------------------------------------------

pub struct StopWhen<S, T> {
    sender: S,
    token: T,
}

impl<S, T> Future for StopWhen<S, T>
where
    S: Sender + Unpin,
    T: StopToken,
{
    type Output = Completion<S::Value, S::Error>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.token.stop_requested() {
            return Poll::Ready(Completion::Stopped);
        }
        Pin::new(&mut this.sender).poll(cx)
    }
}

/// Wraps `sender` so that an already- or concurrently-tripped `token`
/// short-circuits it with `Completion::Stopped` (spec §4.1 `stop_when`).
/// A statically unstoppable token makes this a pure pass-through.
pub fn stop_when<S: Sender + Unpin, T: StopToken>(sender: S, token: T) -> StopWhen<S, T> {
    StopWhen { sender, token }
}

// ---------------------------------------------------------------------
// stopped_as_optional / stopped_as_error
// ---------------------------------------------------------------------

pub struct StoppedAsOptional<S>(S);

impl<S: Sender + Unpin> Future for StoppedAsOptional<S> {
    type Output = Completion<Option<S::Value>, S::Error>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().0).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Completion::Value(v)) => Poll::Ready(Completion::Value(Some(v))),
            Poll::Ready(Completion::Error(e)) => Poll::Ready(Completion::Error(e)),
            Poll::Ready(Completion::Stopped) => Poll::Ready(Completion::Value(None)),
        }
    }
}

pub fn stopped_as_optional<S: Sender + Unpin>(sender: S) -> StoppedAsOptional<S> {
    StoppedAsOptional(sender)
}

pub struct StoppedAsError<S, E>(S, std::marker::PhantomData<E>);

impl<S, E> Future for StoppedAsError<S, E>
where
    S: Sender + Unpin,
    E: From<()>,
    S::Error: Into<E>,
{
    type Output = Completion<S::Value, E>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().0).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Completion::Value(v)) => Poll::Ready(Completion::Value(v)),
            Poll::Ready(Completion::Error(e)) => Poll::Ready(Completion::Error(e.into())),
            Poll::Ready(Completion::Stopped) => Poll::Ready(Completion::Error(().into())),
        }
    }
}

pub fn stopped_as_error<S, E>(sender: S) -> StoppedAsError<S, E>
where
    S: Sender + Unpin,
    E: From<()>,
    S::Error: Into<E>,
{
    StoppedAsError(sender, std::marker::PhantomData)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: Future>(mut fut: F) -> F::Output {
        use std::task::{RawWaker, RawWakerVTable, Waker};
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
    fn just_completes_with_value() {
        let c: Completion<i32, ()> = block_on(just(42));
        assert_eq!(c, Completion::Value(42));
    }

    #[test]
    fn then_maps_value() {
        let c = block_on(then(just::<i32, ()>(2), |v| v * 10));
        assert_eq!(c, Completion::Value(20));
    }

    #[test]
    fn upon_error_maps_error_to_value() {
        let c = block_on(upon_error(just_error::<i32, &str>("oops"), |_e| -1));
        assert_eq!(c, Completion::Value(-1));
    }

    #[test]
    fn stop_when_short_circuits_a_tripped_token() {
        use crate::stop_token::InplaceStopSource;
        let src = InplaceStopSource::new();
        src.request_stop();
        let c = block_on(stop_when(just::<i32, ()>(1), src.get_token()));
        assert_eq!(c, Completion::Stopped);
    }

    #[test]
    fn stopped_as_optional_maps_stopped_to_none() {
        let c: Completion<Option<i32>, ()> = block_on(stopped_as_optional(just_stopped()));
        assert_eq!(c, Completion::Value(None));
    }
}
