//! `continues_on`, `starts_on`, `on` (spec §4.2).
//!
//! Ground: `coio/detail/execution.h`'s `continue_on`/`schedule_from`
//! adaptors, rendered the same way as the rest of `rt_core::sender` —
//! `Scheduler::schedule()` already returns a plain sender, so "hop onto
//! `sched` before/after running `S`" is just sequencing two `Future`s by
//! hand instead of reifying a scheduler-aware receiver wrapper.

use rt_core::{Completion, Scheduler, Sender};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

enum ContinuesOnState<S, Sch: Scheduler> {
    Running(S),
    Scheduling {
        completion: Option<Completion<S::Value, S::Error>>,
        schedule: Sch::ScheduleSender,
    },
    Done,
}

impl<S: Sender, Sch: Scheduler> ContinuesOnState<S, Sch> {}

/// `continues_on(S, sched)`: after `S` completes, re-schedules onto
/// `sched` before delivering the completion. Spec §4.2: "on failure to
/// schedule, the completion is delivered on whichever execution resource
/// is currently active" — this runtime's `schedule()` senders never fail
/// (their error type is `Infallible`), so that best-effort fallback has
/// no observable case to hit here; recorded in DESIGN.md.
pub struct ContinuesOn<S: Sender, Sch: Scheduler> {
    state: ContinuesOnState<S, Sch>,
    sched: Sch,
}

impl<S, Sch> Future for ContinuesOn<S, Sch>
where
    S: Sender + Unpin,
    Sch: Scheduler,
    Sch::ScheduleSender: Unpin,
{
    type Output = Completion<S::Value, S::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                ContinuesOnState::Running(s) => match Pin::new(s).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(completion) => {
                        this.state = ContinuesOnState::Scheduling {
                            completion: Some(completion),
                            schedule: this.sched.schedule(),
                        };
                    }
                },
                ContinuesOnState::Scheduling {
                    completion,
                    schedule,
                } => match Pin::new(schedule).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(_) => {
                        let completion = completion.take().expect("ContinuesOn polled twice");
                        this.state = ContinuesOnState::Done;
                        return Poll::Ready(completion);
                    }
                },
                ContinuesOnState::Done => panic!("ContinuesOn polled after completion"),
            }
        }
    }
}

pub fn continues_on<S, Sch>(sender: S, sched: Sch) -> ContinuesOn<S, Sch>
where
    S: Sender,
    Sch: Scheduler,
{
    ContinuesOn {
        state: ContinuesOnState::Running(sender),
        sched,
    }
}

enum StartsOnState<S, Sch: Scheduler> {
    Scheduling(Sch::ScheduleSender),
    Running(S),
    Done,
}

/// `starts_on(sched, S)`: first schedules onto `sched`, then runs `S`.
pub struct StartsOn<S, Sch: Scheduler> {
    state: StartsOnState<S, Sch>,
    make_sender: Option<Box<dyn FnOnce() -> S + Send>>,
}

impl<S, Sch> Future for StartsOn<S, Sch>
where
    S: Sender + Unpin,
    Sch: Scheduler,
    Sch::ScheduleSender: Unpin,
{
    type Output = Completion<S::Value, S::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                StartsOnState::Scheduling(schedule) => match Pin::new(schedule).poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(_) => {
                        let make = this.make_sender.take().expect("StartsOn polled twice");
                        this.state = StartsOnState::Running(make());
                    }
                },
                StartsOnState::Running(s) => {
                    let r = Pin::new(s).poll(cx);
                    if r.is_pending() {
                        return Poll::Pending;
                    }
                    this.state = StartsOnState::Done;
                    return r;
                }
                StartsOnState::Done => panic!("StartsOn polled after completion"),
            }
        }
    }
}

/// `starts_on(sched, make_sender)`. `make_sender` is deferred (rather than
/// taking `S` directly) so the underlying sender isn't constructed — and
/// doesn't start doing work a non-lazy sender might do at construction —
/// until `sched` has actually scheduled us.
pub fn starts_on<S, Sch, F>(sched: Sch, make_sender: F) -> StartsOn<S, Sch>
where
    S: Sender,
    Sch: Scheduler,
    F: FnOnce() -> S + Send + 'static,
{
    StartsOn {
        state: StartsOnState::Scheduling(sched.schedule()),
        make_sender: Some(Box::new(make_sender)),
    }
}

/// `on(sched, S) = starts_on(sched, continues_on(S, sched))` (spec §4.2).
pub fn on<S, Sch>(sched: Sch, sender: S) -> StartsOn<ContinuesOn<S, Sch>, Sch>
where
    S: Sender + Unpin + Send + 'static,
    Sch: Scheduler + Send + 'static,
    Sch::ScheduleSender: Unpin,
{
    let sched_for_continue = sched.clone();
    starts_on(sched, move || continues_on(sender, sched_for_continue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_core::just;
    use rt_runtime::TimeLoop;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn continues_on_hops_through_the_queue_before_completing() {
        let loop_ = TimeLoop::default();
        let done = Arc::new(AtomicBool::new(false));
        let d = Arc::clone(&done);
        let lc = loop_.clone();
        loop_.spawn(async move {
            let c = continues_on(just::<i32, ()>(7), lc.clone()).await;
            assert_eq!(c, Completion::Value(7));
            d.store(true, Ordering::SeqCst);
            lc.request_stop();
        });
        loop_.run();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn starts_on_defers_construction_until_scheduled() {
        let loop_ = TimeLoop::default();
        let built = Arc::new(AtomicBool::new(false));
        let b = Arc::clone(&built);
        let lc = loop_.clone();
        loop_.spawn(async move {
            let c = starts_on(lc.clone(), move || {
                b.store(true, Ordering::SeqCst);
                just::<i32, ()>(9)
            })
            .await;
            assert_eq!(c, Completion::Value(9));
            lc.request_stop();
        });
        assert!(!built.load(Ordering::SeqCst));
        loop_.run();
        assert!(built.load(Ordering::SeqCst));
    }

    #[test]
    fn on_schedules_then_continues_on_the_same_scheduler() {
        let loop_ = TimeLoop::default();
        let lc = loop_.clone();
        loop_.spawn(async move {
            let c = on(lc.clone(), just::<i32, ()>(5)).await;
            assert_eq!(c, Completion::Value(5));
            lc.request_stop();
        });
        loop_.run();
    }
}
