//! Signal wait demo (spec §8 scenario 6):
//! `signal_set{SIGINT, SIGTERM}.async_wait()` completes with the delivered
//! signum once the process receives it, or with `stopped` if `cancel()`
//! runs first.

use rt_core::{klog_info, Completion, TimedScheduler};
use rt_io::SignalSet;
use rt_runtime::epoll_reactor::EpollReactor;
use std::time::Duration;

fn main() {
    rt_core::log::init();
    let reactor = EpollReactor::default();

    // Cancelling before the wait ever observes a delivery yields `stopped`
    // immediately (spec §8 boundary behavior: "a cancellation requested
    // before start yields an immediate stopped without starting
    // underlying work").
    reactor.spawn(async move {
        let cancelled = SignalSet::with([libc::SIGINT, libc::SIGTERM]).expect("signal set");
        cancelled.cancel();
        match cancelled.async_wait().await {
            Completion::Stopped => klog_info!("cancelled wait observed stopped, as expected"),
            other => panic!("expected stopped, got {other:?}"),
        }
    });

    // A set that actually observes a delivered signal (self-raised here
    // so the demo is deterministic without an interactive terminal).
    let delivered_set = SignalSet::with([libc::SIGINT, libc::SIGTERM]).expect("signal set");

    let rc = reactor.clone();
    reactor.spawn(async move {
        match delivered_set.async_wait().await {
            Completion::Value(signum) => {
                klog_info!("received signal {signum}");
                assert!(signum == libc::SIGINT || signum == libc::SIGTERM);
            }
            other => panic!("unexpected wait outcome: {other:?}"),
        }
        rc.request_stop();
    });

    let rc2 = reactor.clone();
    reactor.spawn(async move {
        let _ = rc2.schedule_after(Duration::from_millis(20)).await;
        unsafe {
            libc::raise(libc::SIGTERM);
        }
    });

    reactor.run();
}
