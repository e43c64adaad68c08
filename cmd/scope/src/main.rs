//! Structured-supervision demo (spec §4.5 `async_scope`): three workers
//! are associated with one scope. The second reports an error, which is
//! fatal and trips the scope's own stop source; the slow third worker is
//! cancelled instead of waiting out its own five-second timer. `join()`
//! only resolves once every worker has actually disassociated.

use rt_core::{klog_info, then, Completion, TimedScheduler};
use rt_runtime::epoll_reactor::EpollReactor;
use rt_runtime::sync::AsyncScope;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    rt_core::log::init();
    let reactor = EpollReactor::default();
    let scope = Arc::new(AsyncScope::new());

    let fast = scope.spawn(then(
        reactor.schedule_after(Duration::from_millis(5)),
        |_| {
            klog_info!("fast worker finished cleanly");
            Completion::<(), &'static str>::Value(())
        },
    ));

    let failing = scope.spawn(then(
        reactor.schedule_after(Duration::from_millis(10)),
        |_| {
            klog_info!("second worker reports an error");
            Completion::<(), &'static str>::Error("disk on fire")
        },
    ));

    let slow = scope.spawn(then(
        reactor.schedule_after(Duration::from_secs(5)),
        |_| Completion::<(), &'static str>::Value(()),
    ));

    let rc = reactor.clone();
    reactor.spawn(async move {
        match fast.await {
            Completion::Value(()) => {}
            other => panic!("unexpected outcome for the fast worker: {other:?}"),
        }
        match failing.await {
            Completion::Error("disk on fire") => klog_info!("scope observed the fatal error"),
            other => panic!("unexpected outcome for the failing worker: {other:?}"),
        }
        match slow.await {
            Completion::Stopped => klog_info!("slow worker was cancelled by the scope"),
            other => panic!("expected the slow worker to be stopped, got {other:?}"),
        }

        scope.close();
        match scope.join().await {
            Completion::Value(()) => klog_info!("scope joined: every worker disassociated"),
            other => panic!("unexpected join outcome: {other:?}"),
        }
        rc.request_stop();
    });

    reactor.run();
}
