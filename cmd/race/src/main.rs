//! "Race to first" demo (spec §8 scenario 2):
//! `when_any(sleep(2s)→114, sleep(1s)→514, sleep(3s)→1919)` completes at
//! T+1s with `514`, regardless of the order the sleeps were listed in.

use rt_core::{then, Completion, TimedScheduler};
use rt_runtime::TimeLoop;
use std::time::{Duration, Instant};

fn main() {
    rt_core::log::init();
    let loop_ = TimeLoop::default();
    let lc = loop_.clone();

    loop_.spawn(async move {
        let start = Instant::now();
        let a = then(lc.schedule_after(Duration::from_secs(2)), |_| 114);
        let b = then(lc.schedule_after(Duration::from_secs(1)), |_| 514);
        let c = then(lc.schedule_after(Duration::from_secs(3)), |_| 1919);

        let winner = rt::when_any3(a, b, c).await;
        let elapsed = start.elapsed();
        match winner {
            Completion::Value(v) => {
                println!("race winner: {v} after {elapsed:?}");
                assert_eq!(v, 514);
            }
            other => panic!("unexpected race outcome: {other:?}"),
        }
        lc.request_stop();
    });

    loop_.run();
}
