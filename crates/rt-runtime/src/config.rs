//! Execution-context configuration (SPEC_FULL.md §2.1).
//!
//! Ground: `gvthread-runtime::config::SchedulerConfig` — a `Default`-able,
//! builder-style struct whose fields can be overridden from the process
//! environment via the carried-over `rt_core::env::env_get*` helpers. Two
//! siblings here instead of one: `time_loop` and `epoll_reactor` read
//! different knobs, so each gets its own config struct rather than one
//! do-everything bag of optional fields.

use rt_core::{env_get, env_get_str};

/// Configuration for a [`crate::time_loop::TimeLoop`].
#[derive(Debug, Clone)]
pub struct TimeLoopConfig {
    /// Initial capacity reserved in the ready-operation queue.
    pub op_queue_reserve: usize,
    /// Name given to the worker thread(s) spawned for this loop.
    pub thread_name: String,
}

impl Default for TimeLoopConfig {
    fn default() -> Self {
        Self {
            op_queue_reserve: env_get("COIO_RS_TIMELOOP_QUEUE_RESERVE", 256),
            thread_name: env_get_str("COIO_RS_TIMELOOP_THREAD_NAME", "coio-time-loop"),
        }
    }
}

/// Configuration for an [`crate::epoll_reactor::EpollReactor`].
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Maximum number of `epoll_event`s drained per `epoll_wait` call.
    pub max_events_per_wait: usize,
    /// Initial capacity reserved in the ready-operation queue.
    pub op_queue_reserve: usize,
    /// Name given to the worker thread(s) that call `run`.
    pub thread_name: String,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            max_events_per_wait: env_get("COIO_RS_REACTOR_MAX_EVENTS", 256),
            op_queue_reserve: env_get("COIO_RS_REACTOR_QUEUE_RESERVE", 256),
            thread_name: env_get_str("COIO_RS_REACTOR_THREAD_NAME", "coio-reactor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let t = TimeLoopConfig::default();
        assert_eq!(t.thread_name, "coio-time-loop");
        let r = ReactorConfig::default();
        assert_eq!(r.max_events_per_wait, 256);
    }
}
