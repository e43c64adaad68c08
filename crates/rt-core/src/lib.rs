//! # rt-core
//!
//! Dependency-free-ish primitives shared by the runtime and I/O layers:
//! the stop-token system, lock-free-ish queue/stack structures, the error
//! taxonomy, environment configuration, and leveled logging macros.

pub mod env;
pub mod error;
#[macro_use]
pub mod log;
pub mod queue;
pub mod sender;
pub mod spinlock;
pub mod stack;
pub mod stop_token;

pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};
pub use error::{catch_unwind_as_error, IoError, IoResult};
pub use queue::OpQueue;
pub use sender::{
    just, just_error, just_stopped, let_error, let_stopped, let_value, stop_when,
    stopped_as_error, stopped_as_optional, then, upon_error, upon_stopped, Completion, IoScheduler,
    Scheduler, Sender, TimedScheduler,
};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use stack::{PushResult, WaitStack};
pub use stop_token::{
    InplaceStopCallback, InplaceStopSource, InplaceStopToken, NeverStopToken, StopCombiner2,
    StopToken,
};
