//! # rt
//!
//! The task abstraction and structural combinators (spec §4.2–§4.3, §4.7)
//! built on top of `rt_core`'s sender/receiver algebra and `rt_runtime`'s
//! execution contexts: `Task`/`SharedTask`, `when_all`/`when_any`,
//! `continues_on`/`starts_on`/`on`, `sync_wait`, `into_variant`/
//! `when_all_with_variant`, and a minimal `Generator`.
//!
//! `then`/`upon_error`/`upon_stopped`/`let_value`/`let_error`/
//! `let_stopped`/`stop_when`/`stopped_as_optional`/`stopped_as_error`/
//! `just`/`just_error`/`just_stopped` live in `rt_core::sender` — they
//! need no execution-context dependency, so they're re-exported here for
//! convenience rather than duplicated.

pub mod generator;
pub mod schedule_adaptors;
pub mod shared_task;
pub mod sync_wait;
pub mod task;
pub mod variant;
pub mod when_all;
pub mod when_any;

pub use generator::Generator;
pub use schedule_adaptors::{continues_on, on, starts_on, ContinuesOn, StartsOn};
pub use shared_task::{SharedTask, SharedTaskHandle};
pub use sync_wait::{sync_wait, sync_wait_with_scheduler, SyncWaitScope};
pub use task::{current_stop_token, with_stop_token, FrameAllocator, SystemFrameAllocator, Task};
pub use variant::{into_variant, when_all_with_variant2, IntoVariant};
pub use when_all::{when_all2, when_all3, WhenAll2, WhenAll3};
pub use when_any::{when_any2, when_any3, WhenAny2, WhenAny3};

pub use rt_core::{
    just, just_error, just_stopped, let_error, let_stopped, let_value, stop_when,
    stopped_as_error, stopped_as_optional, then, upon_error, upon_stopped, Completion, IoScheduler,
    Scheduler, Sender, TimedScheduler,
};
