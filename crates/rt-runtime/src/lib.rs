//! # rt-runtime
//!
//! The two execution contexts (spec §4.4): [`time_loop`] for
//! timer-and-continuation-only work, and [`epoll_reactor`] for the same
//! plus readiness-driven I/O, sharing one [`executor`] scaffolding and
//! [`timer`] backend. [`config`] holds their tunables and [`sync`] holds
//! the asynchronous primitives built on top of them.

pub mod config;
pub mod epoll_reactor;
pub mod executor;
pub mod sync;
pub mod time_loop;
pub mod timer;

pub use config::{ReactorConfig, TimeLoopConfig};
pub use epoll_reactor::{EpollReactor, IoHandle, Interest};
pub use executor::{BoxFuture, Parker, ReadyQueue, ScheduleOnQueue, TaskSlot, WakeNotify};
pub use time_loop::TimeLoop;
pub use timer::{Sleep, TimerHandle, TimerHeap};
