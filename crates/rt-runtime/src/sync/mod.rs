//! Asynchronous synchronization primitives (spec §4.5): a mutex,
//! semaphore, latch, and a scope for bounding a set of spawned
//! operations. Each suspends its caller via the ordinary `Future`
//! machinery rather than blocking an OS thread.

pub mod latch;
pub mod mutex;
pub mod scope;
pub mod semaphore;

pub use latch::AsyncLatch;
pub use mutex::{AsyncMutex, MutexGuard};
pub use scope::AsyncScope;
pub use semaphore::AsyncSemaphore;
