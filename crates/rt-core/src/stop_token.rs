//! Cooperative cancellation: stop sources, stop tokens, stop callbacks.
//!
//! Mirrors the C++ `inplace_stop_source`/`inplace_stop_token` design, with
//! one deliberate change: the source's shared state lives behind an `Arc`
//! instead of a raw non-owning pointer, so a token can never dangle. Tokens
//! are still cheap, `Copy`-free handles that compare equal when they refer
//! to the same source.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

/// A stoppable token: something that can be asked "has stop been requested"
/// and can have a callback registered against it.
///
/// `Callback<F>` is the guard type returned by `register`; dropping it
/// unregisters the callback (or is a no-op if the token can never stop).
pub trait StopToken: Clone {
    type Callback<F: FnMut() + Send + 'static>: Send;

    fn stop_requested(&self) -> bool;
    fn stop_possible(&self) -> bool;
    fn register<F: FnMut() + Send + 'static>(&self, f: F) -> Self::Callback<F>;
}

/// A token that can never be stopped. Registering a callback against it is
/// a pure no-op — the callback is simply dropped, never invoked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NeverStopToken;

impl StopToken for NeverStopToken {
    type Callback<F: FnMut() + Send + 'static> = ();

    fn stop_requested(&self) -> bool {
        false
    }

    fn stop_possible(&self) -> bool {
        false
    }

    fn register<F: FnMut() + Send + 'static>(&self, _f: F) {}
}

struct CallbackEntry {
    id: u64,
    f: Option<Box<dyn FnMut() + Send>>,
}

struct CallbackState {
    callbacks: Vec<CallbackEntry>,
    next_id: u64,
}

struct Inner {
    stopped: AtomicBool,
    state: Mutex<CallbackState>,
    /// id of the callback currently being invoked by `request_stop`, or 0.
    running_id: AtomicU64,
    running_thread: Mutex<Option<ThreadId>>,
}

impl Inner {
    fn register(&self, id: u64, f: Box<dyn FnMut() + Send>) {
        let mut state = self.state.lock().unwrap();
        if self.stopped.load(Ordering::Acquire) {
            drop(state);
            let mut f = f;
            f();
        } else {
            state.callbacks.push(CallbackEntry { id, f: Some(f) });
        }
    }

    fn unregister(&self, id: u64) {
        if self.running_id.load(Ordering::Acquire) == id {
            let my_thread = thread::current().id();
            let running_thread = *self.running_thread.lock().unwrap();
            if running_thread == Some(my_thread) {
                // A callback deregistering itself from within its own
                // invocation: permitted, does not block.
                return;
            }
            while self.running_id.load(Ordering::Acquire) == id {
                std::hint::spin_loop();
            }
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.callbacks.retain(|e| e.id != id);
    }
}

/// Single-owner source of a stop request. Not `Clone`: only the owner may
/// request stop, but any number of [`InplaceStopToken`]s may observe it.
pub struct InplaceStopSource {
    inner: Arc<Inner>,
}

impl Default for InplaceStopSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InplaceStopSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stopped: AtomicBool::new(false),
                state: Mutex::new(CallbackState {
                    callbacks: Vec::new(),
                    next_id: 1,
                }),
                running_id: AtomicU64::new(0),
                running_thread: Mutex::new(None),
            }),
        }
    }

    pub fn get_token(&self) -> InplaceStopToken {
        InplaceStopToken {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn stop_possible(&self) -> bool {
        true
    }

    /// Requests stop. Returns `true` iff this call was the one that
    /// transitioned the source from running to stopped — only that call
    /// runs the registered callbacks, synchronously, LIFO.
    pub fn request_stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        loop {
            let entry = {
                let mut state = self.inner.state.lock().unwrap();
                state.callbacks.pop()
            };
            let Some(mut entry) = entry else { break };
            self.inner.running_id.store(entry.id, Ordering::Release);
            *self.inner.running_thread.lock().unwrap() = Some(thread::current().id());
            if let Some(mut f) = entry.f.take() {
                f();
            }
            self.inner.running_id.store(0, Ordering::Release);
        }
        true
    }
}

/// A non-owning, cheaply-cloneable view of an [`InplaceStopSource`]'s state.
#[derive(Clone)]
pub struct InplaceStopToken {
    inner: Option<Arc<Inner>>,
}

impl Default for InplaceStopToken {
    fn default() -> Self {
        Self { inner: None }
    }
}

impl PartialEq for InplaceStopToken {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}
impl Eq for InplaceStopToken {}

pub struct InplaceStopCallback<F: FnMut() + Send + 'static> {
    id: u64,
    inner: Option<Arc<Inner>>,
    _marker: std::marker::PhantomData<F>,
}

impl<F: FnMut() + Send + 'static> Drop for InplaceStopCallback<F> {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            inner.unregister(self.id);
        }
    }
}

impl StopToken for InplaceStopToken {
    type Callback<F: FnMut() + Send + 'static> = InplaceStopCallback<F>;

    fn stop_requested(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|i| i.stopped.load(Ordering::Acquire))
    }

    fn stop_possible(&self) -> bool {
        self.inner.is_some()
    }

    fn register<F: FnMut() + Send + 'static>(&self, f: F) -> InplaceStopCallback<F> {
        match &self.inner {
            None => InplaceStopCallback {
                id: 0,
                inner: None,
                _marker: std::marker::PhantomData,
            },
            Some(inner) => {
                let id = {
                    let mut state = inner.state.lock().unwrap();
                    let id = state.next_id;
                    state.next_id += 1;
                    id
                };
                inner.register(id, Box::new(f));
                InplaceStopCallback {
                    id,
                    inner: Some(Arc::clone(inner)),
                    _marker: std::marker::PhantomData,
                }
            }
        }
    }
}

/// Wraps a callback so it fires at most once no matter how many times
/// `invoke` is called — used by [`StopCombiner2`] to share one user
/// callback across several inner-token registrations.
struct CallOnce<F: FnMut() + Send + 'static> {
    flag: AtomicBool,
    f: Mutex<F>,
}

impl<F: FnMut() + Send + 'static> CallOnce<F> {
    fn invoke(self: &Arc<Self>) {
        if self
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            (self.f.lock().unwrap())();
        }
    }
}

/// A token whose `stop_requested`/`stop_possible` fold two inner tokens by
/// logical OR. A registered callback fires at most once, whichever inner
/// token trips first.
#[derive(Clone)]
pub struct StopCombiner2<A: StopToken, B: StopToken> {
    a: A,
    b: B,
}

impl<A: StopToken, B: StopToken> StopCombiner2<A, B> {
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }
}

pub struct CombinedCallback<A: StopToken, B: StopToken, F: FnMut() + Send + 'static> {
    _a: A::Callback<CallOnceTrampoline<F>>,
    _b: B::Callback<CallOnceTrampoline<F>>,
}

pub struct CallOnceTrampoline<F: FnMut() + Send + 'static> {
    shared: Arc<CallOnce<F>>,
}

impl<F: FnMut() + Send + 'static> Clone for CallOnceTrampoline<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: FnMut() + Send + 'static> CallOnceTrampoline<F> {
    fn call(&mut self) {
        self.shared.invoke();
    }
}

impl<A: StopToken, B: StopToken> StopToken for StopCombiner2<A, B> {
    type Callback<F: FnMut() + Send + 'static> = CombinedCallback<A, B, F>;

    fn stop_requested(&self) -> bool {
        self.a.stop_requested() || self.b.stop_requested()
    }

    fn stop_possible(&self) -> bool {
        self.a.stop_possible() || self.b.stop_possible()
    }

    fn register<F: FnMut() + Send + 'static>(&self, f: F) -> CombinedCallback<A, B, F> {
        let shared = Arc::new(CallOnce {
            flag: AtomicBool::new(false),
            f: Mutex::new(f),
        });
        let mut t1 = CallOnceTrampoline {
            shared: Arc::clone(&shared),
        };
        let mut t2 = CallOnceTrampoline { shared };
        let cb_a = self.a.register(move || t1.call());
        let cb_b = self.b.register(move || t2.call());
        CombinedCallback { _a: cb_a, _b: cb_b }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_stop_token_is_never_stoppable() {
        let tok = NeverStopToken;
        assert!(!tok.stop_possible());
        assert!(!tok.stop_requested());
    }

    #[test]
    fn request_stop_runs_callbacks_lifo() {
        let src = InplaceStopSource::new();
        let tok = src.get_token();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = Arc::clone(&order);
        let o2 = Arc::clone(&order);
        let _cb1 = tok.register(move || o1.lock().unwrap().push(1));
        let _cb2 = tok.register(move || o2.lock().unwrap().push(2));

        assert!(src.request_stop());
        assert!(!src.request_stop());
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn register_on_already_stopped_runs_synchronously() {
        let src = InplaceStopSource::new();
        src.request_stop();
        let tok = src.get_token();
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        let _cb = tok.register(move || r.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn combiner_is_logical_or_and_fires_once() {
        let src_a = InplaceStopSource::new();
        let src_b = InplaceStopSource::new();
        let combined = StopCombiner2::new(src_a.get_token(), src_b.get_token());
        assert!(!combined.stop_requested());

        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        let _cb = combined.register(move || *c.lock().unwrap() += 1);

        src_a.request_stop();
        assert!(combined.stop_requested());
        src_b.request_stop();
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
