//! `signal_set` (spec §6 "Signal set (Linux only)", detailed further in
//! SPEC_FULL.md §3). Ground: `coio/utils/signal_set.h`'s self-pipe
//! demultiplexing design, generalized from `ksvc-gvthread::reactor`'s
//! own self-pipe wake path (`ReactorShared`'s interrupter, the same
//! mechanism `rt_runtime::epoll_reactor::PipeNotify` already uses for
//! cross-thread wakeups) to signal delivery instead of scheduler wakeup.
//!
//! A signal handler may only call async-signal-safe functions, which
//! rules out touching a `Mutex` or waking a `Waker` directly from it. The
//! handler's entire job is therefore a single `write(2)` of the signum
//! byte into a process-wide self-pipe; a plain background thread (not
//! the signal handler) reads that pipe and does the real demultiplexing
//! and waking, exactly mirroring `signal_set.h`'s "handler writes the
//! signum through a self-pipe to a background watcher thread."

use rt_core::error::{IoError, IoResult};
use rt_core::Completion;
use std::collections::HashSet;
use std::future::Future;
use std::os::fd::{AsRawFd, OwnedFd};
use std::pin::Pin;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, Once, OnceLock, Weak};
use std::task::{Context, Poll, Waker};

static WATCHER: Once = Once::new();
static WRITER_FD: AtomicI32 = AtomicI32::new(-1);
static INSTALLED: OnceLock<Mutex<HashSet<i32>>> = OnceLock::new();
static SUBSCRIBERS: OnceLock<Mutex<Vec<(i32, Weak<Inner>)>>> = OnceLock::new();

fn installed() -> &'static Mutex<HashSet<i32>> {
    INSTALLED.get_or_init(|| Mutex::new(HashSet::new()))
}

fn subscribers() -> &'static Mutex<Vec<(i32, Weak<Inner>)>> {
    SUBSCRIBERS.get_or_init(|| Mutex::new(Vec::new()))
}

extern "C" fn relay_to_pipe(signum: libc::c_int) {
    let fd = WRITER_FD.load(Ordering::Acquire);
    if fd >= 0 {
        let byte = signum as u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

fn ensure_watcher() -> IoResult<()> {
    let mut result = Ok(());
    WATCHER.call_once(|| {
        result = (|| -> IoResult<()> {
            let (reader, writer): (OwnedFd, OwnedFd) =
                nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).map_err(IoError::from)?;
            WRITER_FD.store(writer.as_raw_fd(), Ordering::Release);
            std::mem::forget(writer);
            std::thread::spawn(move || watcher_loop(reader));
            Ok(())
        })();
    });
    result
}

fn watcher_loop(reader: OwnedFd) {
    let mut byte = [0u8; 1];
    loop {
        match nix::unistd::read(&reader, &mut byte) {
            Ok(1) => dispatch(byte[0] as i32),
            Ok(0) => break,
            Ok(_) => continue,
            Err(nix::Error::EINTR) => continue,
            Err(_) => break,
        }
    }
}

fn dispatch(signum: i32) {
    let subs = subscribers().lock().unwrap();
    for (sig, weak) in subs.iter() {
        if *sig != signum {
            continue;
        }
        if let Some(inner) = weak.upgrade() {
            let mut state = inner.state.lock().unwrap();
            state.pending.push_back(signum);
            if let Some(waker) = state.waker.take() {
                waker.wake();
            }
        }
    }
}

fn install(signum: i32) -> IoResult<()> {
    let mut set = installed().lock().unwrap();
    if set.contains(&signum) {
        return Ok(());
    }
    let handler = nix::sys::signal::SigHandler::Handler(relay_to_pipe);
    let action = nix::sys::signal::SigAction::new(
        handler,
        nix::sys::signal::SaFlags::SA_RESTART,
        nix::sys::signal::SigSet::empty(),
    );
    let sig = nix::sys::signal::Signal::try_from(signum)
        .map_err(|_| IoError::InvalidArgument(format!("not a valid signal number: {signum}")))?;
    unsafe { nix::sys::signal::sigaction(sig, &action) }.map_err(IoError::from)?;
    set.insert(signum);
    Ok(())
}

#[derive(Default)]
struct State {
    pending: std::collections::VecDeque<i32>,
    waker: Option<Waker>,
}

struct Inner {
    state: Mutex<State>,
}

/// `signal_set` (spec §6, §8 scenario 6): watches a fixed set of signal
/// numbers, installed per-process and deduplicated across every
/// `SignalSet` that names the same signal.
pub struct SignalSet {
    signums: Vec<i32>,
    inner: std::sync::Arc<Inner>,
}

impl SignalSet {
    /// Builds an empty set; call [`SignalSet::add`] for each signal to
    /// watch.
    pub fn new() -> IoResult<Self> {
        ensure_watcher()?;
        Ok(Self {
            signums: Vec::new(),
            inner: std::sync::Arc::new(Inner {
                state: Mutex::new(State::default()),
            }),
        })
    }

    /// `signal_set{sigs...}`.
    pub fn with(signums: impl IntoIterator<Item = i32>) -> IoResult<Self> {
        let mut set = Self::new()?;
        for s in signums {
            set.add(s)?;
        }
        Ok(set)
    }

    /// `signal_set::add(signum)`: installs the per-process handler
    /// (deduplicated) and registers this set as a listener for `signum`.
    pub fn add(&mut self, signum: i32) -> IoResult<()> {
        install(signum)?;
        if !self.signums.contains(&signum) {
            self.signums.push(signum);
            subscribers()
                .lock()
                .unwrap()
                .push((signum, std::sync::Arc::downgrade(&self.inner)));
        }
        Ok(())
    }

    pub fn remove(&mut self, signum: i32) {
        self.signums.retain(|s| *s != signum);
        subscribers().lock().unwrap().retain(|(sig, weak)| {
            *sig != signum || !weak.ptr_eq(&std::sync::Arc::downgrade(&self.inner))
        });
    }

    /// `cancel()`: wakes a pending `async_wait()` with `Stopped`.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.pending.push_front(-1);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }

    /// `async_wait()`: completes with the caught signum, or `Stopped` if
    /// [`SignalSet::cancel`] runs first (spec §6).
    pub fn async_wait(&self) -> AsyncWait {
        AsyncWait {
            inner: std::sync::Arc::clone(&self.inner),
        }
    }
}

pub struct AsyncWait {
    inner: std::sync::Arc<Inner>,
}

impl Future for AsyncWait {
    type Output = Completion<i32, IoError>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.inner.state.lock().unwrap();
        match state.pending.pop_front() {
            Some(-1) => Poll::Ready(Completion::Stopped),
            Some(signum) => Poll::Ready(Completion::Value(signum)),
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::{RawWaker, RawWakerVTable, Waker};

    fn noop_waker() -> Waker {
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }

    #[test]
    fn cancel_completes_a_pending_wait_with_stopped() {
        let set = SignalSet::new().unwrap();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut wait = set.async_wait();
        let mut wait = unsafe { Pin::new_unchecked(&mut wait) };
        assert!(wait.as_mut().poll(&mut cx).is_pending());
        set.cancel();
        assert!(matches!(wait.as_mut().poll(&mut cx), Poll::Ready(Completion::Stopped)));
    }

    #[test]
    fn dispatch_delivers_to_every_matching_subscriber() {
        let mut a = SignalSet::new().unwrap();
        a.add(libc::SIGUSR1).unwrap();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut wait = a.async_wait();
        let mut wait = unsafe { Pin::new_unchecked(&mut wait) };
        assert!(wait.as_mut().poll(&mut cx).is_pending());
        dispatch(libc::SIGUSR1);
        assert!(matches!(
            wait.as_mut().poll(&mut cx),
            Poll::Ready(Completion::Value(n)) if n == libc::SIGUSR1
        ));
    }
}
