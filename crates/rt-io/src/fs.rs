//! `stream_file<IoScheduler>` / `random_access_file<IoScheduler>` /
//! `pipe_reader/writer<IoScheduler>` (spec §6 Public types).
//!
//! Ground: `coio/asyncio/file.h` (sequential vs. positional file access
//! as two distinct types rather than one type with an optional offset
//! parameter) and `coio/asyncio/pipe.h`; syscalls via `nix::fcntl::open`/
//! `nix::unistd::{pipe2, close}`, the same crate `rt-runtime::
//! epoll_reactor` already uses for its self-pipe interrupter.

use crate::ops;
use rt_core::error::{IoError, IoResult};
use rt_core::{Completion, IoScheduler};
use rt_runtime::epoll_reactor::IoHandle;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

/// `stream_file<IoScheduler>`: sequential read/write at the kernel's own
/// file offset.
pub struct StreamFile<S: IoScheduler<IoObject = IoHandle>> {
    fd: Option<OwnedFd>,
    io: Option<IoHandle>,
    scheduler: S,
}

impl<S: IoScheduler<IoObject = IoHandle>> StreamFile<S> {
    pub fn open(scheduler: S, path: impl AsRef<Path>, flags: nix::fcntl::OFlag) -> IoResult<Self> {
        let fd = nix::fcntl::open(
            path.as_ref(),
            flags | nix::fcntl::OFlag::O_NONBLOCK,
            nix::sys::stat::Mode::from_bits_truncate(0o644),
        )
        .map_err(IoError::from)?;
        let io = scheduler.make_io_object(fd.as_raw_fd());
        Ok(Self {
            fd: Some(fd),
            io: Some(io),
            scheduler,
        })
    }

    pub fn native_handle(&self) -> RawFd {
        self.io.as_ref().map(IoHandle::fd).unwrap_or(-1)
    }

    pub fn cancel(&self) {
        if let Some(io) = &self.io {
            io.cancel();
        }
    }

    pub fn close(&mut self) -> IoResult<()> {
        self.cancel();
        self.io = None;
        self.fd = None;
        Ok(())
    }

    pub fn release(&mut self) -> IoResult<OwnedFd> {
        self.cancel();
        self.io = None;
        self.fd
            .take()
            .ok_or_else(|| IoError::InvalidArgument("file already closed".into()))
    }

    fn io(&self) -> &IoHandle {
        self.io.as_ref().expect("operation on a closed file")
    }

    pub async fn read_some(&self, buf: &mut [u8]) -> Completion<usize, IoError> {
        ops::ReadSome::new(self.io().clone(), buf, true).await
    }

    pub async fn write_some(&self, buf: &[u8]) -> Completion<usize, IoError> {
        ops::WriteSome::new(self.io().clone(), buf).await
    }

    pub async fn read(&self, buf: &mut [u8]) -> Completion<usize, IoError> {
        ops::async_read(self.io(), buf).await
    }

    pub async fn write(&self, buf: &[u8]) -> Completion<usize, IoError> {
        ops::async_write(self.io(), buf).await
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}

/// `random_access_file<IoScheduler>`: every read/write names its own
/// offset (`pread`/`pwrite`), independent of the kernel's file position.
pub struct RandomAccessFile<S: IoScheduler<IoObject = IoHandle>> {
    fd: Option<OwnedFd>,
    io: Option<IoHandle>,
    scheduler: S,
}

impl<S: IoScheduler<IoObject = IoHandle>> RandomAccessFile<S> {
    pub fn open(scheduler: S, path: impl AsRef<Path>, flags: nix::fcntl::OFlag) -> IoResult<Self> {
        let fd = nix::fcntl::open(
            path.as_ref(),
            flags | nix::fcntl::OFlag::O_NONBLOCK,
            nix::sys::stat::Mode::from_bits_truncate(0o644),
        )
        .map_err(IoError::from)?;
        let io = scheduler.make_io_object(fd.as_raw_fd());
        Ok(Self {
            fd: Some(fd),
            io: Some(io),
            scheduler,
        })
    }

    pub fn native_handle(&self) -> RawFd {
        self.io.as_ref().map(IoHandle::fd).unwrap_or(-1)
    }

    pub fn close(&mut self) -> IoResult<()> {
        if let Some(io) = &self.io {
            io.cancel();
        }
        self.io = None;
        self.fd = None;
        Ok(())
    }

    fn io(&self) -> &IoHandle {
        self.io.as_ref().expect("operation on a closed file")
    }

    pub async fn read_some_at(&self, offset: u64, buf: &mut [u8]) -> Completion<usize, IoError> {
        ops::ReadSomeAt::new(self.io().clone(), offset, buf).await
    }

    pub async fn write_some_at(&self, offset: u64, buf: &[u8]) -> Completion<usize, IoError> {
        ops::WriteSomeAt::new(self.io().clone(), offset, buf).await
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}

fn new_pipe() -> IoResult<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_NONBLOCK | nix::fcntl::OFlag::O_CLOEXEC)
        .map_err(IoError::from)
}

/// `pipe_reader<IoScheduler>` / `pipe_writer<IoScheduler>` (spec §8
/// scenario 5: writer sends `["Lorem ipsum.", "\xff"]`, reader reads
/// until the 0xff terminator).
pub struct PipeReader<S: IoScheduler<IoObject = IoHandle>> {
    fd: Option<OwnedFd>,
    io: Option<IoHandle>,
    scheduler: S,
}

pub struct PipeWriter<S: IoScheduler<IoObject = IoHandle>> {
    fd: Option<OwnedFd>,
    io: Option<IoHandle>,
    scheduler: S,
}

/// Creates a connected pipe pair under `scheduler` (spec §8 scenario 5's
/// starting point).
pub fn pipe<S: IoScheduler<IoObject = IoHandle> + Clone>(
    scheduler: S,
) -> IoResult<(PipeReader<S>, PipeWriter<S>)> {
    let (r, w) = new_pipe()?;
    let r_io = scheduler.make_io_object(r.as_raw_fd());
    let w_io = scheduler.make_io_object(w.as_raw_fd());
    Ok((
        PipeReader {
            fd: Some(r),
            io: Some(r_io),
            scheduler: scheduler.clone(),
        },
        PipeWriter {
            fd: Some(w),
            io: Some(w_io),
            scheduler,
        },
    ))
}

impl<S: IoScheduler<IoObject = IoHandle>> PipeReader<S> {
    pub fn native_handle(&self) -> RawFd {
        self.io.as_ref().map(IoHandle::fd).unwrap_or(-1)
    }

    pub fn close(&mut self) -> IoResult<()> {
        if let Some(io) = &self.io {
            io.cancel();
        }
        self.io = None;
        self.fd = None;
        Ok(())
    }

    fn io(&self) -> &IoHandle {
        self.io.as_ref().expect("operation on a closed pipe")
    }

    pub async fn read_some(&self, buf: &mut [u8]) -> Completion<usize, IoError> {
        ops::ReadSome::new(self.io().clone(), buf, true).await
    }
}

impl<S: IoScheduler<IoObject = IoHandle>> PipeWriter<S> {
    pub fn native_handle(&self) -> RawFd {
        self.io.as_ref().map(IoHandle::fd).unwrap_or(-1)
    }

    pub fn close(&mut self) -> IoResult<()> {
        if let Some(io) = &self.io {
            io.cancel();
        }
        self.io = None;
        self.fd = None;
        Ok(())
    }

    fn io(&self) -> &IoHandle {
        self.io.as_ref().expect("operation on a closed pipe")
    }

    pub async fn write_some(&self, buf: &[u8]) -> Completion<usize, IoError> {
        ops::WriteSome::new(self.io().clone(), buf).await
    }

    pub async fn write(&self, buf: &[u8]) -> Completion<usize, IoError> {
        ops::async_write(self.io(), buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_runtime::epoll_reactor::EpollReactor;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn block_on<F: Future>(mut fut: F) -> F::Output {
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let waker = unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) };
        let mut cx = Context::from_waker(&waker);
        let mut fut = unsafe { Pin::new_unchecked(&mut fut) };
        loop {
            if let Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
                return v;
            }
        }
    }

    #[test]
    fn pipe_reader_reads_until_the_terminator_byte() {
        let reactor = EpollReactor::default();
        let (reader, writer) = pipe(reactor).unwrap();
        block_on(async {
            assert!(matches!(
                writer.write(b"Lorem ipsum.").await,
                Completion::Value(12)
            ));
            assert!(matches!(writer.write(&[0xffu8]).await, Completion::Value(1)));

            let mut collected = Vec::new();
            loop {
                let mut byte = [0u8; 1];
                match reader.read_some(&mut byte).await {
                    Completion::Value(_) => {
                        if byte[0] == 0xff {
                            break;
                        }
                        collected.push(byte[0]);
                    }
                    other => panic!("unexpected pipe read outcome: {other:?}"),
                }
            }
            assert_eq!(collected, b"Lorem ipsum.");
        });
    }
}
