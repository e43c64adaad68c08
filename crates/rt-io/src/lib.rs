//! # rt-io
//!
//! Reactor-backed I/O descriptions (spec §4.6, §6): the low-level
//! operation senders in [`ops`], networking types and the resolver in
//! [`net`], file/pipe types in [`fs`], socket wrappers in [`socket`], and
//! the Linux signal-set watcher in [`signal`].

pub mod fs;
pub mod net;
pub mod ops;
pub mod signal;
pub mod socket;

pub use fs::{pipe, PipeReader, PipeWriter, RandomAccessFile, StreamFile};
pub use net::{resolve, Endpoint, IpAddress, Ipv4Address, Ipv6Address, Protocol, Resolver, Tcp, Udp};
pub use ops::{
    async_read, async_write, Accept, Connect, ReadSome, ReadSomeAt, ReceiveFrom, SendTo, WriteSome,
    WriteSomeAt,
};
pub use signal::{AsyncWait, SignalSet};
pub use socket::{BasicDatagramSocket, BasicSocketAcceptor, BasicStreamSocket, OptionValue, SocketOption};
