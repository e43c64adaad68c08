//! Addresses, endpoints and protocol markers (spec §6 "Endpoint wire
//! format", Public types `tcp`/`udp`/`ipv4_address`/`ipv6_address`/
//! `endpoint`). Ground: `original_source/include/coio/net/ip.h`'s
//! `ipv4_address`/`ipv6_address`/`ip_address`/`endpoint` API shape,
//! rendered over `std::net::{Ipv4Addr, Ipv6Addr}` instead of a hand-rolled
//! byte array — the standard library already owns dotted-decimal and
//! canonical/mixed IPv6 string parsing, which spec §6 requires verbatim
//! ("IPv4 addresses accept dotted-decimal strings; IPv6 accepts the
//! canonical and mixed forms; both produce canonical strings on output"),
//! so reimplementing that parser would be the "hand-rolled stdlib
//! replacement for something the ecosystem already does" this codebase
//! otherwise avoids.

mod resolver;

pub use resolver::{resolve, Resolver};

use rt_core::error::IoError;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

/// A 32-bit IPv4 address (spec §6 endpoint wire format: "IPv4 {32-bit
/// address, 16-bit port}").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Address(Ipv4Addr);

impl Ipv4Address {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(Ipv4Addr::new(a, b, c, d))
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(Ipv4Addr::from_bits(bits))
    }

    pub const fn to_bits(self) -> u32 {
        self.0.to_bits()
    }

    pub const fn loopback() -> Self {
        Self(Ipv4Addr::LOCALHOST)
    }

    pub const fn any() -> Self {
        Self(Ipv4Addr::UNSPECIFIED)
    }

    pub const fn octets(self) -> [u8; 4] {
        self.0.octets()
    }

    pub fn std(self) -> Ipv4Addr {
        self.0
    }
}

impl From<Ipv4Addr> for Ipv4Address {
    fn from(addr: Ipv4Addr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for Ipv4Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Ipv4Address {
    type Err = IoError;
    fn from_str(s: &str) -> Result<Self, IoError> {
        s.parse::<Ipv4Addr>()
            .map(Self)
            .map_err(|_| IoError::InvalidArgument(format!("not an IPv4 address literal: {s:?}")))
    }
}

/// A 128-bit IPv6 address, scope id dropped at the wire boundary (spec §6:
/// "IPv6 {128-bit address, 16-bit port, scope_id ignored}").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv6Address(Ipv6Addr);

impl Ipv6Address {
    pub const fn loopback() -> Self {
        Self(Ipv6Addr::LOCALHOST)
    }

    pub const fn any() -> Self {
        Self(Ipv6Addr::UNSPECIFIED)
    }

    /// An IPv4-mapped IPv6 address (`::ffff:a.b.c.d`).
    pub fn v4_mapped(v4: Ipv4Address) -> Self {
        Self(v4.std().to_ipv6_mapped())
    }

    pub const fn segments(self) -> [u16; 8] {
        self.0.segments()
    }

    pub fn std(self) -> Ipv6Addr {
        self.0
    }
}

impl From<Ipv6Addr> for Ipv6Address {
    fn from(addr: Ipv6Addr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for Ipv6Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Ipv6Address {
    type Err = IoError;
    fn from_str(s: &str) -> Result<Self, IoError> {
        s.parse::<Ipv6Addr>()
            .map(Self)
            .map_err(|_| IoError::InvalidArgument(format!("not an IPv6 address literal: {s:?}")))
    }
}

/// Either address family (spec §6 `ip_address`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpAddress {
    V4(Ipv4Address),
    V6(Ipv6Address),
}

impl IpAddress {
    pub fn is_v4(self) -> bool {
        matches!(self, IpAddress::V4(_))
    }

    pub fn is_v6(self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    pub fn v4(self) -> Option<Ipv4Address> {
        match self {
            IpAddress::V4(a) => Some(a),
            IpAddress::V6(_) => None,
        }
    }

    pub fn v6(self) -> Option<Ipv6Address> {
        match self {
            IpAddress::V6(a) => Some(a),
            IpAddress::V4(_) => None,
        }
    }
}

impl From<Ipv4Address> for IpAddress {
    fn from(a: Ipv4Address) -> Self {
        IpAddress::V4(a)
    }
}

impl From<Ipv6Address> for IpAddress {
    fn from(a: Ipv6Address) -> Self {
        IpAddress::V6(a)
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(a) => fmt::Display::fmt(a, f),
            IpAddress::V6(a) => fmt::Display::fmt(a, f),
        }
    }
}

impl FromStr for IpAddress {
    type Err = IoError;
    fn from_str(s: &str) -> Result<Self, IoError> {
        if let Ok(v4) = s.parse::<Ipv4Address>() {
            return Ok(IpAddress::V4(v4));
        }
        s.parse::<Ipv6Address>().map(IpAddress::V6)
    }
}

/// An `{ip, port}` pair (spec §6 `endpoint`). Supports structured
/// destructuring via `.ip()`/`.port()` rather than `ip.h`'s
/// `tuple_size`/`tuple_element`/`get<I>` machinery — Rust has no
/// structured-binding protocol to hook the same way, so a plain
/// two-accessor struct is the idiomatic equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    ip: IpAddress,
    port: u16,
}

impl Endpoint {
    pub fn new(ip: impl Into<IpAddress>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    pub fn ip(self) -> IpAddress {
        self.ip
    }

    pub fn port(self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddress::V4(a) => write!(f, "{a}:{}", self.port),
            IpAddress::V6(a) => write!(f, "[{a}]:{}", self.port),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Endpoint::new(Ipv4Address::from(*v4.ip()), v4.port()),
            SocketAddr::V6(v6) => Endpoint::new(Ipv6Address::from(*v6.ip()), v6.port()),
        }
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(ep: Endpoint) -> Self {
        match ep.ip {
            IpAddress::V4(a) => SocketAddr::V4(SocketAddrV4::new(a.std(), ep.port)),
            IpAddress::V6(a) => SocketAddr::V6(SocketAddrV6::new(a.std(), ep.port, 0, 0)),
        }
    }
}

/// Protocol marker (spec §6 Public types `tcp`/`udp`), selecting address
/// family, socket type and wire protocol for `basic_*_socket<Protocol, _>`.
pub trait Protocol: Copy + Send + Sync + 'static {
    fn family(self, ep: Endpoint) -> nix::sys::socket::AddressFamily;
    fn sock_type(self) -> nix::sys::socket::SockType;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tcp;

impl Protocol for Tcp {
    fn family(self, ep: Endpoint) -> nix::sys::socket::AddressFamily {
        family_of(ep)
    }
    fn sock_type(self) -> nix::sys::socket::SockType {
        nix::sys::socket::SockType::Stream
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Udp;

impl Protocol for Udp {
    fn family(self, ep: Endpoint) -> nix::sys::socket::AddressFamily {
        family_of(ep)
    }
    fn sock_type(self) -> nix::sys::socket::SockType {
        nix::sys::socket::SockType::Datagram
    }
}

fn family_of(ep: Endpoint) -> nix::sys::socket::AddressFamily {
    if ep.ip().is_v4() {
        nix::sys::socket::AddressFamily::Inet
    } else {
        nix::sys::socket::AddressFamily::Inet6
    }
}

/// Converts an [`Endpoint`] into a `nix` sockaddr usable at the syscall
/// boundary (network byte order handled by `nix`/the kernel, per spec §6
/// "network-byte order is used at the syscall boundary").
pub fn to_sockaddr(ep: Endpoint) -> nix::sys::socket::SockaddrStorage {
    match SocketAddr::from(ep) {
        SocketAddr::V4(v4) => nix::sys::socket::SockaddrIn::from(v4).into(),
        SocketAddr::V6(v6) => nix::sys::socket::SockaddrIn6::from(v6).into(),
    }
}

pub fn from_sockaddr(storage: &nix::sys::socket::SockaddrStorage) -> Option<Endpoint> {
    if let Some(v4) = storage.as_sockaddr_in() {
        let ip = Ipv4Addr::from(v4.ip());
        return Some(Endpoint::new(Ipv4Address::from(ip), v4.port()));
    }
    if let Some(v6) = storage.as_sockaddr_in6() {
        return Some(Endpoint::new(Ipv6Address::from(v6.ip()), v6.port()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_parses_dotted_decimal_and_prints_canonically() {
        let a: Ipv4Address = "127.0.0.1".parse().unwrap();
        assert_eq!(a, Ipv4Address::loopback());
        assert_eq!(a.to_string(), "127.0.0.1");
    }

    #[test]
    fn ipv6_parses_canonical_and_mixed_forms() {
        let canonical: Ipv6Address = "::1".parse().unwrap();
        assert_eq!(canonical, Ipv6Address::loopback());
        let mixed: Ipv6Address = "::ffff:192.0.2.1".parse().unwrap();
        assert!(mixed.to_string().contains("192.0.2.1") || mixed.to_string().starts_with("::ffff"));
    }

    #[test]
    fn invalid_literal_is_invalid_argument() {
        let err = "not-an-ip".parse::<IpAddress>().unwrap_err();
        assert!(matches!(err, IoError::InvalidArgument(_)));
    }

    #[test]
    fn endpoint_formats_v4_without_brackets_and_v6_with_brackets() {
        let v4 = Endpoint::new(Ipv4Address::loopback(), 8086);
        assert_eq!(v4.to_string(), "127.0.0.1:8086");
        let v6 = Endpoint::new(Ipv6Address::loopback(), 8086);
        assert_eq!(v6.to_string(), "[::1]:8086");
    }

    #[test]
    fn endpoint_roundtrips_through_std_socketaddr() {
        let ep = Endpoint::new(Ipv4Address::new(10, 0, 0, 1), 9000);
        let sa: SocketAddr = ep.into();
        assert_eq!(Endpoint::from(sa), ep);
    }
}
