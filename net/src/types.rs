//! Type-safe primitives for the network core.
//!
//! Newtype wrappers eliminate whole classes of bugs at compile time:
//! byte-order mixups, address/port confusion, and raw numeric comparisons
//! for protocol fields.  Everything here is `no_std` and allocation-free.

use core::fmt;

use rillos_abi::net::{AF_INET, SockAddrIn};

// =============================================================================
// Addresses and ports
// =============================================================================

/// IPv4 address stored in **network byte order** (`[u8; 4]`).
///
/// The inner representation is always big-endian, matching the wire format.
/// Conversion to/from host-order `u32` is explicit via [`Ipv4Addr::from_u32_be`]
/// and [`Ipv4Addr::to_u32_be`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ipv4Addr(pub [u8; 4]);

impl Ipv4Addr {
    /// The unspecified address, `0.0.0.0`.
    pub const UNSPECIFIED: Self = Self([0, 0, 0, 0]);
    /// The limited broadcast address, `255.255.255.255`.
    pub const BROADCAST: Self = Self([255, 255, 255, 255]);
    /// The loopback address, `127.0.0.1`.
    pub const LOCALHOST: Self = Self([127, 0, 0, 1]);

    /// Construct from a big-endian `u32`.
    #[inline]
    pub const fn from_u32_be(val: u32) -> Self {
        Self(val.to_be_bytes())
    }

    /// Return the address as a big-endian `u32`.
    #[inline]
    pub const fn to_u32_be(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// `true` if the address is `255.255.255.255`.
    #[inline]
    pub const fn is_broadcast(&self) -> bool {
        self.to_u32_be() == u32::MAX
    }

    /// `true` if the address is `0.0.0.0`.
    #[inline]
    pub const fn is_unspecified(&self) -> bool {
        self.to_u32_be() == 0
    }

    /// `true` if `addr` falls within the subnet defined by `network`/`mask`.
    #[inline]
    pub const fn in_subnet(addr: Ipv4Addr, network: Ipv4Addr, mask: Ipv4Addr) -> bool {
        let a = addr.to_u32_be();
        let n = network.to_u32_be();
        let m = mask.to_u32_be();
        (a & m) == (n & m)
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Port number in **host byte order**.
///
/// Conversion to/from network byte order is explicit, so a host-order value
/// can never be passed where a wire-order one is expected.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Port(pub u16);

impl Port {
    /// First port of the IANA dynamic/private range.
    pub const EPHEMERAL_FIRST: Self = Self(49152);

    /// Serialize to big-endian bytes for the wire.
    #[inline]
    pub const fn to_network_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Deserialize from big-endian wire bytes.
    #[inline]
    pub const fn from_network_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }

    /// `true` if the port is in the ephemeral range (49152–65535).
    #[inline]
    pub const fn is_ephemeral(&self) -> bool {
        self.0 >= Self::EPHEMERAL_FIRST.0
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port({})", self.0)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ethernet MAC address (6 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// The broadcast address, `ff:ff:ff:ff:ff:ff`.
    pub const BROADCAST: Self = Self([0xff; 6]);
    /// The all-zero address used by interfaces without hardware (loopback).
    pub const ZERO: Self = Self([0; 6]);

    /// `true` if the address is `ff:ff:ff:ff:ff:ff`.
    #[inline]
    pub const fn is_broadcast(&self) -> bool {
        matches!(self.0, [0xff, 0xff, 0xff, 0xff, 0xff, 0xff])
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Indices
// =============================================================================

/// Interface index: identifies a slot in the interface registry.
///
/// Cannot be confused with a socket descriptor or other `usize`.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IfIndex(pub usize);

impl fmt::Debug for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IfIndex({})", self.0)
    }
}

impl fmt::Display for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Socket descriptor: an index into the bounded socket table.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SockFd(pub usize);

impl fmt::Debug for SockFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SockFd({})", self.0)
    }
}

impl fmt::Display for SockFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// NetError
// =============================================================================

/// Error type shared by every layer of the network core.
///
/// Internal code uses `NetError` exclusively.  Conversion to a POSIX errno
/// happens at the syscall boundary via [`NetError::to_errno`].
///
/// Nothing in the core is fatal: every failure is local and the caller may
/// retry or abandon the operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetError {
    /// The kernel allocator / packet pool cannot satisfy the request (ENOMEM).
    OutOfMemory,
    /// A buffer's remaining capacity cannot hold the data (ENOBUFS).
    NoBufferSpace,
    /// A bounded protocol table (interfaces, TCP connections) is full (ENOMEM).
    TableFull,
    /// No free socket descriptor slot (EMFILE).
    NoDescriptors,
    /// The socket descriptor does not name an open socket (EBADF).
    BadDescriptor,
    /// Address or port already in use (EADDRINUSE).
    AddressInUse,
    /// Address family other than IPv4 (EAFNOSUPPORT).
    AddressFamilyNotSupported,
    /// Unknown socket type / protocol (EPROTONOSUPPORT).
    ProtocolNotSupported,
    /// Operation not supported for this socket type or state (EOPNOTSUPP).
    OperationNotSupported,
    /// Socket is not connected (ENOTCONN).
    NotConnected,
    /// Socket is already connected (EISCONN).
    AlreadyConnected,
    /// No usable interface for the destination (ENETUNREACH).
    NetworkUnreachable,
    /// Invalid argument (EINVAL).
    InvalidArgument,
    /// Operation would block; nothing is pending (EAGAIN).
    WouldBlock,
}

impl NetError {
    /// Convert to a POSIX errno value (negative) for the syscall boundary.
    pub const fn to_errno(&self) -> i32 {
        match self {
            Self::OutOfMemory => -12,               // ENOMEM
            Self::NoBufferSpace => -105,            // ENOBUFS
            Self::TableFull => -12,                 // ENOMEM
            Self::NoDescriptors => -24,             // EMFILE
            Self::BadDescriptor => -9,              // EBADF
            Self::AddressInUse => -98,              // EADDRINUSE
            Self::AddressFamilyNotSupported => -97, // EAFNOSUPPORT
            Self::ProtocolNotSupported => -93,      // EPROTONOSUPPORT
            Self::OperationNotSupported => -95,     // EOPNOTSUPP
            Self::NotConnected => -107,             // ENOTCONN
            Self::AlreadyConnected => -106,         // EISCONN
            Self::NetworkUnreachable => -101,       // ENETUNREACH
            Self::InvalidArgument => -22,           // EINVAL
            Self::WouldBlock => -11,                // EAGAIN
        }
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NoBufferSpace => write!(f, "no buffer space available"),
            Self::TableFull => write!(f, "protocol table full"),
            Self::NoDescriptors => write!(f, "no free socket descriptors"),
            Self::BadDescriptor => write!(f, "bad socket descriptor"),
            Self::AddressInUse => write!(f, "address already in use"),
            Self::AddressFamilyNotSupported => write!(f, "address family not supported"),
            Self::ProtocolNotSupported => write!(f, "protocol not supported"),
            Self::OperationNotSupported => write!(f, "operation not supported"),
            Self::NotConnected => write!(f, "socket not connected"),
            Self::AlreadyConnected => write!(f, "socket already connected"),
            Self::NetworkUnreachable => write!(f, "network unreachable"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::WouldBlock => write!(f, "operation would block"),
        }
    }
}

// =============================================================================
// SockAddr
// =============================================================================

/// Kernel-internal socket address combining an [`Ipv4Addr`] and a [`Port`].
///
/// The single conversion point between the kernel's type-safe representation
/// and the userspace-visible [`SockAddrIn`] layout.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SockAddr {
    pub ip: Ipv4Addr,
    pub port: Port,
}

impl SockAddr {
    pub const UNSPECIFIED: Self = Self {
        ip: Ipv4Addr::UNSPECIFIED,
        port: Port(0),
    };

    #[inline]
    pub const fn new(ip: Ipv4Addr, port: Port) -> Self {
        Self { ip, port }
    }

    /// Parse from a userspace [`SockAddrIn`], validating `family == AF_INET`
    /// and converting byte order.
    pub fn from_user(raw: &SockAddrIn) -> Result<Self, NetError> {
        if raw.family != AF_INET {
            return Err(NetError::AddressFamilyNotSupported);
        }
        Ok(Self {
            ip: Ipv4Addr(raw.addr),
            // SockAddrIn.port stores htons(port); convert back to host order.
            port: Port(u16::from_be(raw.port)),
        })
    }

    /// Serialize to the userspace-visible [`SockAddrIn`] layout.
    pub fn to_user(&self) -> SockAddrIn {
        SockAddrIn {
            family: AF_INET,
            port: self.port.0.to_be(),
            addr: self.ip.0,
            _pad: [0; 8],
        }
    }
}

impl fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
