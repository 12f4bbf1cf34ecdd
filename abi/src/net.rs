//! Userspace-visible socket ABI: address families, socket types, and the
//! wire-compatible `sockaddr_in` layout.
//!
//! These definitions are shared verbatim between the kernel's socket layer
//! and userspace; nothing in here may depend on kernel-internal types.

/// Address family: IPv4 Internet protocols.
pub const AF_INET: u16 = 2;

/// Socket type: byte-stream (TCP).
pub const SOCK_STREAM: u16 = 1;
/// Socket type: datagram (UDP).
pub const SOCK_DGRAM: u16 = 2;
/// Socket type: raw IP access.
pub const SOCK_RAW: u16 = 3;

/// IPv4 socket address mirroring the POSIX `sockaddr_in` layout.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct SockAddrIn {
    pub family: u16,
    /// Port in **network** byte order (big-endian).
    pub port: u16,
    /// IPv4 address in network byte order.
    pub addr: [u8; 4],
    pub _pad: [u8; 8],
}

/// Maximum number of kernel sockets (shared across all processes).
pub const MAX_SOCKETS: usize = 128;
