//! The rillos network core: Ethernet/IPv4/TCP processing pipeline and the
//! socket abstraction layered over it.
//!
//! Data flows bottom-up on receive (Ethernet → IPv4 → TCP → socket) and
//! top-down on send (socket → TCP → IPv4 → Ethernet → interface driver).
//! All mutable protocol state lives in an explicitly owned [`NetStack`]
//! value so that multiple stacks can coexist and tests stay deterministic;
//! the only process-wide state is the packet pool's static backing storage.
//!
//! The link layer below and the console above are external collaborators:
//! drivers hand received frames to [`NetStack::receive_frame`] and accept
//! outbound frames through the [`netdev::NetDriver`] trait; log output goes
//! through `rillos-lib`'s klog backend.

#![no_std]

extern crate alloc;

pub mod checksum;
pub mod ingress;
pub mod ipv4;
pub mod netdev;
pub mod netstack;
pub mod packetbuf;
pub mod pool;
pub mod socket;
pub mod tcp;
pub mod types;

#[cfg(test)]
mod tcp_tests;

pub use netstack::{NetStack, StackConfig};
pub use types::{Ipv4Addr, MacAddr, NetError, Port, SockAddr, SockFd};

// =============================================================================
// Ethernet
// =============================================================================

pub const ETH_HEADER_LEN: usize = 14;
pub const ETH_ADDR_LEN: usize = 6;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

// =============================================================================
// IPv4
// =============================================================================

pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV4_TTL: u8 = 64;
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
