//! Network interface registry.
//!
//! An [`Interface`] pairs configuration (addresses, flags) with a boxed
//! [`NetDriver`] that knows how to put frames on a link.  Interfaces live in
//! a bounded [`IfaceTable`] of [`MAX_INTERFACES`] slots, looked up by name or
//! index.

use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::packetbuf::PacketBuf;
use crate::types::{IfIndex, Ipv4Addr, MacAddr, NetError};
use rillos_lib::klog_debug;

/// Maximum interfaces the registry can hold.
pub const MAX_INTERFACES: usize = 8;

/// Maximum interface name length, including implicit padding.
pub const IFACE_NAME_LEN: usize = 16;

/// Hardware abstraction for an interface: the one operation the core needs
/// from a link driver.  Taking the buffer by value makes transmit consume it.
pub trait NetDriver: Send + Sync {
    fn transmit(&self, pkt: PacketBuf) -> Result<(), NetError>;
}

bitflags! {
    /// Interface status flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IfaceFlags: u8 {
        /// Administratively enabled.
        const UP = 1 << 0;
        /// Link is operational.
        const RUNNING = 1 << 1;
        /// Software loopback, no hardware behind it.
        const LOOPBACK = 1 << 2;
        /// Address was (or would be) obtained via DHCP.
        const DHCP = 1 << 3;
    }
}

/// Fixed-size, zero-padded interface name.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IfaceName([u8; IFACE_NAME_LEN]);

impl IfaceName {
    /// Build from a string, truncating to [`IFACE_NAME_LEN`] bytes.
    pub fn new(name: &str) -> Self {
        let mut buf = [0u8; IFACE_NAME_LEN];
        let n = name.len().min(IFACE_NAME_LEN);
        buf[..n].copy_from_slice(&name.as_bytes()[..n]);
        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(IFACE_NAME_LEN);
        // Names only ever come from &str via new(), so this cannot fail.
        core::str::from_utf8(&self.0[..end]).unwrap_or("")
    }
}

impl fmt::Debug for IfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for IfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered network interface.
pub struct Interface {
    pub name: IfaceName,
    pub mac: MacAddr,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub flags: IfaceFlags,
    driver: Box<dyn NetDriver>,
}

impl Interface {
    pub fn new(
        name: &str,
        mac: MacAddr,
        addr: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Ipv4Addr,
        flags: IfaceFlags,
        driver: Box<dyn NetDriver>,
    ) -> Self {
        Self {
            name: IfaceName::new(name),
            mac,
            addr,
            netmask,
            gateway,
            flags,
            driver,
        }
    }

    /// Directed broadcast address for the interface's subnet.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from_u32_be(self.addr.to_u32_be() | !self.netmask.to_u32_be())
    }

    /// `true` if `addr` is on this interface's subnet.
    pub fn is_local(&self, addr: Ipv4Addr) -> bool {
        Ipv4Addr::in_subnet(addr, self.addr, self.netmask)
    }

    /// Netmask prefix length in bits.
    pub fn prefix_len(&self) -> u32 {
        self.netmask.to_u32_be().count_ones()
    }

    pub fn is_up(&self) -> bool {
        self.flags.contains(IfaceFlags::UP)
    }

    /// Hand a frame to the driver.  The buffer is consumed either way.
    pub fn transmit(&self, pkt: PacketBuf) -> Result<(), NetError> {
        self.driver.transmit(pkt)
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("mac", &self.mac)
            .field("addr", &self.addr)
            .field("netmask", &self.netmask)
            .field("gateway", &self.gateway)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Bounded table of registered interfaces.
pub struct IfaceTable {
    slots: [Option<Interface>; MAX_INTERFACES],
    count: usize,
}

impl IfaceTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_INTERFACES],
            count: 0,
        }
    }

    /// Register an interface in the first free slot.
    pub fn register(&mut self, iface: Interface) -> Result<IfIndex, NetError> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(iface);
                self.count += 1;
                return Ok(IfIndex(i));
            }
        }
        Err(NetError::TableFull)
    }

    pub fn get(&self, idx: IfIndex) -> Option<&Interface> {
        self.slots.get(idx.0)?.as_ref()
    }

    pub fn by_name(&self, name: &str) -> Option<(IfIndex, &Interface)> {
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            slot.as_ref()
                .filter(|iface| iface.name.as_str() == name)
                .map(|iface| (IfIndex(i), iface))
        })
    }

    /// `true` if `addr` is assigned to any registered interface.
    pub fn is_our_addr(&self, addr: Ipv4Addr) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|iface| iface.addr == addr)
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl Default for IfaceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Driver for the software loopback: counts and discards frames.
pub struct LoopbackDriver {
    tx_count: AtomicU64,
}

impl LoopbackDriver {
    pub const fn new() -> Self {
        Self {
            tx_count: AtomicU64::new(0),
        }
    }

    pub fn tx_count(&self) -> u64 {
        self.tx_count.load(Ordering::Relaxed)
    }
}

impl Default for LoopbackDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NetDriver for LoopbackDriver {
    fn transmit(&self, pkt: PacketBuf) -> Result<(), NetError> {
        self.tx_count.fetch_add(1, Ordering::Relaxed);
        klog_debug!("net: loopback tx {} bytes", pkt.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_iface(name: &str, addr: [u8; 4]) -> Interface {
        Interface::new(
            name,
            MacAddr([2, 0, 0, 0, 0, 1]),
            Ipv4Addr(addr),
            Ipv4Addr([255, 255, 255, 0]),
            Ipv4Addr([addr[0], addr[1], addr[2], 1]),
            IfaceFlags::UP | IfaceFlags::RUNNING,
            Box::new(LoopbackDriver::new()),
        )
    }

    #[test]
    fn name_truncates_and_round_trips() {
        assert_eq!(IfaceName::new("eth0").as_str(), "eth0");
        let long = IfaceName::new("averyverylonginterfacename");
        assert_eq!(long.as_str().len(), IFACE_NAME_LEN);
    }

    #[test]
    fn broadcast_and_prefix() {
        let iface = test_iface("eth0", [10, 0, 0, 2]);
        assert_eq!(iface.broadcast(), Ipv4Addr([10, 0, 0, 255]));
        assert_eq!(iface.prefix_len(), 24);
        assert!(iface.is_local(Ipv4Addr([10, 0, 0, 99])));
        assert!(!iface.is_local(Ipv4Addr([10, 0, 1, 99])));
    }

    #[test]
    fn registry_lookup_and_capacity() {
        let mut table = IfaceTable::new();
        for i in 0..MAX_INTERFACES {
            let name = match i {
                0 => "if0", 1 => "if1", 2 => "if2", 3 => "if3",
                4 => "if4", 5 => "if5", 6 => "if6", _ => "if7",
            };
            table.register(test_iface(name, [10, 0, i as u8, 2])).unwrap();
        }
        assert_eq!(table.count(), MAX_INTERFACES);
        assert_eq!(
            table.register(test_iface("overflow", [10, 9, 9, 2])).unwrap_err(),
            NetError::TableFull
        );
        let (idx, iface) = table.by_name("if3").unwrap();
        assert_eq!(iface.addr, Ipv4Addr([10, 0, 3, 2]));
        assert!(table.get(idx).is_some());
        assert!(table.is_our_addr(Ipv4Addr([10, 0, 5, 2])));
        assert!(!table.is_our_addr(Ipv4Addr([10, 0, 9, 2])));
    }
}
