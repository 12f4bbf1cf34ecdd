//! Top-level network stack: owns every protocol table and all counters.
//!
//! There is no hidden global: a [`NetStack`] is constructed explicitly and
//! threaded through the receive and transmit paths by reference, so tests
//! can run independent stacks side by side.  The only process-wide state is
//! the packet pool, which is shared by design.

use core::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use alloc::boxed::Box;
use spin::Mutex;

use crate::ingress;
use crate::netdev::{IfaceFlags, IfaceName, Interface, IfaceTable, LoopbackDriver, NetDriver};
use crate::packetbuf::PacketBuf;
use crate::pool::PACKET_POOL;
use crate::socket::SocketTable;
use crate::tcp::TcpTable;
use crate::types::{IfIndex, Ipv4Addr, MacAddr, NetError};
use rillos_lib::klog_info;

/// Stack-wide configuration, fixed at construction.
#[derive(Clone, Copy, Debug)]
pub struct StackConfig {
    /// Interface used for all locally originated traffic.
    pub default_iface: IfaceName,
    pub loopback_name: IfaceName,
    pub loopback_addr: Ipv4Addr,
    pub loopback_netmask: Ipv4Addr,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            default_iface: IfaceName::new("eth0"),
            loopback_name: IfaceName::new("lo"),
            loopback_addr: Ipv4Addr::LOCALHOST,
            loopback_netmask: Ipv4Addr([255, 0, 0, 0]),
        }
    }
}

/// Monotonic traffic counters.  Relaxed ordering; these are diagnostics,
/// not synchronization.
#[derive(Debug)]
pub struct NetStats {
    pub rx_frames: AtomicU64,
    pub rx_dropped: AtomicU64,
    pub ipv4_rx: AtomicU64,
    pub tcp_rx: AtomicU64,
    pub tx_frames: AtomicU64,
    pub tx_errors: AtomicU64,
}

impl NetStats {
    const fn new() -> Self {
        Self {
            rx_frames: AtomicU64::new(0),
            rx_dropped: AtomicU64::new(0),
            ipv4_rx: AtomicU64::new(0),
            tcp_rx: AtomicU64::new(0),
            tx_frames: AtomicU64::new(0),
            tx_errors: AtomicU64::new(0),
        }
    }
}

/// The network stack.  One lock per table; locks are never held across a
/// call into another table's lock except sockets -> tcp on the socket API
/// path, which no other path inverts.
pub struct NetStack {
    pub config: StackConfig,
    pub(crate) ifaces: Mutex<IfaceTable>,
    pub(crate) tcp: Mutex<TcpTable>,
    pub(crate) sockets: Mutex<SocketTable>,
    pub stats: NetStats,
    ip_id: AtomicU16,
}

impl NetStack {
    /// Bring up a stack: initialize the packet pool and register the
    /// loopback interface.
    pub fn new(config: StackConfig) -> Self {
        PACKET_POOL.init();
        let stack = Self {
            config,
            ifaces: Mutex::new(IfaceTable::new()),
            tcp: Mutex::new(TcpTable::new()),
            sockets: Mutex::new(SocketTable::new()),
            stats: NetStats::new(),
            ip_id: AtomicU16::new(0),
        };
        let lo = Interface::new(
            config.loopback_name.as_str(),
            MacAddr::ZERO,
            config.loopback_addr,
            config.loopback_netmask,
            Ipv4Addr::UNSPECIFIED,
            IfaceFlags::UP | IfaceFlags::RUNNING | IfaceFlags::LOOPBACK,
            Box::new(LoopbackDriver::new()),
        );
        // The table is empty at this point, so registration cannot fail.
        let _ = stack.ifaces.lock().register(lo);
        klog_info!("net: stack up, loopback {}", config.loopback_addr);
        stack
    }

    /// Register a hardware interface with its driver.
    pub fn register_interface(
        &self,
        name: &str,
        mac: MacAddr,
        addr: Ipv4Addr,
        netmask: Ipv4Addr,
        gateway: Ipv4Addr,
        driver: Box<dyn NetDriver>,
    ) -> Result<IfIndex, NetError> {
        let iface = Interface::new(
            name,
            mac,
            addr,
            netmask,
            gateway,
            IfaceFlags::UP | IfaceFlags::RUNNING,
            driver,
        );
        let idx = self.ifaces.lock().register(iface)?;
        klog_info!("net: registered {} ({}) as index {}", name, addr, idx);
        Ok(idx)
    }

    /// Deliver a received frame to the stack.  Called by drivers.
    pub fn receive_frame(&self, pkt: PacketBuf) {
        ingress::net_rx(self, pkt);
    }

    /// Next IP identification field value.
    pub(crate) fn next_ip_id(&self) -> u16 {
        self.ip_id.fetch_add(1, Ordering::Relaxed)
    }
}
