//! IPv4 receive validation and transmit path.
//!
//! Receive follows a strict drop-silently discipline: malformed or
//! not-for-us datagrams increment `rx_dropped` and vanish without any reply.
//! Transmit builds an Ethernet + IPv4 frame in one buffer and hands it to
//! the interface driver.
//!
//! No fragmentation or reassembly: every datagram must fit one frame, and
//! fragments are treated as any other payload (their offset field is not
//! inspected).

use core::sync::atomic::Ordering;

use crate::checksum;
use crate::netstack::NetStack;
use crate::packetbuf::PacketBuf;
use crate::types::{Ipv4Addr, NetError};
use crate::{ETH_HEADER_LEN, ETHERTYPE_IPV4, IPPROTO_ICMP, IPPROTO_TCP, IPPROTO_UDP, IPV4_HEADER_LEN, IPV4_TTL, tcp};
use crate::ingress::EthHeader;
use crate::types::MacAddr;
use rillos_lib::klog_debug;

/// Parsed IPv4 header (options are consumed by IHL but not interpreted).
#[derive(Clone, Copy, Debug)]
pub struct Ipv4Header {
    pub version: u8,
    /// Header length in 32-bit words.
    pub ihl: u8,
    pub tos: u8,
    pub total_len: u16,
    pub ident: u16,
    pub flags_fragment: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

impl Ipv4Header {
    /// Parse the fixed 20-byte header.  Option bytes, if any, follow and are
    /// accounted for by `ihl`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < IPV4_HEADER_LEN {
            return None;
        }
        let mut src = [0u8; 4];
        let mut dst = [0u8; 4];
        src.copy_from_slice(&data[12..16]);
        dst.copy_from_slice(&data[16..20]);
        Some(Self {
            version: data[0] >> 4,
            ihl: data[0] & 0x0f,
            tos: data[1],
            total_len: u16::from_be_bytes([data[2], data[3]]),
            ident: u16::from_be_bytes([data[4], data[5]]),
            flags_fragment: u16::from_be_bytes([data[6], data[7]]),
            ttl: data[8],
            protocol: data[9],
            checksum: u16::from_be_bytes([data[10], data[11]]),
            src: Ipv4Addr(src),
            dst: Ipv4Addr(dst),
        })
    }

    /// Header length in bytes.
    pub fn header_len(&self) -> usize {
        usize::from(self.ihl) * 4
    }

    /// Serialize into the first 20 bytes of `out` with the checksum field
    /// zeroed; the caller computes and patches it afterwards.
    pub fn write(&self, out: &mut [u8]) {
        out[0] = (self.version << 4) | (self.ihl & 0x0f);
        out[1] = self.tos;
        out[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        out[4..6].copy_from_slice(&self.ident.to_be_bytes());
        out[6..8].copy_from_slice(&self.flags_fragment.to_be_bytes());
        out[8] = self.ttl;
        out[9] = self.protocol;
        out[10..12].copy_from_slice(&[0, 0]);
        out[12..16].copy_from_slice(&self.src.0);
        out[16..20].copy_from_slice(&self.dst.0);
    }
}

/// Validate and dispatch an IPv4 datagram starting at `offset` within the
/// frame held by `pkt`.
pub fn handle_rx(stack: &NetStack, pkt: &PacketBuf, offset: usize) {
    let frame = pkt.bytes();
    let remaining = &frame[offset..];

    let drop_frame = |reason: &str| {
        klog_debug!("ipv4: drop: {}", reason);
        stack.stats.rx_dropped.fetch_add(1, Ordering::Relaxed);
    };

    let Some(hdr) = Ipv4Header::parse(remaining) else {
        drop_frame("truncated header");
        return;
    };
    if hdr.version != 4 {
        drop_frame("bad version");
        return;
    }
    let header_len = hdr.header_len();
    if header_len < IPV4_HEADER_LEN || header_len > remaining.len() {
        drop_frame("bad ihl");
        return;
    }
    if checksum::checksum(&remaining[..header_len]) != 0 {
        drop_frame("bad header checksum");
        return;
    }
    let total_len = usize::from(hdr.total_len);
    if total_len < header_len || total_len > remaining.len() {
        drop_frame("bad total length");
        return;
    }
    if !hdr.dst.is_broadcast() && !stack.ifaces.lock().is_our_addr(hdr.dst) {
        drop_frame("not our address");
        return;
    }

    stack.stats.ipv4_rx.fetch_add(1, Ordering::Relaxed);
    let payload = &remaining[header_len..total_len];

    match hdr.protocol {
        IPPROTO_TCP => {
            stack.stats.tcp_rx.fetch_add(1, Ordering::Relaxed);
            tcp::handle_rx(stack, hdr.src, hdr.dst, payload);
        }
        IPPROTO_ICMP | IPPROTO_UDP => {
            klog_debug!("ipv4: protocol {} accepted, no handler", hdr.protocol);
        }
        other => {
            klog_debug!("ipv4: unknown protocol {}, ignored", other);
        }
    }
}

/// Build and transmit an IPv4 datagram carrying `payload` out `iface_name`.
///
/// The link destination is always the Ethernet broadcast address: there is
/// no ARP, so unicast MAC resolution is impossible.
pub fn send(
    stack: &NetStack,
    iface_name: &str,
    protocol: u8,
    dst: Ipv4Addr,
    payload: &[u8],
) -> Result<(), NetError> {
    let total_len = IPV4_HEADER_LEN + payload.len();
    let frame_len = ETH_HEADER_LEN + total_len;

    let ifaces = stack.ifaces.lock();
    let Some((idx, iface)) = ifaces.by_name(iface_name) else {
        return Err(NetError::NetworkUnreachable);
    };
    if !iface.is_up() {
        return Err(NetError::NetworkUnreachable);
    }

    let mut pkt = PacketBuf::alloc(frame_len)?;

    let eth = EthHeader {
        dst: MacAddr::BROADCAST,
        src: iface.mac,
        ethertype: ETHERTYPE_IPV4,
    };
    let mut eth_bytes = [0u8; ETH_HEADER_LEN];
    eth.write(&mut eth_bytes);
    pkt.append(&eth_bytes)?;

    let ip = Ipv4Header {
        version: 4,
        ihl: (IPV4_HEADER_LEN / 4) as u8,
        tos: 0,
        total_len: total_len as u16,
        ident: stack.next_ip_id(),
        flags_fragment: 0,
        ttl: IPV4_TTL,
        protocol,
        checksum: 0,
        src: iface.addr,
        dst,
    };
    let mut ip_bytes = [0u8; IPV4_HEADER_LEN];
    ip.write(&mut ip_bytes);
    let sum = checksum::checksum(&ip_bytes);
    ip_bytes[10..12].copy_from_slice(&sum.to_be_bytes());
    pkt.append(&ip_bytes)?;

    pkt.append(payload)?;
    pkt.set_iface(idx);

    // The driver consumes the buffer whether or not the link accepts it.
    match iface.transmit(pkt) {
        Ok(()) => {
            stack.stats.tx_frames.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        Err(err) => {
            stack.stats.tx_errors.fetch_add(1, Ordering::Relaxed);
            Err(err)
        }
    }
}
