//! Ethernet frame ingress and demultiplexing.
//!
//! Drivers deliver received frames here via [`crate::NetStack::receive_frame`].
//! The frame's EtherType selects the layer-3 handler; anything unhandled is
//! counted and dropped silently.

use crate::netstack::NetStack;
use crate::packetbuf::PacketBuf;
use crate::types::MacAddr;
use crate::{ETH_HEADER_LEN, ETHERTYPE_ARP, ETHERTYPE_IPV4, ipv4};
use rillos_lib::klog_debug;

/// Recognized EtherType values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Arp,
}

impl EtherType {
    pub fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            ETHERTYPE_IPV4 => Some(Self::Ipv4),
            ETHERTYPE_ARP => Some(Self::Arp),
            _ => None,
        }
    }
}

/// Parsed Ethernet header.
#[derive(Clone, Copy, Debug)]
pub struct EthHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: u16,
}

impl EthHeader {
    /// Parse the first [`ETH_HEADER_LEN`] bytes of a frame.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ETH_HEADER_LEN {
            return None;
        }
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&data[0..6]);
        src.copy_from_slice(&data[6..12]);
        Some(Self {
            dst: MacAddr(dst),
            src: MacAddr(src),
            ethertype: u16::from_be_bytes([data[12], data[13]]),
        })
    }

    /// Serialize into the first [`ETH_HEADER_LEN`] bytes of `out`.
    pub fn write(&self, out: &mut [u8]) {
        out[0..6].copy_from_slice(&self.dst.0);
        out[6..12].copy_from_slice(&self.src.0);
        out[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
    }
}

/// Entry point for received frames.  Consumes the buffer.
pub fn net_rx(stack: &NetStack, pkt: PacketBuf) {
    stack.stats.rx_frames.fetch_add(1, core::sync::atomic::Ordering::Relaxed);

    let Some(hdr) = EthHeader::parse(pkt.bytes()) else {
        klog_debug!("net: runt frame ({} bytes), dropped", pkt.len());
        stack.stats.rx_dropped.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        return;
    };

    // No MAC filtering: a frame that reached us is assumed addressed to us
    // or broadcast.  Promiscuous by construction.
    match EtherType::from_u16(hdr.ethertype) {
        Some(EtherType::Ipv4) => ipv4::handle_rx(stack, &pkt, ETH_HEADER_LEN),
        Some(EtherType::Arp) => {
            klog_debug!("net: arp frame from {}, no handler", hdr.src);
            stack.stats.rx_dropped.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        }
        None => {
            klog_debug!("net: unknown ethertype {:#06x}, dropped", hdr.ethertype);
            stack.stats.rx_dropped.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eth_header_round_trip() {
        let hdr = EthHeader {
            dst: MacAddr::BROADCAST,
            src: MacAddr([2, 0, 0, 0, 0, 7]),
            ethertype: ETHERTYPE_IPV4,
        };
        let mut buf = [0u8; ETH_HEADER_LEN];
        hdr.write(&mut buf);
        let parsed = EthHeader::parse(&buf).unwrap();
        assert_eq!(parsed.dst, MacAddr::BROADCAST);
        assert_eq!(parsed.src, MacAddr([2, 0, 0, 0, 0, 7]));
        assert_eq!(parsed.ethertype, ETHERTYPE_IPV4);
    }

    #[test]
    fn short_frame_rejected() {
        assert!(EthHeader::parse(&[0u8; 13]).is_none());
    }

    #[test]
    fn ethertype_mapping() {
        assert_eq!(EtherType::from_u16(0x0800), Some(EtherType::Ipv4));
        assert_eq!(EtherType::from_u16(0x0806), Some(EtherType::Arp));
        assert_eq!(EtherType::from_u16(0x86dd), None);
    }
}
