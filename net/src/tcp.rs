//! Minimal TCP state machine.
//!
//! Connections live in a bounded table keyed by their 4-tuple.  The state
//! machine itself is pure: [`TcpTable::segment_arrived`] mutates connection
//! state and **returns** the segments to emit as [`TcpOutSegment`] values
//! rather than transmitting inline.  The caller emits them after the table
//! lock is released, so the transmit path never runs under the TCP lock.
//!
//! Out of scope, deliberately: retransmission, timers, receive buffering,
//! congestion control, sequence-number wraparound.  A passive close goes
//! straight from `Established` to `LastAck`, emitting the ACK and FIN+ACK
//! back to back, so `CloseWait` is never entered on that path.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::checksum;
use crate::netstack::NetStack;
use crate::socket;
use crate::types::{Ipv4Addr, NetError, Port, SockAddr};
use crate::IPPROTO_TCP;
use rillos_lib::{klog_debug, klog_warn};

/// TCP header length without options.  All emitted segments use this.
pub const TCP_HEADER_LEN: usize = 20;

/// Maximum simultaneous connections in the table.
pub const MAX_CONNECTIONS: usize = 64;

/// Advertised receive window.  Static; there is no receive buffer to drain.
pub const DEFAULT_WINDOW: u16 = 8192;

bitflags! {
    /// TCP control flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

/// Parsed TCP header.
#[derive(Clone, Copy, Debug)]
pub struct TcpHeader {
    pub src_port: Port,
    pub dst_port: Port,
    pub seq: u32,
    pub ack: u32,
    /// Header length in 32-bit words.
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
}

impl TcpHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < TCP_HEADER_LEN {
            return None;
        }
        Some(Self {
            src_port: Port::from_network_bytes([data[0], data[1]]),
            dst_port: Port::from_network_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            data_offset: data[12] >> 4,
            flags: TcpFlags::from_bits_truncate(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            checksum: u16::from_be_bytes([data[16], data[17]]),
            urgent: u16::from_be_bytes([data[18], data[19]]),
        })
    }

    /// Header length in bytes.
    pub fn header_len(&self) -> usize {
        usize::from(self.data_offset) * 4
    }

    /// Serialize into the first 20 bytes of `out` with a zero checksum; the
    /// caller patches the checksum afterwards.
    pub fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.src_port.to_network_bytes());
        out[2..4].copy_from_slice(&self.dst_port.to_network_bytes());
        out[4..8].copy_from_slice(&self.seq.to_be_bytes());
        out[8..12].copy_from_slice(&self.ack.to_be_bytes());
        out[12] = self.data_offset << 4;
        out[13] = self.flags.bits();
        out[14..16].copy_from_slice(&self.window.to_be_bytes());
        out[16..18].copy_from_slice(&[0, 0]);
        out[18..20].copy_from_slice(&self.urgent.to_be_bytes());
    }
}

/// TCP connection states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl TcpState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::FinWait1 => "FIN_WAIT_1",
            Self::FinWait2 => "FIN_WAIT_2",
            Self::CloseWait => "CLOSE_WAIT",
            Self::Closing => "CLOSING",
            Self::LastAck => "LAST_ACK",
            Self::TimeWait => "TIME_WAIT",
        }
    }
}

/// Connection 4-tuple, the table key.  `Ord` for `BTreeMap` keying.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TcpTuple {
    pub local: SockAddr,
    pub remote: SockAddr,
}

/// Mutable per-connection state.
#[derive(Clone, Copy, Debug)]
pub struct TcpConnection {
    pub tuple: TcpTuple,
    pub state: TcpState,
    /// Next sequence number we will send.
    pub seq_num: u32,
    /// Next sequence number we expect from the peer.
    pub ack_num: u32,
    pub window: u16,
}

/// A segment the state machine wants emitted.  Carries everything needed to
/// build the wire header; the payload (if any) travels separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpOutSegment {
    pub tuple: TcpTuple,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub window: u16,
}

/// Outcome of feeding one inbound segment to the table.
#[derive(Debug, Default)]
pub struct TcpInputResult {
    /// Segments to emit, in order, after the table lock is released.
    pub replies: Vec<TcpOutSegment>,
    /// Set when a connection reached `Established` on this segment.
    pub established: Option<TcpTuple>,
    /// Set when a connection reached `Closed` and was removed.
    pub removed: Option<TcpTuple>,
}

/// Capture a segment for `conn` at its current `seq_num`, then advance
/// `seq_num` past the payload plus one for SYN or FIN.
fn make_segment(conn: &mut TcpConnection, flags: TcpFlags, payload_len: u32) -> TcpOutSegment {
    let seg = TcpOutSegment {
        tuple: conn.tuple,
        seq: conn.seq_num,
        ack: conn.ack_num,
        flags,
        window: conn.window,
    };
    let mut advance = payload_len;
    if flags.intersects(TcpFlags::SYN | TcpFlags::FIN) {
        advance += 1;
    }
    conn.seq_num = conn.seq_num.wrapping_add(advance);
    seg
}

/// Bounded connection table plus the ephemeral port allocator.
pub struct TcpTable {
    conns: alloc::collections::BTreeMap<TcpTuple, TcpConnection>,
    next_ephemeral: u16,
}

impl TcpTable {
    pub const fn new() -> Self {
        Self {
            conns: alloc::collections::BTreeMap::new(),
            next_ephemeral: Port::EPHEMERAL_FIRST.0,
        }
    }

    /// Hand out the next ephemeral port, wrapping from 65535 back to the
    /// start of the range.  Reuse after wrap is caught by the tuple
    /// collision check in [`connect`].
    pub fn alloc_ephemeral_port(&mut self) -> Port {
        let port = self.next_ephemeral;
        self.next_ephemeral = if port == u16::MAX {
            Port::EPHEMERAL_FIRST.0
        } else {
            port + 1
        };
        Port(port)
    }

    pub fn get(&self, tuple: &TcpTuple) -> Option<&TcpConnection> {
        self.conns.get(tuple)
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Feed one inbound segment through the state machine.
    ///
    /// `src`/`dst` are the datagram's IP addresses; from our point of view
    /// the connection's local side is `dst` and remote side is `src`.
    /// Total over all states and flag combinations: anything unmatched is a
    /// silent no-op.
    pub fn segment_arrived(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        hdr: &TcpHeader,
        payload_len: usize,
    ) -> TcpInputResult {
        let tuple = TcpTuple {
            local: SockAddr::new(dst, hdr.dst_port),
            remote: SockAddr::new(src, hdr.src_port),
        };
        let mut result = TcpInputResult::default();

        let Some(conn) = self.conns.get_mut(&tuple) else {
            // Passive open: a SYN to an unknown tuple creates the connection.
            if hdr.flags.contains(TcpFlags::SYN) && !hdr.flags.contains(TcpFlags::ACK) {
                if self.conns.len() >= MAX_CONNECTIONS {
                    klog_warn!("tcp: table full, syn from {} dropped", tuple.remote);
                    return result;
                }
                let mut conn = TcpConnection {
                    tuple,
                    state: TcpState::SynReceived,
                    seq_num: 0,
                    ack_num: hdr.seq.wrapping_add(1),
                    window: DEFAULT_WINDOW,
                };
                result
                    .replies
                    .push(make_segment(&mut conn, TcpFlags::SYN | TcpFlags::ACK, 0));
                klog_debug!("tcp: {:?} -> {}", tuple, conn.state.name());
                self.conns.insert(tuple, conn);
            }
            return result;
        };

        match conn.state {
            TcpState::SynSent => {
                if hdr.flags.contains(TcpFlags::SYN | TcpFlags::ACK) {
                    conn.ack_num = hdr.seq.wrapping_add(1);
                    conn.seq_num = hdr.ack;
                    conn.state = TcpState::Established;
                    result.replies.push(make_segment(conn, TcpFlags::ACK, 0));
                    result.established = Some(tuple);
                    klog_debug!("tcp: {:?} established (active)", tuple);
                }
            }
            TcpState::SynReceived => {
                if hdr.flags.contains(TcpFlags::ACK) && !hdr.flags.contains(TcpFlags::SYN) {
                    conn.seq_num = hdr.ack;
                    conn.state = TcpState::Established;
                    result.established = Some(tuple);
                    klog_debug!("tcp: {:?} established (passive)", tuple);
                }
            }
            TcpState::Established => {
                if payload_len > 0 {
                    conn.ack_num = hdr.seq.wrapping_add(payload_len as u32);
                    result.replies.push(make_segment(conn, TcpFlags::ACK, 0));
                }
                if hdr.flags.contains(TcpFlags::FIN) {
                    // Passive close, collapsed: ACK the FIN, send our own
                    // FIN immediately, and skip CloseWait entirely.
                    conn.ack_num = conn.ack_num.wrapping_add(1);
                    result.replies.push(make_segment(conn, TcpFlags::ACK, 0));
                    result
                        .replies
                        .push(make_segment(conn, TcpFlags::FIN | TcpFlags::ACK, 0));
                    conn.state = TcpState::LastAck;
                    klog_debug!("tcp: {:?} -> LAST_ACK", tuple);
                }
            }
            TcpState::FinWait1 => {
                if hdr.flags.contains(TcpFlags::ACK) {
                    conn.state = TcpState::FinWait2;
                }
                if hdr.flags.contains(TcpFlags::FIN) {
                    conn.ack_num = conn.ack_num.wrapping_add(1);
                    result.replies.push(make_segment(conn, TcpFlags::ACK, 0));
                    conn.state = if conn.state == TcpState::FinWait2 {
                        TcpState::TimeWait
                    } else {
                        TcpState::Closing
                    };
                    klog_debug!("tcp: {:?} -> {}", tuple, conn.state.name());
                }
            }
            TcpState::FinWait2 => {
                if hdr.flags.contains(TcpFlags::FIN) {
                    conn.ack_num = conn.ack_num.wrapping_add(1);
                    result.replies.push(make_segment(conn, TcpFlags::ACK, 0));
                    conn.state = TcpState::TimeWait;
                    klog_debug!("tcp: {:?} -> TIME_WAIT", tuple);
                }
            }
            TcpState::Closing => {
                if hdr.flags.contains(TcpFlags::ACK) {
                    conn.state = TcpState::TimeWait;
                }
            }
            TcpState::LastAck => {
                if hdr.flags.contains(TcpFlags::ACK) {
                    conn.state = TcpState::Closed;
                    self.conns.remove(&tuple);
                    result.removed = Some(tuple);
                    klog_debug!("tcp: {:?} closed", tuple);
                }
            }
            // TimeWait lingers until removal; no timer reclaims it.
            TcpState::TimeWait
            | TcpState::Closed
            | TcpState::Listen
            | TcpState::CloseWait => {}
        }
        result
    }

    /// Active open: allocate an ephemeral port, create the connection in
    /// `SynSent`, and return the SYN to emit.
    pub fn connect(
        &mut self,
        local_ip: Ipv4Addr,
        remote: SockAddr,
        local_port: Option<Port>,
    ) -> Result<(TcpTuple, TcpOutSegment), NetError> {
        if self.conns.len() >= MAX_CONNECTIONS {
            return Err(NetError::TableFull);
        }
        let port = match local_port {
            Some(p) => p,
            None => self.alloc_ephemeral_port(),
        };
        let tuple = TcpTuple {
            local: SockAddr::new(local_ip, port),
            remote,
        };
        if self.conns.contains_key(&tuple) {
            return Err(NetError::AddressInUse);
        }
        let mut conn = TcpConnection {
            tuple,
            state: TcpState::SynSent,
            seq_num: 0,
            ack_num: 0,
            window: DEFAULT_WINDOW,
        };
        let syn = make_segment(&mut conn, TcpFlags::SYN, 0);
        self.conns.insert(tuple, conn);
        klog_debug!("tcp: {:?} -> SYN_SENT", tuple);
        Ok((tuple, syn))
    }

    /// Local close.  Returns the FIN to emit, if any.
    ///
    /// A connection that never completed its handshake is just removed;
    /// an already-absent tuple is a no-op.
    pub fn close(&mut self, tuple: TcpTuple) -> Result<Option<TcpOutSegment>, NetError> {
        let Some(conn) = self.conns.get_mut(&tuple) else {
            return Ok(None);
        };
        match conn.state {
            TcpState::Established | TcpState::SynReceived => {
                let fin = make_segment(conn, TcpFlags::FIN | TcpFlags::ACK, 0);
                conn.state = TcpState::FinWait1;
                klog_debug!("tcp: {:?} -> FIN_WAIT_1", tuple);
                Ok(Some(fin))
            }
            TcpState::CloseWait => {
                let fin = make_segment(conn, TcpFlags::FIN | TcpFlags::ACK, 0);
                conn.state = TcpState::LastAck;
                Ok(Some(fin))
            }
            TcpState::SynSent => {
                self.conns.remove(&tuple);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Queue `payload_len` bytes for transmission on an established
    /// connection.  Returns the data segment to emit.
    pub fn send(&mut self, tuple: TcpTuple, payload_len: usize) -> Result<TcpOutSegment, NetError> {
        let Some(conn) = self.conns.get_mut(&tuple) else {
            return Err(NetError::NotConnected);
        };
        if conn.state != TcpState::Established {
            return Err(NetError::NotConnected);
        }
        Ok(make_segment(
            conn,
            TcpFlags::PSH | TcpFlags::ACK,
            payload_len as u32,
        ))
    }
}

impl Default for TcpTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Process an inbound TCP segment: run the state machine under the table
/// lock, then emit replies and notify the socket layer with no lock held.
pub fn handle_rx(stack: &NetStack, src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) {
    let Some(hdr) = TcpHeader::parse(segment) else {
        klog_debug!("tcp: truncated segment from {}, dropped", src);
        return;
    };
    let header_len = hdr.header_len();
    if header_len < TCP_HEADER_LEN || header_len > segment.len() {
        klog_debug!("tcp: bad data offset from {}, dropped", src);
        return;
    }
    // Inbound checksum is not verified; corruption surfaces as protocol
    // confusion, not a drop.
    let payload_len = segment.len() - header_len;

    let result = stack
        .tcp
        .lock()
        .segment_arrived(src, dst, &hdr, payload_len);

    for seg in &result.replies {
        if let Err(err) = emit_segment(stack, seg, &[]) {
            klog_warn!("tcp: reply to {} failed: {}", seg.tuple.remote, err);
        }
    }
    socket::notify_tcp(stack, &result);
}

/// Serialize a [`TcpOutSegment`] (plus optional payload) and hand it to the
/// IPv4 transmit path on the stack's default interface.
pub fn emit_segment(
    stack: &NetStack,
    seg: &TcpOutSegment,
    payload: &[u8],
) -> Result<(), NetError> {
    let hdr = TcpHeader {
        src_port: seg.tuple.local.port,
        dst_port: seg.tuple.remote.port,
        seq: seg.seq,
        ack: seg.ack,
        data_offset: (TCP_HEADER_LEN / 4) as u8,
        flags: seg.flags,
        window: seg.window,
        checksum: 0,
        urgent: 0,
    };
    let mut wire = Vec::with_capacity(TCP_HEADER_LEN + payload.len());
    wire.resize(TCP_HEADER_LEN, 0);
    hdr.write(&mut wire);
    wire.extend_from_slice(payload);
    let sum = checksum::tcp_checksum(seg.tuple.local.ip, seg.tuple.remote.ip, &wire);
    wire[16..18].copy_from_slice(&sum.to_be_bytes());

    let iface = stack.config.default_iface;
    crate::ipv4::send(stack, iface.as_str(), IPPROTO_TCP, seg.tuple.remote.ip, &wire)
}
