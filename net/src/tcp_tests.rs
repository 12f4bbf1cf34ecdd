//! State-machine tests driving [`TcpTable`] directly, without a stack or
//! wire encoding in the way.

use crate::tcp::*;
use crate::types::{Ipv4Addr, NetError, Port, SockAddr};

const LOCAL_IP: Ipv4Addr = Ipv4Addr([10, 0, 0, 2]);
const PEER_IP: Ipv4Addr = Ipv4Addr([10, 0, 0, 99]);

fn peer(port: u16) -> SockAddr {
    SockAddr::new(PEER_IP, Port(port))
}

fn inbound(tuple: TcpTuple, seq: u32, ack: u32, flags: TcpFlags) -> TcpHeader {
    TcpHeader {
        src_port: tuple.remote.port,
        dst_port: tuple.local.port,
        seq,
        ack,
        data_offset: 5,
        flags,
        window: DEFAULT_WINDOW,
        checksum: 0,
        urgent: 0,
    }
}

#[test]
fn header_round_trip() {
    let hdr = TcpHeader {
        src_port: Port(49152),
        dst_port: Port(80),
        seq: 0x11223344,
        ack: 0x55667788,
        data_offset: 5,
        flags: TcpFlags::SYN | TcpFlags::ACK,
        window: DEFAULT_WINDOW,
        checksum: 0,
        urgent: 0,
    };
    let mut buf = [0u8; TCP_HEADER_LEN];
    hdr.write(&mut buf);
    let parsed = TcpHeader::parse(&buf).unwrap();
    assert_eq!(parsed.src_port, Port(49152));
    assert_eq!(parsed.dst_port, Port(80));
    assert_eq!(parsed.seq, 0x11223344);
    assert_eq!(parsed.ack, 0x55667788);
    assert_eq!(parsed.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(parsed.window, DEFAULT_WINDOW);
}

#[test]
fn active_open_handshake() {
    let mut table = TcpTable::new();
    let (tuple, syn) = table.connect(LOCAL_IP, peer(80), None).unwrap();
    assert_eq!(syn.flags, TcpFlags::SYN);
    assert_eq!(syn.seq, 0);
    assert!(tuple.local.port.is_ephemeral());
    assert_eq!(table.get(&tuple).unwrap().state, TcpState::SynSent);
    // SYN consumes one sequence number.
    assert_eq!(table.get(&tuple).unwrap().seq_num, 1);

    let synack = inbound(tuple, 1000, 1, TcpFlags::SYN | TcpFlags::ACK);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &synack, 0);
    assert_eq!(result.established, Some(tuple));
    assert_eq!(result.replies.len(), 1);
    let ack = result.replies[0];
    assert_eq!(ack.flags, TcpFlags::ACK);
    assert_eq!(ack.seq, 1);
    assert_eq!(ack.ack, 1001);
    assert_eq!(table.get(&tuple).unwrap().state, TcpState::Established);
}

#[test]
fn passive_open_handshake() {
    let mut table = TcpTable::new();
    let tuple = TcpTuple {
        local: SockAddr::new(LOCAL_IP, Port(80)),
        remote: peer(50000),
    };

    let syn = inbound(tuple, 500, 0, TcpFlags::SYN);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &syn, 0);
    assert_eq!(result.replies.len(), 1);
    let synack = result.replies[0];
    assert_eq!(synack.flags, TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(synack.seq, 0);
    assert_eq!(synack.ack, 501);
    assert_eq!(table.get(&tuple).unwrap().state, TcpState::SynReceived);

    let ack = inbound(tuple, 501, 1, TcpFlags::ACK);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &ack, 0);
    assert_eq!(result.established, Some(tuple));
    assert!(result.replies.is_empty());
    let conn = table.get(&tuple).unwrap();
    assert_eq!(conn.state, TcpState::Established);
    assert_eq!(conn.seq_num, 1);
    assert_eq!(conn.ack_num, 501);
}

#[test]
fn inbound_data_advances_ack() {
    let mut table = TcpTable::new();
    let tuple = establish_passive(&mut table);

    let data = inbound(tuple, 501, 1, TcpFlags::PSH | TcpFlags::ACK);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &data, 100);
    assert_eq!(result.replies.len(), 1);
    let ack = result.replies[0];
    assert_eq!(ack.flags, TcpFlags::ACK);
    assert_eq!(ack.ack, 601);
    assert_eq!(table.get(&tuple).unwrap().ack_num, 601);
}

#[test]
fn passive_close_skips_close_wait() {
    let mut table = TcpTable::new();
    let tuple = establish_passive(&mut table);

    let fin = inbound(tuple, 501, 1, TcpFlags::FIN | TcpFlags::ACK);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &fin, 0);
    // ACK of the FIN followed by our own FIN, back to back.
    assert_eq!(result.replies.len(), 2);
    assert_eq!(result.replies[0].flags, TcpFlags::ACK);
    assert_eq!(result.replies[0].ack, 502);
    assert_eq!(result.replies[1].flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq!(table.get(&tuple).unwrap().state, TcpState::LastAck);

    let last_ack = inbound(tuple, 502, 2, TcpFlags::ACK);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &last_ack, 0);
    assert_eq!(result.removed, Some(tuple));
    assert!(table.get(&tuple).is_none());
}

#[test]
fn active_close_reaches_time_wait() {
    let mut table = TcpTable::new();
    let tuple = establish_passive(&mut table);

    let fin = table.close(tuple).unwrap().unwrap();
    assert_eq!(fin.flags, TcpFlags::FIN | TcpFlags::ACK);
    assert_eq!(table.get(&tuple).unwrap().state, TcpState::FinWait1);

    let ack = inbound(tuple, 501, 2, TcpFlags::ACK);
    table.segment_arrived(PEER_IP, LOCAL_IP, &ack, 0);
    assert_eq!(table.get(&tuple).unwrap().state, TcpState::FinWait2);

    let peer_fin = inbound(tuple, 501, 2, TcpFlags::FIN | TcpFlags::ACK);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &peer_fin, 0);
    assert_eq!(result.replies.len(), 1);
    assert_eq!(result.replies[0].flags, TcpFlags::ACK);
    let conn = table.get(&tuple).unwrap();
    assert_eq!(conn.state, TcpState::TimeWait);
    // TimeWait is inert: further segments are ignored.
    let late = inbound(tuple, 502, 2, TcpFlags::ACK);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &late, 0);
    assert!(result.replies.is_empty());
    assert!(table.get(&tuple).is_some());
}

#[test]
fn simultaneous_close() {
    let mut table = TcpTable::new();
    let tuple = establish_passive(&mut table);
    table.close(tuple).unwrap();

    // Peer's FIN crosses ours: no ACK of our FIN yet.
    let peer_fin = inbound(tuple, 501, 1, TcpFlags::FIN);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &peer_fin, 0);
    assert_eq!(result.replies.len(), 1);
    assert_eq!(table.get(&tuple).unwrap().state, TcpState::Closing);

    let ack = inbound(tuple, 502, 2, TcpFlags::ACK);
    table.segment_arrived(PEER_IP, LOCAL_IP, &ack, 0);
    assert_eq!(table.get(&tuple).unwrap().state, TcpState::TimeWait);
}

#[test]
fn close_in_syn_sent_removes_silently() {
    let mut table = TcpTable::new();
    let (tuple, _) = table.connect(LOCAL_IP, peer(80), None).unwrap();
    assert_eq!(table.close(tuple), Ok(None));
    assert!(table.get(&tuple).is_none());
}

#[test]
fn close_of_unknown_tuple_is_noop() {
    let mut table = TcpTable::new();
    let tuple = TcpTuple {
        local: SockAddr::new(LOCAL_IP, Port(1234)),
        remote: peer(80),
    };
    assert_eq!(table.close(tuple), Ok(None));
}

#[test]
fn stray_segment_without_syn_ignored() {
    let mut table = TcpTable::new();
    let tuple = TcpTuple {
        local: SockAddr::new(LOCAL_IP, Port(80)),
        remote: peer(50000),
    };
    for flags in [TcpFlags::ACK, TcpFlags::FIN, TcpFlags::RST, TcpFlags::PSH] {
        let hdr = inbound(tuple, 1, 1, flags);
        let result = table.segment_arrived(PEER_IP, LOCAL_IP, &hdr, 0);
        assert!(result.replies.is_empty());
        assert!(result.established.is_none());
        assert!(result.removed.is_none());
    }
    assert!(table.is_empty());
}

#[test]
fn syn_ack_to_unknown_tuple_does_not_create() {
    let mut table = TcpTable::new();
    let tuple = TcpTuple {
        local: SockAddr::new(LOCAL_IP, Port(80)),
        remote: peer(50000),
    };
    let hdr = inbound(tuple, 1, 1, TcpFlags::SYN | TcpFlags::ACK);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &hdr, 0);
    assert!(result.replies.is_empty());
    assert!(table.is_empty());
}

#[test]
fn table_bound_enforced() {
    let mut table = TcpTable::new();
    for i in 0..MAX_CONNECTIONS {
        table
            .connect(LOCAL_IP, peer(1000 + i as u16), Some(Port(40000)))
            .unwrap();
    }
    assert_eq!(
        table.connect(LOCAL_IP, peer(20), Some(Port(40000))).unwrap_err(),
        NetError::TableFull
    );
    // Inbound SYNs are dropped silently when full.
    let tuple = TcpTuple {
        local: SockAddr::new(LOCAL_IP, Port(80)),
        remote: peer(50000),
    };
    let syn = inbound(tuple, 0, 0, TcpFlags::SYN);
    let result = table.segment_arrived(PEER_IP, LOCAL_IP, &syn, 0);
    assert!(result.replies.is_empty());
    assert_eq!(table.len(), MAX_CONNECTIONS);
}

#[test]
fn duplicate_tuple_rejected() {
    let mut table = TcpTable::new();
    table
        .connect(LOCAL_IP, peer(80), Some(Port(50000)))
        .unwrap();
    assert_eq!(
        table
            .connect(LOCAL_IP, peer(80), Some(Port(50000)))
            .unwrap_err(),
        NetError::AddressInUse
    );
}

#[test]
fn ephemeral_ports_wrap() {
    let mut table = TcpTable::new();
    assert_eq!(table.alloc_ephemeral_port(), Port::EPHEMERAL_FIRST);
    for _ in 0..16383 {
        table.alloc_ephemeral_port();
    }
    assert_eq!(table.alloc_ephemeral_port(), Port(u16::MAX));
    assert_eq!(table.alloc_ephemeral_port(), Port::EPHEMERAL_FIRST);
}

#[test]
fn send_requires_established() {
    let mut table = TcpTable::new();
    let (tuple, _) = table.connect(LOCAL_IP, peer(80), None).unwrap();
    assert_eq!(table.send(tuple, 10).unwrap_err(), NetError::NotConnected);

    let synack = inbound(tuple, 1000, 1, TcpFlags::SYN | TcpFlags::ACK);
    table.segment_arrived(PEER_IP, LOCAL_IP, &synack, 0);

    let seg = table.send(tuple, 10).unwrap();
    assert_eq!(seg.flags, TcpFlags::PSH | TcpFlags::ACK);
    assert_eq!(seg.seq, 1);
    assert_eq!(seg.ack, 1001);
    // Payload advances the sequence number.
    assert_eq!(table.get(&tuple).unwrap().seq_num, 11);
}

#[test]
fn every_flag_combination_is_handled() {
    // Drive all 64 flag combinations at connections parked in each
    // reachable state; unmatched pairs must be silent no-ops, never panics.
    type Setup = fn(&mut TcpTable) -> TcpTuple;
    let setups: [Setup; 4] = [
        // SynSent
        |t| t.connect(LOCAL_IP, peer(80), Some(Port(50001))).unwrap().0,
        // SynReceived
        |t| {
            let tuple = TcpTuple {
                local: SockAddr::new(LOCAL_IP, Port(80)),
                remote: peer(50000),
            };
            let syn = inbound(tuple, 500, 0, TcpFlags::SYN);
            t.segment_arrived(PEER_IP, LOCAL_IP, &syn, 0);
            tuple
        },
        // Established
        establish_passive,
        // FinWait1
        |t| {
            let tuple = establish_passive(t);
            t.close(tuple).unwrap();
            tuple
        },
    ];
    for setup in setups {
        let mut table = TcpTable::new();
        let tuple = setup(&mut table);
        for bits in 0u8..=0x3f {
            let hdr = inbound(tuple, 7, 7, TcpFlags::from_bits_truncate(bits));
            let result = table.segment_arrived(PEER_IP, LOCAL_IP, &hdr, 0);
            assert!(result.replies.len() <= 2);
            assert!(table.len() <= MAX_CONNECTIONS);
        }
    }
}

/// Build an established passive connection: peer seq starts at 500, so our
/// ack_num is 501; our seq_num is 1 after the SYN+ACK.
fn establish_passive(table: &mut TcpTable) -> TcpTuple {
    let tuple = TcpTuple {
        local: SockAddr::new(LOCAL_IP, Port(80)),
        remote: peer(50000),
    };
    let syn = inbound(tuple, 500, 0, TcpFlags::SYN);
    table.segment_arrived(PEER_IP, LOCAL_IP, &syn, 0);
    let ack = inbound(tuple, 501, 1, TcpFlags::ACK);
    table.segment_arrived(PEER_IP, LOCAL_IP, &ack, 0);
    assert_eq!(table.get(&tuple).unwrap().state, TcpState::Established);
    tuple
}
