//! RFC 1071 internet checksum.
//!
//! Shared by the IPv4 header checksum and the TCP checksum (which prepends a
//! pseudo-header covering source, destination, protocol, and segment length).

use crate::IPPROTO_TCP;
use crate::types::Ipv4Addr;

/// Sum `data` as big-endian 16-bit words into a 32-bit accumulator.
///
/// An odd trailing byte is treated as the high byte of a final word whose low
/// byte is zero.  Carries are not folded here; see [`fold`].
pub fn ones_complement_sum(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    sum
}

/// Fold the accumulated carries back into 16 bits and complement.
pub fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Compute the checksum of `data` with the checksum field zeroed by the caller.
pub fn checksum(data: &[u8]) -> u16 {
    fold(ones_complement_sum(data))
}

/// Verify a buffer whose checksum field is populated: the sum over the whole
/// buffer folds to zero when the data is intact.
pub fn verify(data: &[u8]) -> bool {
    fold(ones_complement_sum(data)) == 0
}

/// Partial sum over the TCP pseudo-header (src, dst, zero+protocol, length).
pub fn pseudo_header_sum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, len: u16) -> u32 {
    let mut sum: u32 = 0;
    sum += u32::from(u16::from_be_bytes([src.0[0], src.0[1]]));
    sum += u32::from(u16::from_be_bytes([src.0[2], src.0[3]]));
    sum += u32::from(u16::from_be_bytes([dst.0[0], dst.0[1]]));
    sum += u32::from(u16::from_be_bytes([dst.0[2], dst.0[3]]));
    sum += u32::from(protocol);
    sum += u32::from(len);
    sum
}

/// TCP checksum over pseudo-header plus the full segment (header + payload).
/// The segment's checksum field must be zero when computing.
pub fn tcp_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> u16 {
    let pseudo = pseudo_header_sum(src, dst, IPPROTO_TCP, segment.len() as u16);
    fold(pseudo + ones_complement_sum(segment))
}
