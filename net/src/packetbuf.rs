//! Move-only packet buffer handle.
//!
//! A [`PacketBuf`] owns exactly one slot of the global [`PACKET_POOL`] from
//! allocation to drop.  It is deliberately not `Clone`: passing one to a
//! driver's `transmit` consumes it, so use-after-transmit and double-release
//! are compile errors rather than runtime bugs.

use core::fmt;

use crate::pool::{BUF_SIZE, PACKET_POOL, PacketPool};
use crate::types::{IfIndex, NetError};

/// An owned packet buffer backed by a pool slot.
pub struct PacketBuf {
    pool: &'static PacketPool,
    slot: u16,
    len: usize,
    capacity: usize,
    iface: Option<IfIndex>,
}

impl PacketBuf {
    /// Allocate an empty buffer able to hold `capacity` bytes.
    ///
    /// Fails with `OutOfMemory` when the pool is exhausted or `capacity`
    /// exceeds the slot size.
    pub fn alloc(capacity: usize) -> Result<Self, NetError> {
        if capacity > BUF_SIZE {
            return Err(NetError::OutOfMemory);
        }
        let slot = PACKET_POOL.alloc().ok_or(NetError::OutOfMemory)?;
        Ok(Self {
            pool: &PACKET_POOL,
            slot,
            len: 0,
            capacity,
            iface: None,
        })
    }

    /// Allocate a buffer and copy a received frame into it, tagging the
    /// ingress interface.  Used on the RX path by drivers.
    pub fn from_frame(data: &[u8], iface: IfIndex) -> Result<Self, NetError> {
        let mut buf = Self::alloc(data.len())?;
        buf.append(data)?;
        buf.iface = Some(iface);
        Ok(buf)
    }

    /// The valid bytes of the packet.
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: we own the slot exclusively and len <= capacity <= BUF_SIZE.
        unsafe { core::slice::from_raw_parts(self.pool.slot_data(self.slot), self.len) }
    }

    /// Mutable view of the valid bytes.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: exclusive ownership via &mut self; len is in bounds.
        unsafe { core::slice::from_raw_parts_mut(self.pool.slot_data(self.slot), self.len) }
    }

    /// Append `data`, growing `len`.  Fails with `NoBufferSpace` if the
    /// buffer's capacity would be exceeded; the buffer is unchanged on error.
    pub fn append(&mut self, data: &[u8]) -> Result<(), NetError> {
        if self.len + data.len() > self.capacity {
            return Err(NetError::NoBufferSpace);
        }
        // SAFETY: destination range [len, len + data.len()) is within the
        // slot and exclusively ours.
        unsafe {
            core::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.pool.slot_data(self.slot).add(self.len),
                data.len(),
            );
        }
        self.len += data.len();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The interface this packet arrived on or will leave through, if tagged.
    pub fn iface(&self) -> Option<IfIndex> {
        self.iface
    }

    pub fn set_iface(&mut self, iface: IfIndex) {
        self.iface = Some(iface);
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        self.pool.release(self.slot);
    }
}

// Metadata only; payload bytes are not interesting in logs.
impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuf")
            .field("slot", &self.slot)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("iface", &self.iface)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_returns_slot() {
        PACKET_POOL.init();
        // A leaked slot per iteration would exhaust the pool mid-loop.
        for _ in 0..crate::pool::POOL_SIZE * 3 {
            let buf = PacketBuf::alloc(BUF_SIZE).unwrap();
            drop(buf);
        }
    }

    #[test]
    fn append_respects_capacity() {
        PACKET_POOL.init();
        let mut buf = PacketBuf::alloc(4).unwrap();
        assert_eq!(buf.append(&[1, 2, 3]), Ok(()));
        assert_eq!(buf.append(&[4, 5]), Err(NetError::NoBufferSpace));
        // Unchanged on error.
        assert_eq!(buf.bytes(), &[1, 2, 3]);
        assert_eq!(buf.append(&[4]), Ok(()));
        assert_eq!(buf.bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn oversized_capacity_rejected() {
        PACKET_POOL.init();
        assert!(matches!(
            PacketBuf::alloc(BUF_SIZE + 1),
            Err(NetError::OutOfMemory)
        ));
    }

    #[test]
    fn from_frame_tags_iface() {
        PACKET_POOL.init();
        let buf = PacketBuf::from_frame(&[0xde, 0xad], IfIndex(3)).unwrap();
        assert_eq!(buf.bytes(), &[0xde, 0xad]);
        assert_eq!(buf.iface(), Some(IfIndex(3)));
    }
}
