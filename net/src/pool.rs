//! Fixed-slab packet buffer pool.
//!
//! The pool owns a static array of `POOL_SIZE` slots, each `BUF_SIZE` bytes,
//! carved up at init and recycled through a free list.  No allocation happens
//! on the packet path: exhaustion is an explicit, recoverable error surfaced
//! as `NetError::OutOfMemory` by [`crate::packetbuf::PacketBuf::alloc`].
//!
//! Slot payload access is only reachable through a live
//! [`crate::packetbuf::PacketBuf`], whose move-only ownership guarantees a
//! slot has exactly one user between alloc and release.

use core::cell::UnsafeCell;

use spin::Mutex;

/// Size of each packet buffer slot in bytes.  Covers a full Ethernet MTU
/// frame with headroom.
pub const BUF_SIZE: usize = 2048;

/// Number of slots in the pool.
pub const POOL_SIZE: usize = 256;

/// Backing storage for all packet slots.  Cache-line aligned so adjacent
/// slots never share a line with pool metadata.
#[repr(C, align(64))]
struct PoolStorage {
    slots: UnsafeCell<[[u8; BUF_SIZE]; POOL_SIZE]>,
}

// SAFETY: slot payload bytes are only reached through a PacketBuf that holds
// exclusive ownership of its slot index, so no two threads touch the same
// slot concurrently.
unsafe impl Sync for PoolStorage {}

static STORAGE: PoolStorage = PoolStorage {
    slots: UnsafeCell::new([[0; BUF_SIZE]; POOL_SIZE]),
};

struct FreeList {
    /// `next_free[i]` is the slot index following `i` on the free list.
    next_free: [u16; POOL_SIZE],
    /// Head of the free list, or `u16::MAX` when empty.
    head: u16,
    available: usize,
    initialized: bool,
}

const FREELIST_END: u16 = u16::MAX;

/// The global packet pool.  All buffers in the system come from here.
pub struct PacketPool {
    freelist: Mutex<FreeList>,
}

impl PacketPool {
    const fn new() -> Self {
        Self {
            freelist: Mutex::new(FreeList {
                next_free: [0; POOL_SIZE],
                head: FREELIST_END,
                available: 0,
                initialized: false,
            }),
        }
    }

    /// Thread all slots onto the free list.  Idempotent; later calls are
    /// no-ops so repeated stack bring-up cannot leak or double-free slots.
    pub fn init(&self) {
        let mut guard = self.freelist.lock();
        let fl = &mut *guard;
        if fl.initialized {
            return;
        }
        for i in 0..POOL_SIZE {
            fl.next_free[i] = if i + 1 < POOL_SIZE {
                (i + 1) as u16
            } else {
                FREELIST_END
            };
        }
        fl.head = 0;
        fl.available = POOL_SIZE;
        fl.initialized = true;
    }

    /// Pop a free slot index, or `None` when the pool is exhausted.
    pub fn alloc(&self) -> Option<u16> {
        let mut guard = self.freelist.lock();
        let fl = &mut *guard;
        if fl.head == FREELIST_END {
            return None;
        }
        let slot = fl.head;
        fl.head = fl.next_free[slot as usize];
        fl.available -= 1;
        Some(slot)
    }

    /// Push a slot back onto the free list.
    ///
    /// Called from `PacketBuf::drop`, which is the only place a slot index
    /// escapes a buffer, so each slot is released at most once.
    pub fn release(&self, slot: u16) {
        debug_assert!((slot as usize) < POOL_SIZE);
        let mut guard = self.freelist.lock();
        let fl = &mut *guard;
        fl.next_free[slot as usize] = fl.head;
        fl.head = slot;
        fl.available += 1;
    }

    /// Number of slots currently free.
    pub fn available(&self) -> usize {
        self.freelist.lock().available
    }

    /// Raw pointer to the payload bytes of `slot`.
    ///
    /// Callers must hold exclusive ownership of `slot` (a live `PacketBuf`).
    pub(crate) fn slot_data(&self, slot: u16) -> *mut u8 {
        debug_assert!((slot as usize) < POOL_SIZE);
        // SAFETY: slot is in bounds; exclusivity is the caller's invariant.
        unsafe { (*STORAGE.slots.get())[slot as usize].as_mut_ptr() }
    }
}

/// The single global pool instance.
pub static PACKET_POOL: PacketPool = PacketPool::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        PACKET_POOL.init();
        PACKET_POOL.init();
        let slot = PACKET_POOL.alloc().unwrap();
        PACKET_POOL.release(slot);
    }

    #[test]
    fn alloc_hands_out_distinct_slots() {
        PACKET_POOL.init();
        let a = PACKET_POOL.alloc().unwrap();
        let b = PACKET_POOL.alloc().unwrap();
        let c = PACKET_POOL.alloc().unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
        PACKET_POOL.release(a);
        PACKET_POOL.release(b);
        PACKET_POOL.release(c);
    }
}
