//! Free Entry (C1): the in-band header written at the start of an unused
//! heap chunk.
//!
//! Unlike the teacher's `Span`, which is out-of-band metadata allocated from
//! a dedicated slab (see the teacher's `span::SpanSlabInner`), a free entry
//! here *is* the first bytes of the free chunk it describes — there is no
//! separate metadata allocator. This matches spec.md §9's design note: "a
//! typed view over an untyped byte range plus explicit lifetime handoff when
//! an allocation consumes an entry." All access goes through raw pointers;
//! nothing here holds a Rust reference across a point where the bytes could
//! be handed to a caller as live memory.

use core::mem::size_of;
use core::ptr;

/// Placeholder for the surrounding collector's real dead-object encoding
/// (spec.md §3.1, §1's "sentinel encoding recognized by the surrounding
/// collector"). That encoding lives outside this crate's scope; this value
/// stands in for it so the pool's own invariant checks have something
/// concrete to assert against.
pub const DEAD_OBJECT_SENTINEL: u32 = 0xDEAD_0B1E;

/// In-band free-list node. Always written at the start of a byte range of at
/// least `size` bytes that is not reachable by live data.
#[repr(C)]
pub struct FreeEntry {
    /// Bytes covered by this entry, including the header itself. Always a
    /// multiple of the pool's alignment unit and at least
    /// `PoolConfig::FREE_ENTRY_HEADER_SIZE`.
    pub size: usize,
    /// Next free entry on the same sub-list, in address order. Null at the
    /// end of a sub-list.
    pub next: *mut FreeEntry,
}

impl FreeEntry {
    /// Size of the in-band header itself — the floor for
    /// `minimum_free_entry_size`.
    pub const HEADER_SIZE: usize = size_of::<FreeEntry>();

    /// Write a free entry's header at `addr`, covering `size` bytes, and mark
    /// it as dead-object padding. `size` must be at least `HEADER_SIZE`.
    ///
    /// # Safety
    /// `addr` must be valid for writes of `size` bytes, and those bytes must
    /// not be reachable by live data (the caller is handing ownership of the
    /// range to the free list).
    pub unsafe fn install(addr: *mut u8, size: usize, next: *mut FreeEntry) -> *mut FreeEntry {
        debug_assert!(size >= Self::HEADER_SIZE);
        let entry = addr as *mut FreeEntry;
        unsafe {
            (*entry).size = size;
            (*entry).next = next;
            Self::write_dead_object_sentinel(entry);
        }
        entry
    }

    /// Base address of this entry.
    #[inline]
    pub fn addr(entry: *const FreeEntry) -> *mut u8 {
        entry as *mut u8
    }

    /// One past the last byte this entry covers.
    ///
    /// # Safety
    /// `entry` must be a valid, live `FreeEntry`.
    #[inline]
    pub unsafe fn end_addr(entry: *const FreeEntry) -> *mut u8 {
        unsafe { Self::addr(entry).add((*entry).size) }
    }

    /// Write the dead-object sentinel into the entry's body, immediately
    /// after the header, when there's room for it. Entries whose `size`
    /// is exactly `HEADER_SIZE` have no body to mark; the header's mere
    /// presence as a free-list node is the only signal available to them
    /// (in the real collector, the header's address and size are cross
    /// checked against the sub-list itself).
    ///
    /// # Safety
    /// `entry` must be valid for writes covering its own declared `size`.
    pub unsafe fn write_dead_object_sentinel(entry: *mut FreeEntry) {
        unsafe {
            let size = (*entry).size;
            if size >= Self::HEADER_SIZE + size_of::<u32>() {
                let marker = (entry as *mut u8).add(Self::HEADER_SIZE) as *mut u32;
                marker.write_unaligned(DEAD_OBJECT_SENTINEL);
            }
        }
    }

    /// Check the dead-object sentinel written by [`write_dead_object_sentinel`].
    /// Asserted by the allocator before consuming an entry (spec.md §3.1,
    /// §4.3's "Dead-object sentinel" note).
    ///
    /// # Safety
    /// `entry` must be a valid, live `FreeEntry`.
    pub unsafe fn has_dead_object_sentinel(entry: *const FreeEntry) -> bool {
        unsafe {
            let size = (*entry).size;
            if size < Self::HEADER_SIZE + size_of::<u32>() {
                return true;
            }
            let marker = (entry as *const u8).add(Self::HEADER_SIZE) as *const u32;
            marker.read_unaligned() == DEAD_OBJECT_SENTINEL
        }
    }

    /// Zero the header fields of a range about to be handed to a caller as
    /// live memory. Not required for correctness (the caller owns the bytes
    /// from here on) but avoids leaving a stale `next` pointer lying around
    /// for debugging clarity.
    ///
    /// # Safety
    /// `addr` must be valid for writes of at least `HEADER_SIZE` bytes.
    pub unsafe fn scrub(addr: *mut u8) {
        unsafe { ptr::write_bytes(addr, 0, Self::HEADER_SIZE) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    #[test]
    fn install_and_read_back() {
        let mut buf = vec![0xAAu8; 64];
        let addr = buf.as_mut_ptr();
        unsafe {
            let entry = FreeEntry::install(addr, 64, ptr::null_mut());
            assert_eq!((*entry).size, 64);
            assert!((*entry).next.is_null());
            assert!(FreeEntry::has_dead_object_sentinel(entry));
            assert_eq!(FreeEntry::end_addr(entry), addr.add(64));
        }
    }

    #[test]
    fn tiny_entry_without_room_for_sentinel_is_trusted() {
        let mut buf = vec![0u8; FreeEntry::HEADER_SIZE];
        let addr = buf.as_mut_ptr();
        unsafe {
            let entry = FreeEntry::install(addr, FreeEntry::HEADER_SIZE, ptr::null_mut());
            assert!(FreeEntry::has_dead_object_sentinel(entry));
        }
    }

    #[test]
    fn corrupted_sentinel_detected() {
        let mut buf = vec![0u8; 64];
        let addr = buf.as_mut_ptr();
        unsafe {
            let entry = FreeEntry::install(addr, 64, ptr::null_mut());
            let marker = addr.add(FreeEntry::HEADER_SIZE) as *mut u32;
            marker.write_unaligned(0);
            assert!(!FreeEntry::has_dead_object_sentinel(entry));
        }
    }

    #[test]
    fn linking_two_entries() {
        let mut buf = vec![0u8; 128];
        let addr = buf.as_mut_ptr();
        unsafe {
            let second = FreeEntry::install(addr.add(64), 64, ptr::null_mut());
            let first = FreeEntry::install(addr, 64, second);
            assert_eq!((*first).next, second);
            assert_eq!(FreeEntry::end_addr(first), FreeEntry::addr(second));
        }
    }
}
