//! Hint Cache (C2): per-sub-list bounded cache accelerating first-fit search
//! (spec.md §3.2, §4.1).
//!
//! Grounded in the teacher's `histogram.rs` bucket-array style of fixed,
//! pre-sized storage, but indexed rather than atomic — hint bookkeeping
//! always happens under the owning sub-list's `SpinMutex`, so plain `Cell`-
//! free mutation is sufficient. Active/inactive lists are threaded by slot
//! index rather than pointer (`Option<usize>` links) to avoid a second
//! unsafe-aliasing story on top of the free entries themselves.

extern crate alloc;

use crate::free_entry::FreeEntry;
use core::ptr;

struct Hint {
    /// Size recorded when this hint was added. May be stale: the entry it
    /// points to can have shrunk since (testable property 4, spec.md §8).
    size: usize,
    entry: *mut FreeEntry,
    lru: u64,
    /// Next slot in whichever of the two lists currently holds this hint.
    link: Option<usize>,
}

impl Hint {
    const EMPTY: Hint = Hint {
        size: 0,
        entry: ptr::null_mut(),
        lru: 0,
        link: None,
    };
}

/// Bounded hint cache for one sub-list.
pub struct HintCache {
    hints: alloc::vec::Vec<Hint>,
    active_head: Option<usize>,
    inactive_head: Option<usize>,
    lru_clock: u64,
}

impl HintCache {
    /// Build a cache with `capacity` slots, all initially inactive.
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        let mut hints = alloc::vec::Vec::with_capacity(capacity);
        let mut inactive_head = None;
        for i in 0..capacity {
            hints.push(Hint::EMPTY);
            hints[i].link = inactive_head;
            inactive_head = Some(i);
        }
        Self {
            hints,
            active_head: None,
            inactive_head,
            lru_clock: 0,
        }
    }

    /// §4.1 `find`: the smallest active hint whose size is at least
    /// `request` bytes and whose referenced entry's *current* size still
    /// qualifies. Stale hints (entry has since shrunk below `request`) are
    /// demoted to inactive as they're found, rather than returned.
    ///
    /// # Safety
    /// Every active hint's `entry` must currently be a live, linked
    /// `FreeEntry` on this sub-list.
    pub unsafe fn find(&mut self, request: usize) -> Option<*mut FreeEntry> {
        loop {
            let mut best: Option<(usize, usize)> = None; // (slot, size)
            let mut cur = self.active_head;
            while let Some(slot) = cur {
                let size = self.hints[slot].size;
                if size >= request && best.is_none_or(|(_, bsize)| size < bsize) {
                    best = Some((slot, size));
                }
                cur = self.hints[slot].link;
            }
            let (slot, _) = best?;
            let entry = self.hints[slot].entry;
            let live_size = unsafe { (*entry).size };
            if live_size >= request {
                return Some(entry);
            }
            // Stale: the entry has shrunk below what we need. Demote this
            // one slot and keep searching among the rest.
            self.demote_slot(slot);
        }
    }

    /// §4.1 `add`: called only after a search walked more than
    /// `hint_max_walk` entries without an earlier hit. Promotes a free
    /// inactive slot, evicting the LRU active hint if the cache is full.
    pub fn add(&mut self, entry: *mut FreeEntry, size: usize) {
        self.lru_clock += 1;
        let slot = match self.inactive_head {
            Some(slot) => {
                self.inactive_head = self.hints[slot].link;
                slot
            }
            None => {
                // Full: evict the LRU active hint in place of inserting one.
                let lru_slot = self.least_recently_used_active();
                let Some(lru_slot) = lru_slot else {
                    return; // capacity 0 is rejected by PoolConfig::validate
                };
                self.unlink_active(lru_slot);
                lru_slot
            }
        };
        self.hints[slot].entry = entry;
        self.hints[slot].size = size;
        self.hints[slot].lru = self.lru_clock;
        self.hints[slot].link = self.active_head;
        self.active_head = Some(slot);
    }

    /// §4.1 `update`: any active hint pointing at `old_entry` is retargeted
    /// to `new_entry` (the consumed entry's residual).
    pub fn update(&mut self, old_entry: *mut FreeEntry, new_entry: *mut FreeEntry, new_size: usize) {
        let mut cur = self.active_head;
        while let Some(slot) = cur {
            cur = self.hints[slot].link;
            if self.hints[slot].entry == old_entry {
                self.hints[slot].entry = new_entry;
                self.hints[slot].size = new_size;
            }
        }
    }

    /// §4.1 `remove`: every active hint pointing at `entry` is demoted.
    pub fn remove(&mut self, entry: *mut FreeEntry) {
        let mut cur = self.active_head;
        while let Some(slot) = cur {
            cur = self.hints[slot].link;
            if self.hints[slot].entry == entry {
                self.demote_slot(slot);
            }
        }
    }

    /// §4.1 `clear`: demote every active hint to inactive.
    pub fn clear(&mut self) {
        while let Some(slot) = self.active_head {
            self.demote_slot(slot);
        }
    }

    /// Testable property 4 (spec.md §8): every active hint still points at a
    /// live entry whose size is at least the hint's recorded size would be
    /// too strong (sizes only ever shrink) — the actual invariant is
    /// `entry.size <= hint.size`, checked here for validators.
    ///
    /// # Safety
    /// Every active hint's `entry` must currently be valid.
    pub unsafe fn validate(&self) -> bool {
        let mut cur = self.active_head;
        while let Some(slot) = cur {
            let h = &self.hints[slot];
            if unsafe { (*h.entry).size } > h.size {
                return false;
            }
            cur = h.link;
        }
        true
    }

    fn demote_slot(&mut self, slot: usize) {
        self.unlink_active(slot);
        self.hints[slot].entry = ptr::null_mut();
        self.hints[slot].link = self.inactive_head;
        self.inactive_head = Some(slot);
    }

    fn unlink_active(&mut self, slot: usize) {
        if self.active_head == Some(slot) {
            self.active_head = self.hints[slot].link;
            return;
        }
        let mut cur = self.active_head;
        while let Some(s) = cur {
            let next = self.hints[s].link;
            if next == Some(slot) {
                self.hints[s].link = self.hints[slot].link;
                return;
            }
            cur = next;
        }
    }

    fn least_recently_used_active(&self) -> Option<usize> {
        let mut cur = self.active_head;
        let mut best: Option<(usize, u64)> = None;
        while let Some(slot) = cur {
            let lru = self.hints[slot].lru;
            if best.is_none_or(|(_, blru)| lru < blru) {
                best = Some((slot, lru));
            }
            cur = self.hints[slot].link;
        }
        best.map(|(slot, _)| slot)
    }
}
