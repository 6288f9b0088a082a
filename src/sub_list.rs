//! Sub-list (C3): one address-ordered run of free entries plus the hint
//! cache that accelerates searching it (spec.md §3.3, §4.2).
//!
//! Grounded in the teacher's `CentralFreeList`: a per-partition structure
//! behind its own `SpinMutex`, exposing batch-oriented splice operations
//! rather than per-object ones. Free entries replace the teacher's spans as
//! the linked unit, and the partition key is a sub-list index rather than a
//! size class.

use crate::free_entry::FreeEntry;
use crate::hint_cache::HintCache;
use core::mem::size_of;
use core::ptr;

/// One sub-list's mutable state. Always accessed through the owning
/// `SpinMutex<SubList>` in `pool.rs`; every method here assumes the caller
/// already holds that lock.
pub struct SubList {
    pub head: *mut FreeEntry,
    pub free_size: usize,
    pub free_count: usize,
    pub hint_cache: HintCache,
    pub times_locked: u64,
}

unsafe impl Send for SubList {}

impl SubList {
    pub fn new(hint_capacity: usize) -> Self {
        Self {
            head: ptr::null_mut(),
            free_size: 0,
            free_count: 0,
            hint_cache: HintCache::new(hint_capacity),
            times_locked: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// §4.2 `connectInner`: used by the sweep connector to install `new_entry`
    /// at the tail following `prev`, with `next` set to null.
    ///
    /// # Safety
    /// `new_entry` must point at writable memory of at least `size` bytes;
    /// `prev`, if non-null, must already be linked on this sub-list.
    pub unsafe fn connect_inner(
        &mut self,
        prev: *mut FreeEntry,
        addr: *mut u8,
        size: usize,
    ) -> *mut FreeEntry {
        let entry = unsafe { FreeEntry::install(addr, size, ptr::null_mut()) };
        unsafe { self.splice_after(prev, entry) };
        self.free_size += size;
        self.free_count += 1;
        entry
    }

    /// §4.2 `recycle`: if `top - base >= minimum_free_entry_size`, installs a
    /// free entry covering `[base, top)`, splices it after `prev` (or at head)
    /// with `.next = next`, and returns it. Otherwise returns `None` — the
    /// caller must account the range as discarded.
    ///
    /// # Safety
    /// `[base, top)` must be writable and not reachable by live data.
    pub unsafe fn recycle(
        &mut self,
        base: *mut u8,
        top: *mut u8,
        prev: *mut FreeEntry,
        next: *mut FreeEntry,
        minimum_free_entry_size: usize,
    ) -> Option<*mut FreeEntry> {
        let size = top as usize - base as usize;
        if size < minimum_free_entry_size {
            return None;
        }
        let entry = unsafe { FreeEntry::install(base, size, next) };
        unsafe { self.splice_after(prev, entry) };
        self.free_size += size;
        self.free_count += 1;
        Some(entry)
    }

    /// §4.2 `abandon`: marks `[base, top)` as dead-object padding without
    /// placing it on any list.
    ///
    /// # Safety
    /// `[base, top)` must be writable and not reachable by live data.
    pub unsafe fn abandon(&mut self, base: *mut u8, top: *mut u8) {
        let size = top as usize - base as usize;
        if size >= size_of::<usize>() {
            unsafe { ptr::write_bytes(base, 0, size) };
        }
    }

    /// Remove `entry` from this sub-list, given its direct predecessor (or
    /// null if `entry` is the head). Updates `free_size`/`free_count` and the
    /// hint cache.
    ///
    /// # Safety
    /// `entry` (and `prev`, if given) must currently be linked on this
    /// sub-list.
    pub unsafe fn unlink(&mut self, prev: *mut FreeEntry, entry: *mut FreeEntry) {
        let next = unsafe { (*entry).next };
        if prev.is_null() {
            self.head = next;
        } else {
            unsafe { (*prev).next = next };
        }
        self.free_size -= unsafe { (*entry).size };
        self.free_count -= 1;
        self.hint_cache.remove(entry);
    }

    /// Link `entry` immediately after `prev` (or at the head if `prev` is
    /// null). Does not touch `free_size`/`free_count`/hints — callers that
    /// are installing a brand-new entry should use `recycle`/`connect_inner`
    /// instead; this is the splice primitive they share.
    ///
    /// # Safety
    /// `prev`, if non-null, must already be linked on this sub-list, and
    /// `entry` must not currently be linked anywhere.
    unsafe fn splice_after(&mut self, prev: *mut FreeEntry, entry: *mut FreeEntry) {
        if prev.is_null() {
            unsafe { (*entry).next = self.head };
            self.head = entry;
        } else {
            unsafe {
                (*entry).next = (*prev).next;
                (*prev).next = entry;
            }
        }
    }

    /// Search this sub-list for the first entry (in address order, optionally
    /// starting from a hint) whose size is at least `request`, honoring a
    /// caller-supplied predicate for whether an entry is eligible (used to
    /// implement the reserved-entry skip rule of variant *S*, §4.3 pass 1).
    ///
    /// Returns `(entry, predecessor, largest_seen)`. On total failure,
    /// `entry` is null and `largest_seen` records the largest entry size
    /// walked (for `largestFreeEntry` bookkeeping on failure, §4.3).
    ///
    /// # Safety
    /// Every entry currently linked on this sub-list must be valid.
    pub unsafe fn search(
        &mut self,
        request: usize,
        hint_max_walk: usize,
        is_eligible: impl Fn(*mut FreeEntry, *mut FreeEntry) -> bool,
    ) -> (*mut FreeEntry, *mut FreeEntry, usize) {
        let start = unsafe { self.hint_cache.find(request) };

        let mut prev: *mut FreeEntry = ptr::null_mut();
        let mut cur = self.head;
        let mut walked = 0usize;
        let mut largest_seen = 0usize;
        let mut candidate_hint_entry: *mut FreeEntry = ptr::null_mut();
        let mut candidate_hint_size = 0usize;

        // If the hint named a start point, skip straight to walking from
        // there rather than re-walking from head; we still need `prev` for
        // splicing, so find the hinted entry's actual predecessor first.
        if let Some(hint_entry) = start {
            let mut p: *mut FreeEntry = ptr::null_mut();
            let mut c = self.head;
            while !c.is_null() && c != hint_entry {
                p = c;
                c = unsafe { (*c).next };
            }
            if c == hint_entry {
                prev = p;
                cur = c;
            }
        }

        while !cur.is_null() {
            let size = unsafe { (*cur).size };
            if size > largest_seen {
                largest_seen = size;
            }
            if size >= request && is_eligible(cur, prev) {
                if walked > hint_max_walk && !candidate_hint_entry.is_null() {
                    self.hint_cache.add(candidate_hint_entry, candidate_hint_size);
                }
                return (cur, prev, largest_seen);
            }
            if size > candidate_hint_size && is_eligible(cur, prev) {
                candidate_hint_entry = cur;
                candidate_hint_size = size;
            }
            walked += 1;
            prev = cur;
            cur = unsafe { (*cur).next };
        }

        if walked > hint_max_walk && !candidate_hint_entry.is_null() {
            self.hint_cache.add(candidate_hint_entry, candidate_hint_size);
        }
        (ptr::null_mut(), ptr::null_mut(), largest_seen)
    }

    /// Last entry on this sub-list and its predecessor, or `(null, null)` if
    /// empty. Used by expand to find the tail for coalescing (§4.6).
    ///
    /// # Safety
    /// Every entry currently linked on this sub-list must be valid.
    pub unsafe fn tail(&self) -> (*mut FreeEntry, *mut FreeEntry) {
        let mut prev: *mut FreeEntry = ptr::null_mut();
        let mut cur = self.head;
        if cur.is_null() {
            return (ptr::null_mut(), ptr::null_mut());
        }
        loop {
            let next = unsafe { (*cur).next };
            if next.is_null() {
                return (cur, prev);
            }
            prev = cur;
            cur = next;
        }
    }

    /// Clear this sub-list back to empty, without touching the memory the
    /// entries described (used by `reset`).
    pub fn clear(&mut self) {
        self.head = ptr::null_mut();
        self.free_size = 0;
        self.free_count = 0;
        self.hint_cache.clear();
    }

    /// Debug validator (spec.md §4.9's `isMemoryPoolValid`): checks
    /// `free_size == Σ entry.size`, `free_count == length`, strict address
    /// ordering, non-adjacency, and that every entry still carries the
    /// dead-object sentinel.
    ///
    /// # Safety
    /// Every entry currently linked on this sub-list must be valid.
    pub unsafe fn validate(&self) -> bool {
        let mut size_sum = 0usize;
        let mut count = 0usize;
        let mut cur = self.head;
        let mut prev_end: Option<*mut u8> = None;
        while !cur.is_null() {
            let size = unsafe { (*cur).size };
            let addr = FreeEntry::addr(cur);
            if let Some(prev_end) = prev_end {
                if (addr as usize) <= (prev_end as usize) {
                    return false; // not strictly increasing, or touching/overlapping
                }
            }
            if !unsafe { FreeEntry::has_dead_object_sentinel(cur) } {
                return false;
            }
            size_sum += size;
            count += 1;
            prev_end = Some(unsafe { FreeEntry::end_addr(cur) });
            cur = unsafe { (*cur).next };
        }
        size_sum == self.free_size && count == self.free_count && unsafe { self.hint_cache.validate() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    fn make_region(size: usize) -> *mut u8 {
        vec![0u8; size].leak().as_mut_ptr()
    }

    #[test]
    fn recycle_installs_and_links() {
        let mut list = SubList::new(4);
        let base = make_region(64);
        unsafe {
            let e = list
                .recycle(base, base.add(64), ptr::null_mut(), ptr::null_mut(), 16)
                .unwrap();
            assert_eq!(list.head, e);
            assert_eq!(list.free_size, 64);
            assert_eq!(list.free_count, 1);
            assert!(list.validate());
        }
    }

    #[test]
    fn recycle_rejects_too_small_residual() {
        let mut list = SubList::new(4);
        let base = make_region(8);
        unsafe {
            let r = list.recycle(base, base.add(8), ptr::null_mut(), ptr::null_mut(), 16);
            assert!(r.is_none());
            assert_eq!(list.free_count, 0);
        }
    }

    #[test]
    fn search_finds_smallest_qualifying_without_hint() {
        let mut list = SubList::new(4);
        let region = make_region(256);
        unsafe {
            let e2 = list.recycle(region.add(128), region.add(256), ptr::null_mut(), ptr::null_mut(), 16).unwrap();
            let e1 = list.recycle(region, region.add(64), ptr::null_mut(), e2, 16).unwrap();
            assert_eq!(list.head, e1);
            let (found, prev, _largest) = list.search(100, 4, |_, _| true);
            assert_eq!(found, e2);
            assert_eq!(prev, e1);
        }
    }

    #[test]
    fn search_reports_largest_seen_on_failure() {
        let mut list = SubList::new(4);
        let region = make_region(128);
        unsafe {
            list.recycle(region, region.add(64), ptr::null_mut(), ptr::null_mut(), 16).unwrap();
            let (found, _, largest) = list.search(1000, 4, |_, _| true);
            assert!(found.is_null());
            assert_eq!(largest, 64);
        }
    }

    #[test]
    fn unlink_removes_and_updates_counts() {
        let mut list = SubList::new(4);
        let region = make_region(64);
        unsafe {
            let e = list.recycle(region, region.add(64), ptr::null_mut(), ptr::null_mut(), 16).unwrap();
            list.unlink(ptr::null_mut(), e);
            assert!(list.head.is_null());
            assert_eq!(list.free_size, 0);
            assert_eq!(list.free_count, 0);
        }
    }

    #[test]
    fn tail_returns_last_entry_and_predecessor() {
        let mut list = SubList::new(4);
        let region = make_region(128);
        unsafe {
            let e2 = list.recycle(region.add(64), region.add(128), ptr::null_mut(), ptr::null_mut(), 16).unwrap();
            let e1 = list.recycle(region, region.add(64), ptr::null_mut(), e2, 16).unwrap();
            let (tail, prev) = list.tail();
            assert_eq!(tail, e2);
            assert_eq!(prev, e1);
        }
    }
}
