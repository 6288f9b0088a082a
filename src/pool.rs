//! Split Pool (C4) and Expand/Contract (C6): the address-ordered,
//! N-way-split free-list memory pool (spec.md §3.4, §4.3–§4.6, §4.8–§4.9).
//!
//! Grounded in the teacher's `PageHeap`: a single structure behind a small
//! set of locks, exposing batch-oriented span(here: free-entry)-management
//! operations, with a cached "largest free" figure maintained the way the
//! teacher tracks its largest free span. The two-pass search and the
//! reserved-entry policies are grounded in
//! `original_source/gc/base/MemoryPoolSplitAddressOrderedListBase.cpp` and
//! `MemoryPoolHybrid.cpp`.

extern crate alloc;

use crate::config::{PoolConfig, Variant};
use crate::free_entry::FreeEntry;
use crate::stats::{AllocateStats, PoolStats, Snapshot};
use crate::sub_list::SubList;
use crate::sweep::{SweepChunk, SweepState};
use crate::sync::SpinMutex;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
#[cfg(feature = "debug")]
use std::println;

/// Why a `reset` or `postProcess` is being performed (spec.md §6,
/// grounded in `original_source/gc/base/MemoryPool.hpp`'s `Cause` enum).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cause {
    ForSweep,
    ForCompact,
    Any,
}

/// The split, address-ordered free-list pool.
pub struct SplitPool {
    config: PoolConfig,
    sub_lists: Vec<SpinMutex<SubList>>,
    reserved_sub_list: SpinMutex<SubList>,
    thread_affinity: Vec<AtomicUsize>,

    largest_free_entry: AtomicUsize,
    stats: PoolStats,

    large_object_allocate_stats: AllocateStats,
    large_object_allocate_stats_for_free_list: Vec<AllocateStats>,
    tlh_allocate_stats: AllocateStats,

    // Variant S bookkeeping (spec.md §3.4, §4.5). Unused by variant H.
    reserved_free_list_index: AtomicUsize,
    prev_reserved_free_entry: AtomicPtr<FreeEntry>,
    reserved_free_entry_size: AtomicUsize,
}

unsafe impl Send for SplitPool {}
unsafe impl Sync for SplitPool {}

/// Result of a full-pool search (both passes of §4.3/§4.4), naming which
/// sub-list a hit landed on so the caller can update `thread_affinity`.
struct SearchHit {
    sub_list_index: usize,
    entry: *mut FreeEntry,
    prev: *mut FreeEntry,
}

impl SplitPool {
    pub fn new(config: PoolConfig) -> Result<Self, crate::config::ConfigError> {
        let config = config.validate()?;
        let n = config.heap_free_list_count;
        let mut sub_lists = Vec::with_capacity(n);
        let mut thread_affinity = Vec::with_capacity(n);
        let mut per_list_stats = Vec::with_capacity(n + 1);
        for i in 0..n {
            sub_lists.push(SpinMutex::new(SubList::new(config.hint_capacity)));
            thread_affinity.push(AtomicUsize::new(i));
            per_list_stats.push(AllocateStats::new(
                config.large_object_allocate_stats_threshold,
                config.large_object_size_class_ratio,
                config.large_object_allocate_stats_top_k,
            ));
        }
        // +1 for the reserved sub-list's own stats (spec.md §3.4).
        per_list_stats.push(AllocateStats::new(
            config.large_object_allocate_stats_threshold,
            config.large_object_size_class_ratio,
            config.large_object_allocate_stats_top_k,
        ));

        Ok(Self {
            reserved_sub_list: SpinMutex::new(SubList::new(config.hint_capacity)),
            sub_lists,
            thread_affinity,
            largest_free_entry: AtomicUsize::new(0),
            stats: PoolStats::new(),
            large_object_allocate_stats: AllocateStats::new(
                config.large_object_allocate_stats_threshold,
                config.large_object_size_class_ratio,
                config.large_object_allocate_stats_top_k,
            ),
            large_object_allocate_stats_for_free_list: per_list_stats,
            tlh_allocate_stats: AllocateStats::new(
                config.tlh_minimum_size,
                config.large_object_size_class_ratio,
                config.large_object_allocate_stats_top_k,
            ),
            reserved_free_list_index: AtomicUsize::new(0),
            prev_reserved_free_entry: AtomicPtr::new(ptr::null_mut()),
            reserved_free_entry_size: AtomicUsize::new(0),
            config,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn n(&self) -> usize {
        self.sub_lists.len()
    }

    fn is_eligible_predecessor(&self, index: usize, prev: *mut FreeEntry) -> bool {
        match self.config.variant {
            Variant::Hybrid => true,
            Variant::Split => {
                !(index == self.reserved_free_list_index.load(Ordering::Relaxed)
                    && prev == self.prev_reserved_free_entry.load(Ordering::Relaxed))
            }
        }
    }

    // ---- §4.3 allocateObject -------------------------------------------------

    /// `allocateObject(size)`: returns the base of a `size`-byte chunk, or
    /// `None`.
    pub fn allocate_object(&self, size: usize, worker_id: usize) -> Option<*mut u8> {
        self.allocate_object_locking(size, worker_id, true)
    }

    /// `collectorAllocate(size, lockingRequired)`.
    pub fn collector_allocate(
        &self,
        size: usize,
        worker_id: usize,
        locking_required: bool,
    ) -> Option<*mut u8> {
        self.allocate_object_locking(size, worker_id, locking_required)
    }

    fn allocate_object_locking(
        &self,
        size: usize,
        worker_id: usize,
        locking_required: bool,
    ) -> Option<*mut u8> {
        let hit = self.search_two_pass(size, worker_id, locking_required)?;
        let winning_index = hit.sub_list_index;
        let base = unsafe { self.consume_hit(hit, size) };
        self.stats.record_allocation(size);
        self.thread_affinity[worker_id % self.n()]
            .store(winning_index.min(self.n().saturating_sub(1)), Ordering::Relaxed);
        crate::pool_assert_valid!(self, "allocate_object_locking");
        Some(base)
    }

    /// `allocateTLH(maxSize) -> (base, top) | None`.
    pub fn allocate_tlh(&self, max_size: usize, worker_id: usize) -> Option<(*mut u8, *mut u8)> {
        self.allocate_tlh_locking(max_size, worker_id, true)
    }

    pub fn collector_allocate_tlh(
        &self,
        max_size: usize,
        worker_id: usize,
        locking_required: bool,
    ) -> Option<(*mut u8, *mut u8)> {
        self.allocate_tlh_locking(max_size, worker_id, locking_required)
    }

    fn allocate_tlh_locking(
        &self,
        max_size: usize,
        worker_id: usize,
        locking_required: bool,
    ) -> Option<(*mut u8, *mut u8)> {
        let min_size = self.config.minimum_free_entry_size;
        let hit = self.search_two_pass(min_size, worker_id, locking_required)?;
        let index = hit.sub_list_index;
        let base = FreeEntry::addr(hit.entry);
        let consumed = unsafe {
            let entry_size = (*hit.entry).size;
            let mut consumed = max_size.min(entry_size);
            let mut residual_size = entry_size - consumed;
            // §4.4: absorb a too-small residual into the consumed portion
            // rather than leaving an unrecyclable sliver behind.
            if residual_size > 0 && residual_size < min_size {
                consumed += residual_size;
                residual_size = 0;
            }
            let mut list_guard;
            let list: &mut SubList = if index == self.n() {
                list_guard = self.reserved_sub_list.lock();
                &mut list_guard
            } else {
                list_guard = self.sub_lists[index].lock();
                &mut list_guard
            };
            self.finish_consuming(list, index, hit.entry, hit.prev, base, consumed, residual_size);
            consumed
        };
        self.tlh_allocate_stats.increment(consumed);
        self.thread_affinity[worker_id % self.n().max(1)].store(index.min(self.n().saturating_sub(1)), Ordering::Relaxed);
        let top = unsafe { base.add(consumed) };
        crate::pool_assert_valid!(self, "allocate_tlh_locking");
        Some((base, top))
    }

    /// Runs pass 1 (skip reserved) then pass 2 (reserved only) per §4.3.
    fn search_two_pass(
        &self,
        request: usize,
        worker_id: usize,
        _locking_required: bool,
    ) -> Option<SearchHit> {
        let n = self.n();
        if n == 0 {
            return None;
        }
        let start = self.thread_affinity[worker_id % n].load(Ordering::Relaxed) % n;
        let mut largest_seen_overall = 0usize;

        for step in 0..n {
            let index = (start + step) % n;
            let mut list = self.sub_lists[index].lock();
            if list.is_empty() {
                continue;
            }
            list.times_locked += 1;
            let (entry, prev, largest) = unsafe {
                list.search(request, self.config.hint_max_walk, |_entry, prev| {
                    self.is_eligible_predecessor(index, prev)
                })
            };
            if largest > largest_seen_overall {
                largest_seen_overall = largest;
            }
            if !entry.is_null() {
                return Some(SearchHit {
                    sub_list_index: index,
                    entry,
                    prev,
                });
            }
        }

        // Pass 2: reserved entry only.
        let try_reserved = match self.config.variant {
            Variant::Hybrid => true,
            Variant::Split => self.reserved_free_entry_size.load(Ordering::Relaxed) >= request,
        };
        if try_reserved {
            match self.config.variant {
                Variant::Hybrid => {
                    let mut list = self.reserved_sub_list.lock();
                    if !list.is_empty() {
                        let (entry, prev, largest) =
                            unsafe { list.search(request, self.config.hint_max_walk, |_, _| true) };
                        if largest > largest_seen_overall {
                            largest_seen_overall = largest;
                        }
                        if !entry.is_null() {
                            return Some(SearchHit {
                                sub_list_index: self.n(),
                                entry,
                                prev,
                            });
                        }
                    }
                }
                Variant::Split => {
                    let index = self.reserved_free_list_index.load(Ordering::Relaxed);
                    let prev = self.prev_reserved_free_entry.load(Ordering::Relaxed);
                    let list = self.sub_lists[index].lock();
                    let entry = if prev.is_null() {
                        list.head
                    } else {
                        unsafe { (*prev).next }
                    };
                    if !entry.is_null() && unsafe { (*entry).size } >= request {
                        return Some(SearchHit {
                            sub_list_index: index,
                            entry,
                            prev,
                        });
                    }
                }
            }
        }

        self.largest_free_entry
            .store(largest_seen_overall, Ordering::Relaxed);
        None
    }

    /// Common tail of §4.3: given a winning entry/predecessor, split off
    /// `request` bytes, recycle or discard the residual, and update every
    /// counter. Returns the base address of the consumed chunk.
    ///
    /// # Safety
    /// `hit` must describe an entry currently linked on the sub-list named by
    /// `hit.sub_list_index` (where `n()` denotes the reserved sub-list).
    unsafe fn consume_hit(&self, hit: SearchHit, request: usize) -> *mut u8 {
        let index = hit.sub_list_index;
        let mut list_guard;
        let list: &mut SubList = if index == self.n() {
            list_guard = self.reserved_sub_list.lock();
            &mut list_guard
        } else {
            list_guard = self.sub_lists[index].lock();
            &mut list_guard
        };
        let base = FreeEntry::addr(hit.entry);
        let entry_size = unsafe { (*hit.entry).size };
        let residual_size = entry_size - request;
        self.finish_consuming(list, index, hit.entry, hit.prev, base, request, residual_size);
        base
    }

    /// Shared residual-handling logic between object and TLH allocation
    /// (§4.3's final bullet list). `consumed` bytes starting at `base` are
    /// being handed to the caller; the remaining `residual_size` bytes
    /// starting right after are recycled or discarded.
    ///
    /// # Safety
    /// `entry` must currently be linked on `list` with predecessor `prev`.
    unsafe fn finish_consuming(
        &self,
        list: &mut SubList,
        index: usize,
        entry: *mut FreeEntry,
        prev: *mut FreeEntry,
        base: *mut u8,
        consumed: usize,
        residual_size: usize,
    ) {
        debug_assert!(
            unsafe { FreeEntry::has_dead_object_sentinel(entry) },
            "dead-object sentinel missing or corrupted on entry being consumed"
        );
        let entry_size = unsafe { (*entry).size };
        let stats_for_list = &self.large_object_allocate_stats_for_free_list[index];
        stats_for_list.decrement(entry_size);

        let next = unsafe { (*entry).next };
        let residual_base = unsafe { base.add(consumed) };
        let residual_top = unsafe { residual_base.add(residual_size) };

        let was_reserved = self.config.variant == Variant::Split
            && index == self.reserved_free_list_index.load(Ordering::Relaxed)
            && prev == self.prev_reserved_free_entry.load(Ordering::Relaxed);

        if residual_size >= self.config.minimum_free_entry_size {
            // The residual entry takes the consumed entry's place in the
            // chain; net effect on the sub-list is that `consumed` bytes and
            // zero entries left it.
            let residual = unsafe { FreeEntry::install(residual_base, residual_size, next) };
            if prev.is_null() {
                list.head = residual;
            } else {
                unsafe { (*prev).next = residual };
            }
            list.hint_cache.update(entry, residual, residual_size);
            list.free_size -= consumed;
            stats_for_list.increment(residual_size);
            if was_reserved {
                self.reserved_free_entry_size
                    .store(residual_size, Ordering::Relaxed);
            }
        } else {
            // The whole entry leaves the list; any too-small residual is
            // discarded rather than recycled.
            if prev.is_null() {
                list.head = next;
            } else {
                unsafe { (*prev).next = next };
            }
            list.hint_cache.remove(entry);
            list.free_size -= entry_size;
            list.free_count -= 1;
            self.stats.record_discarded(residual_size);
            if residual_size > 0 {
                unsafe { list.abandon(residual_base, residual_top) };
            }
            if was_reserved {
                self.reserved_free_entry_size.store(0, Ordering::Relaxed);
                self.prev_reserved_free_entry
                    .store(ptr::null_mut(), Ordering::Relaxed);
            }
        }
    }

    // ---- §4.6 Expand/Contract --------------------------------------------

    /// `expandWithRange(base, top, canCoalesce)`.
    pub fn expand_with_range(&self, base: *mut u8, top: *mut u8, can_coalesce: bool) {
        let size = top as usize - base as usize;
        if size < self.config.minimum_free_entry_size {
            return;
        }

        if can_coalesce {
            let mut reserved = self.reserved_sub_list.lock();
            let (tail, tail_prev) = unsafe { reserved.tail() };
            if !tail.is_null() && unsafe { FreeEntry::end_addr(tail) } == base {
                unsafe { (*tail).size += size };
                let new_size = unsafe { (*tail).size };
                reserved.free_size += size;
                self.large_object_allocate_stats_for_free_list[self.n()]
                    .reclassify(new_size - size, new_size);
                self.reserved_free_entry_size.store(new_size, Ordering::Relaxed);
                self.bump_largest(new_size);
                let _ = tail_prev;
                drop(reserved);
                crate::pool_assert_valid!(self, "expand_with_range");
                return;
            }
        }

        let last_index = self.last_non_empty_normal_index();
        if let Some(index) = last_index {
            let mut list = self.sub_lists[index].lock();
            let (tail, _tail_prev) = unsafe { list.tail() };
            if !tail.is_null() && unsafe { FreeEntry::end_addr(tail) } == base {
                let old_size = unsafe { (*tail).size };
                unsafe { (*tail).size += size };
                let new_size = old_size + size;
                list.free_size += size;
                self.large_object_allocate_stats_for_free_list[index].reclassify(old_size, new_size);
                self.bump_largest(new_size);
                if self.entry_is_reserved(index, &list, tail) {
                    self.reserved_free_entry_size.store(new_size, Ordering::Relaxed);
                } else if new_size >= self.config.very_large_object_threshold {
                    self.promote_to_reserved(index, &mut list, tail);
                }
                drop(list);
                crate::pool_assert_valid!(self, "expand_with_range");
                return;
            }
        }

        // No coalesce target: append fresh.
        let target_index = if size >= self.config.very_large_object_threshold {
            None // reserved
        } else {
            Some(last_index.unwrap_or(0))
        };
        match target_index {
            None => {
                let mut reserved = self.reserved_sub_list.lock();
                let (tail, _) = unsafe { reserved.tail() };
                unsafe { reserved.connect_inner(tail, base, size) };
                self.large_object_allocate_stats_for_free_list[self.n()].increment(size);
                self.reserved_free_entry_size.store(size, Ordering::Relaxed);
            }
            Some(index) => {
                let mut list = self.sub_lists[index].lock();
                let (tail, _) = unsafe { list.tail() };
                unsafe { list.connect_inner(tail, base, size) };
                self.large_object_allocate_stats_for_free_list[index].increment(size);
            }
        }
        self.bump_largest(size);
        crate::pool_assert_valid!(self, "expand_with_range");
    }

    /// `contractWithRange(base, top) -> ptr|None`: surrenders `[base, top)`
    /// back from the pool. The caller guarantees this range lies entirely
    /// within one existing free entry.
    pub fn contract_with_range(&self, base: *mut u8, top: *mut u8) -> Option<*mut u8> {
        let size = top as usize - base as usize;
        if size == 0 {
            return None;
        }
        for index in 0..self.n() {
            let mut list = self.sub_lists[index].lock();
            if let Some(prev) = self.find_enclosing(&list, base, top) {
                self.split_out_range(&mut list, index, prev, base, top);
                drop(list);
                crate::pool_assert_valid!(self, "contract_with_range");
                return Some(base);
            }
        }
        let mut reserved = self.reserved_sub_list.lock();
        if let Some(prev) = self.find_enclosing(&reserved, base, top) {
            self.split_out_range(&mut reserved, self.n(), prev, base, top);
            drop(reserved);
            crate::pool_assert_valid!(self, "contract_with_range");
            return Some(base);
        }
        None
    }

    /// Find the predecessor (or null if head) of the single free entry
    /// enclosing `[base, top)`, if any.
    fn find_enclosing(&self, list: &SubList, base: *mut u8, top: *mut u8) -> Option<*mut FreeEntry> {
        let mut prev: *mut FreeEntry = ptr::null_mut();
        let mut cur = list.head;
        while !cur.is_null() {
            let entry_base = FreeEntry::addr(cur);
            let entry_end = unsafe { FreeEntry::end_addr(cur) };
            if (entry_base as usize) <= (base as usize) && (top as usize) <= (entry_end as usize) {
                return Some(prev);
            }
            prev = cur;
            cur = unsafe { (*cur).next };
        }
        None
    }

    fn split_out_range(
        &self,
        list: &mut SubList,
        index: usize,
        prev: *mut FreeEntry,
        base: *mut u8,
        top: *mut u8,
    ) {
        let entry = if prev.is_null() { list.head } else { unsafe { (*prev).next } };
        let entry_base = FreeEntry::addr(entry);
        let entry_end = unsafe { FreeEntry::end_addr(entry) };
        let entry_size = unsafe { (*entry).size };
        let next = unsafe { (*entry).next };
        let stats_for_list = if index == self.n() {
            &self.large_object_allocate_stats_for_free_list[self.n()]
        } else {
            &self.large_object_allocate_stats_for_free_list[index]
        };
        stats_for_list.decrement(entry_size);

        let was_reserved = self.config.variant == Variant::Split
            && index == self.reserved_free_list_index.load(Ordering::Relaxed)
            && prev == self.prev_reserved_free_entry.load(Ordering::Relaxed);

        unsafe { list.unlink(prev, entry) };

        let mut leading_installed: Option<usize> = None;
        if entry_base < base {
            let leading_size = base as usize - entry_base as usize;
            if let Some(leading) = unsafe {
                list.recycle(entry_base, base, prev, ptr::null_mut(), self.config.minimum_free_entry_size)
            } {
                stats_for_list.increment(leading_size);
                let _ = leading;
                leading_installed = Some(leading_size);
            } else {
                self.stats.record_discarded(leading_size);
                unsafe { list.abandon(entry_base, base) };
            }
        }
        let mut trailing_installed: Option<(usize, *mut FreeEntry)> = None;
        if top < entry_end {
            let trailing_size = entry_end as usize - top as usize;
            let trailing_prev = if entry_base < base { list.tail().0 } else { prev };
            if let Some(trailing) = unsafe {
                list.recycle(top, entry_end, trailing_prev, next, self.config.minimum_free_entry_size)
            } {
                stats_for_list.increment(trailing_size);
                trailing_installed = Some((trailing_size, trailing_prev));
            } else {
                self.stats.record_discarded(trailing_size);
                unsafe { list.abandon(top, entry_end) };
            }
        } else if entry_base < base {
            // Leading fragment's `next` must still point at the original `next`.
            let (tail, _) = unsafe { list.tail() };
            if !tail.is_null() {
                unsafe { (*tail).next = next };
            }
        }

        // §4.6 reserved bookkeeping, mirroring `finish_consuming`'s
        // `was_reserved` handling: the contracted entry's surviving fragment
        // (if any) takes over as the reserved entry, same `index`/`prev`
        // semantics as allocation.
        if was_reserved {
            if let Some(leading_size) = leading_installed {
                self.reserved_free_entry_size
                    .store(leading_size, Ordering::Relaxed);
            } else if let Some((trailing_size, trailing_prev)) = trailing_installed {
                self.prev_reserved_free_entry
                    .store(trailing_prev, Ordering::Relaxed);
                self.reserved_free_entry_size
                    .store(trailing_size, Ordering::Relaxed);
            } else {
                self.reserved_free_entry_size.store(0, Ordering::Relaxed);
                self.prev_reserved_free_entry
                    .store(ptr::null_mut(), Ordering::Relaxed);
            }
        }
    }

    fn last_non_empty_normal_index(&self) -> Option<usize> {
        for index in (0..self.n()).rev() {
            let list = self.sub_lists[index].lock();
            if !list.is_empty() {
                return Some(index);
            }
        }
        None
    }

    /// Whether `entry`, already known to live on sub-list `index` (the
    /// caller must already hold that sub-list's lock), is the current
    /// reserved entry under variant *S*.
    fn entry_is_reserved(&self, index: usize, list: &SubList, entry: *mut FreeEntry) -> bool {
        self.config.variant == Variant::Split
            && index == self.reserved_free_list_index.load(Ordering::Relaxed)
            && {
                let prev = self.prev_reserved_free_entry.load(Ordering::Relaxed);
                let cur = if prev.is_null() { list.head } else { unsafe { (*prev).next } };
                cur == entry
            }
    }

    fn promote_to_reserved(&self, index: usize, list: &mut SubList, entry: *mut FreeEntry) {
        match self.config.variant {
            Variant::Hybrid => {
                // Detach from the normal sub-list and splice at reserved tail.
                let (_, prev) = unsafe { list.tail() };
                let size = unsafe { (*entry).size };
                unsafe { list.unlink(prev, entry) };
                self.large_object_allocate_stats_for_free_list[index].decrement(size);
                let mut reserved = self.reserved_sub_list.lock();
                let (tail, _) = unsafe { reserved.tail() };
                let addr = FreeEntry::addr(entry);
                unsafe { reserved.connect_inner(tail, addr, size) };
                self.large_object_allocate_stats_for_free_list[self.n()].increment(size);
                self.reserved_free_entry_size.store(size, Ordering::Relaxed);
            }
            Variant::Split => {
                let (_, prev) = unsafe { list.tail() };
                self.reserved_free_list_index.store(index, Ordering::Relaxed);
                self.prev_reserved_free_entry.store(prev, Ordering::Relaxed);
                self.reserved_free_entry_size
                    .store(unsafe { (*entry).size }, Ordering::Relaxed);
            }
        }
    }

    fn bump_largest(&self, size: usize) {
        self.largest_free_entry.fetch_max(size, Ordering::Relaxed);
    }

    // ---- §6 batch interfaces ----------------------------------------------

    /// `addFreeEntries(head, tail, count, totalSize)`: append an already
    /// sorted, already-linked run of free entries to the last normal
    /// sub-list.
    pub fn add_free_entries(
        &self,
        head: *mut FreeEntry,
        tail: *mut FreeEntry,
        count: usize,
        total_size: usize,
    ) {
        if head.is_null() {
            return;
        }
        let index = self.last_non_empty_normal_index().unwrap_or(0);
        let mut list = self.sub_lists[index].lock();
        let (list_tail, _) = unsafe { list.tail() };
        if list_tail.is_null() {
            list.head = head;
        } else {
            unsafe { (*list_tail).next = head };
        }
        unsafe { (*tail).next = ptr::null_mut() };
        list.free_size += total_size;
        list.free_count += count;
        self.bump_largest(unsafe { (*tail).size });
    }

    /// `removeFreeEntriesWithinRange(low, high, minSize) -> (head, tail, count, totalSize)`.
    pub fn remove_free_entries_within_range(
        &self,
        low: *mut u8,
        high: *mut u8,
        min_size: usize,
    ) -> (*mut FreeEntry, *mut FreeEntry, usize, usize) {
        let mut removed_head: *mut FreeEntry = ptr::null_mut();
        let mut removed_tail: *mut FreeEntry = ptr::null_mut();
        let mut count = 0usize;
        let mut total = 0usize;

        for index in 0..self.n() {
            let mut list = self.sub_lists[index].lock();
            let mut prev: *mut FreeEntry = ptr::null_mut();
            let mut cur = list.head;
            while !cur.is_null() {
                let next = unsafe { (*cur).next };
                let addr = FreeEntry::addr(cur);
                let size = unsafe { (*cur).size };
                if (addr as usize) >= (low as usize) && (addr as usize) < (high as usize) && size >= min_size {
                    unsafe { list.unlink(prev, cur) };
                    unsafe { (*cur).next = ptr::null_mut() };
                    if removed_head.is_null() {
                        removed_head = cur;
                    } else {
                        unsafe { (*removed_tail).next = cur };
                    }
                    removed_tail = cur;
                    count += 1;
                    total += size;
                } else {
                    prev = cur;
                }
                cur = next;
            }
        }
        (removed_head, removed_tail, count, total)
    }

    /// `rebuildFreeListInRegion(region, previousFreeEntry)`: install one
    /// entry spanning the whole region, used at initial population.
    pub fn rebuild_free_list_in_region(&self, base: *mut u8, top: *mut u8) {
        let size = top as usize - base as usize;
        if size < self.config.minimum_free_entry_size {
            return;
        }
        let mut list = self.sub_lists[0].lock();
        unsafe { list.connect_inner(ptr::null_mut(), base, size) };
        self.bump_largest(size);
    }

    /// `lock()`: acquire every sub-list mutex in ascending index order
    /// (spec.md §5). Returns guards the caller must hold for the duration of
    /// the cross-sub-list operation.
    pub fn lock_all(&self) -> (Vec<crate::sync::SpinMutexGuard<'_, SubList>>, crate::sync::SpinMutexGuard<'_, SubList>) {
        let mut guards = Vec::with_capacity(self.n());
        for m in &self.sub_lists {
            guards.push(m.lock());
        }
        let reserved = self.reserved_sub_list.lock();
        (guards, reserved)
    }

    /// `reset(cause)`: clear all sub-lists and stats. With `ForCompact`, swap
    /// sub-list 0 and the last sub-list before clearing, preserving the
    /// post-compaction address invariant (the compactor always leaves free
    /// space at the tail, which must become sub-list 0 after the swap so
    /// address ordering across sub-lists is preserved once `postProcess`
    /// runs again).
    pub fn reset(&self, cause: Cause) {
        let (mut guards, mut reserved) = self.lock_all();
        if cause == Cause::ForCompact && self.n() > 1 {
            let last = self.n() - 1;
            let (head, tail) = guards.split_at_mut(last);
            core::mem::swap(&mut *head[0], &mut *tail[0]);
        }
        for g in guards.iter_mut() {
            g.clear();
        }
        reserved.clear();
        for stats in &self.large_object_allocate_stats_for_free_list {
            stats.reset_current();
        }
        self.large_object_allocate_stats.reset_current();
        self.stats.reset();
        self.largest_free_entry.store(0, Ordering::Relaxed);
        self.reserved_free_entry_size.store(0, Ordering::Relaxed);
        self.prev_reserved_free_entry
            .store(ptr::null_mut(), Ordering::Relaxed);
        for (i, slot) in self.thread_affinity.iter().enumerate() {
            slot.store(i, Ordering::Relaxed);
        }
    }

    /// Entry point used by the sweep connector once it has finished merging
    /// every chunk into sub-list 0 (§4.7's `connectFinalChunk`, which calls
    /// `postProcess(forSweep)`).
    ///
    /// # Safety
    /// Sub-list 0 must currently hold the full merged address-ordered free
    /// list; every other normal sub-list must be empty.
    pub unsafe fn post_process(&self, cause: Cause, sweep_free_bytes: usize) {
        self.post_process_by_entry_granularity(cause, sweep_free_bytes);
        crate::pool_assert_valid!(self, "post_process");
    }

    // ---- §4.7 sweep connector glue ------------------------------------------
    //
    // These three methods drive a single `SweepState` across the collector's
    // address-ordered chunk stream. The caller (the collector's sweep driver)
    // holds the `SweepState` and one `SweepChunk` at a time; the pool supplies
    // sub-list 0's lock and, at the end, the stats-publishing and
    // `postProcess` call spec.md §4.7 names as `connectFinalChunk`'s job.

    /// `connectChunk(chunk)`: fold one sweep chunk into the pool's sole
    /// sub-list (sub-list 0) during a sweep pass.
    ///
    /// # Safety
    /// `chunk` must describe a region not reachable by live data except as
    /// noted by its own fields; this must be called in strictly ascending
    /// chunk-address order with no intervening allocation against this pool.
    pub unsafe fn connect_chunk(&self, state: &mut SweepState, chunk: &mut SweepChunk) {
        let mut list = self.sub_lists[0].lock();
        unsafe { state.connect_chunk(&mut list, chunk, self.config.minimum_free_entry_size) };
    }

    /// `flushFinalChunk()`: give the very last chunk's trailing candidate one
    /// more chance to become an entry.
    pub fn flush_final_chunk(&self, state: &mut SweepState) {
        let mut list = self.sub_lists[0].lock();
        unsafe { state.flush_final_chunk(&mut list, self.config.minimum_free_entry_size) };
    }

    /// `connectFinalChunk()`: terminate the merged list, publish
    /// `sweepFreeBytes`/`sweepFreeHoles`/`largestFreeEntry`/dark-matter totals
    /// onto the pool, and invoke `postProcess(forSweep)` (spec.md §4.7, §4.8).
    ///
    /// # Safety
    /// Sub-list 0 must hold the full merged address-ordered free list built by
    /// the preceding `connect_chunk`/`flush_final_chunk` calls; every other
    /// normal sub-list must be empty.
    pub unsafe fn connect_final_chunk(&self, state: &mut SweepState) {
        {
            let mut list = self.sub_lists[0].lock();
            unsafe { state.connect_final_chunk(&mut list) };
        }
        self.bump_largest(state.largest_free_entry);
        self.stats
            .record_dark_matter_totals(state.dark_matter_bytes, state.dark_matter_samples);
        unsafe { self.post_process(Cause::ForSweep, state.sweep_free_bytes) };
    }

    /// §4.8's fallback algorithm: walk the merged list in sub-list 0, cutting
    /// into `N` roughly-equal-sized runs, designating the overall-largest
    /// entry as reserved.
    ///
    /// (The preferred by-sweep-chunk algorithm requires a live handle to the
    /// collector's sweep-chunk iterator, which is out of scope per spec.md
    /// §1's "sweep machinery... external collaborator"; this crate always
    /// uses the fallback, documented as an Open Question resolution in
    /// `DESIGN.md`.)
    unsafe fn post_process_by_entry_granularity(&self, cause: Cause, sweep_free_bytes: usize) {
        let n = self.n();
        if n == 0 {
            return;
        }
        let target = if n > 0 { sweep_free_bytes / n } else { sweep_free_bytes };

        let mut source = self.sub_lists[0].lock();
        let mut cur = source.head;
        let mut prev: *mut FreeEntry = ptr::null_mut();
        let mut largest: (usize, *mut FreeEntry, *mut FreeEntry, usize) = (0, ptr::null_mut(), ptr::null_mut(), 0);

        // Collect per-sub-list (head, tail, free_size, free_count) by cutting
        // the chain at `target`-byte intervals.
        let mut cuts: Vec<(*mut FreeEntry, *mut FreeEntry, usize, usize)> = Vec::with_capacity(n);
        let mut run_head = cur;
        let mut run_size = 0usize;
        let mut run_count = 0usize;
        let mut cuts_made = 0usize;

        while !cur.is_null() {
            let size = unsafe { (*cur).size };
            if size > largest.0 {
                largest = (size, cur, prev, 0);
            }
            run_size += size;
            run_count += 1;
            let next = unsafe { (*cur).next };
            let is_last = next.is_null();
            if (run_size >= target && cuts_made + 1 < n) || is_last {
                if !is_last {
                    unsafe { (*cur).next = ptr::null_mut() };
                }
                cuts.push((run_head, cur, run_size, run_count));
                cuts_made += 1;
                run_head = next;
                run_size = 0;
                run_count = 0;
            }
            prev = cur;
            cur = next;
        }
        // Pad with empty runs if the single chain produced fewer than N cuts
        // (e.g. very few, very large entries).
        while cuts.len() < n {
            cuts.push((ptr::null_mut(), ptr::null_mut(), 0, 0));
        }

        source.head = cuts[0].0;
        source.free_size = cuts[0].2;
        source.free_count = cuts[0].3;
        drop(source);

        for (index, (head, _tail, size, count)) in cuts.into_iter().enumerate().skip(1) {
            let mut list = self.sub_lists[index].lock();
            list.head = head;
            list.free_size = size;
            list.free_count = count;
        }

        let (largest_size, largest_entry, largest_prev, _) = largest;
        if largest_size >= self.config.very_large_object_threshold && !largest_entry.is_null() {
            let owner_index = self.index_owning(largest_entry);
            if let Some(index) = owner_index {
                let mut list = self.sub_lists[index].lock();
                match self.config.variant {
                    Variant::Hybrid => {
                        let owner_prev = self.predecessor_within(&list, largest_entry);
                        unsafe { list.unlink(owner_prev, largest_entry) };
                        let mut reserved = self.reserved_sub_list.lock();
                        let (tail, _) = unsafe { reserved.tail() };
                        let addr = FreeEntry::addr(largest_entry);
                        let size = unsafe { (*largest_entry).size };
                        unsafe { reserved.connect_inner(tail, addr, size) };
                        self.reserved_free_entry_size.store(size, Ordering::Relaxed);
                    }
                    Variant::Split => {
                        let owner_prev = self.predecessor_within(&list, largest_entry);
                        self.reserved_free_list_index.store(index, Ordering::Relaxed);
                        self.prev_reserved_free_entry
                            .store(owner_prev, Ordering::Relaxed);
                        self.reserved_free_entry_size
                            .store(largest_size, Ordering::Relaxed);
                    }
                }
                let _ = largest_prev;
            }
        }

        self.bump_largest(largest_size);
        for (i, slot) in self.thread_affinity.iter().enumerate() {
            slot.store(i, Ordering::Relaxed);
        }
        let _ = cause;
    }

    fn index_owning(&self, entry: *mut FreeEntry) -> Option<usize> {
        for index in 0..self.n() {
            let list = self.sub_lists[index].lock();
            let mut cur = list.head;
            while !cur.is_null() {
                if cur == entry {
                    return Some(index);
                }
                cur = unsafe { (*cur).next };
            }
        }
        None
    }

    fn predecessor_within(&self, list: &SubList, entry: *mut FreeEntry) -> *mut FreeEntry {
        let mut prev: *mut FreeEntry = ptr::null_mut();
        let mut cur = list.head;
        while !cur.is_null() && cur != entry {
            prev = cur;
            cur = unsafe { (*cur).next };
        }
        prev
    }

    // ---- §6 address-order queries ------------------------------------------

    /// `findAddressAfterFreeSize(sizeRequired, minSize) -> ptr|None`: scans
    /// sub-lists in address order, returning the address at which
    /// `sizeRequired` cumulative free bytes (counting only entries of at
    /// least `min_size`) lie past.
    pub fn find_address_after_free_size(&self, size_required: usize, min_size: usize) -> Option<*mut u8> {
        let mut accumulated = 0usize;
        for index in 0..self.n() {
            let list = self.sub_lists[index].lock();
            let mut cur = list.head;
            while !cur.is_null() {
                let size = unsafe { (*cur).size };
                if size >= min_size {
                    accumulated += size;
                    if accumulated >= size_required {
                        return Some(unsafe { FreeEntry::end_addr(cur) });
                    }
                }
                cur = unsafe { (*cur).next };
            }
        }
        None
    }

    pub fn get_available_contraction_size_for_range_ending_at(
        &self,
        _alloc: usize,
        low: *mut u8,
        high: *mut u8,
    ) -> usize {
        for index in 0..self.n() {
            let list = self.sub_lists[index].lock();
            if let Some(entry) = self.entry_ending_at(&list, high) {
                let entry_base = FreeEntry::addr(entry);
                if (entry_base as usize) <= (low as usize) {
                    return high as usize - low as usize;
                }
                return high as usize - entry_base as usize;
            }
        }
        0
    }

    fn entry_ending_at(&self, list: &SubList, addr: *mut u8) -> Option<*mut FreeEntry> {
        let mut cur = list.head;
        while !cur.is_null() {
            if unsafe { FreeEntry::end_addr(cur) } == addr {
                return Some(cur);
            }
            cur = unsafe { (*cur).next };
        }
        None
    }

    pub fn find_free_entry_ending_at_addr(&self, addr: *mut u8) -> Option<*mut FreeEntry> {
        for index in 0..self.n() {
            let list = self.sub_lists[index].lock();
            if let Some(e) = self.entry_ending_at(&list, addr) {
                return Some(e);
            }
        }
        None
    }

    pub fn find_free_entry_top_starting_at_addr(&self, addr: *mut u8) -> Option<*mut u8> {
        for index in 0..self.n() {
            let list = self.sub_lists[index].lock();
            let mut cur = list.head;
            while !cur.is_null() {
                if FreeEntry::addr(cur) == addr {
                    return Some(unsafe { FreeEntry::end_addr(cur) });
                }
                cur = unsafe { (*cur).next };
            }
        }
        None
    }

    pub fn get_first_free_starting_addr(&self) -> Option<*mut u8> {
        for index in 0..self.n() {
            let list = self.sub_lists[index].lock();
            if !list.head.is_null() {
                return Some(FreeEntry::addr(list.head));
            }
        }
        None
    }

    pub fn get_next_free_starting_addr(&self, current: *mut u8) -> Option<*mut u8> {
        for index in 0..self.n() {
            let list = self.sub_lists[index].lock();
            let mut cur = list.head;
            while !cur.is_null() {
                if FreeEntry::addr(cur) == current {
                    let next = unsafe { (*cur).next };
                    if !next.is_null() {
                        return Some(FreeEntry::addr(next));
                    }
                    // Continue into the next non-empty sub-list's head.
                    for j in (index + 1)..self.n() {
                        let list2 = self.sub_lists[j].lock();
                        if !list2.head.is_null() {
                            return Some(FreeEntry::addr(list2.head));
                        }
                    }
                    return None;
                }
                cur = unsafe { (*cur).next };
            }
        }
        None
    }

    /// `moveHeap(srcBase, srcTop, dstBase)`: relocate entry pointers after a
    /// region move. Every free entry (and every hint, and every `next` link)
    /// whose address falls in `[srcBase, srcTop)` is shifted by
    /// `dstBase - srcBase`.
    ///
    /// # Safety
    /// The caller must have already performed (or be concurrently
    /// performing under the pool's own locks) the underlying memmove of the
    /// bytes themselves.
    pub unsafe fn move_heap(&self, src_base: *mut u8, src_top: *mut u8, dst_base: *mut u8) {
        let delta = dst_base as isize - src_base as isize;
        let in_range = |p: *mut u8| (p as usize) >= (src_base as usize) && (p as usize) < (src_top as usize);
        let shift = |p: *mut FreeEntry| -> *mut FreeEntry {
            if p.is_null() {
                p
            } else {
                unsafe { (p as *mut u8).offset(delta) as *mut FreeEntry }
            }
        };

        for index in 0..self.n() {
            let mut list = self.sub_lists[index].lock();
            if in_range(FreeEntry::addr(list.head)) {
                list.head = shift(list.head);
            }
            let mut cur = list.head;
            while !cur.is_null() {
                let next = unsafe { (*cur).next };
                if in_range(FreeEntry::addr(next)) {
                    unsafe { (*cur).next = shift(next) };
                }
                cur = unsafe { (*cur).next };
            }
        }
    }

    // ---- §6 stat getters ----------------------------------------------------

    pub fn get_actual_free_memory_size(&self) -> usize {
        let mut total = 0usize;
        for m in &self.sub_lists {
            total += m.lock().free_size;
        }
        total += self.reserved_sub_list.lock().free_size;
        total
    }

    pub fn get_actual_free_entry_count(&self) -> usize {
        let mut total = 0usize;
        for m in &self.sub_lists {
            total += m.lock().free_count;
        }
        total += self.reserved_sub_list.lock().free_count;
        total
    }

    pub fn get_largest_free_entry(&self) -> usize {
        self.largest_free_entry.load(Ordering::Relaxed)
    }

    pub fn get_dark_matter_bytes(&self) -> u64 {
        self.stats.dark_matter_bytes.load(Ordering::Relaxed)
    }

    pub fn get_dark_matter_samples(&self) -> u64 {
        self.stats.dark_matter_samples.load(Ordering::Relaxed)
    }

    pub fn stats_snapshot(&self) -> Snapshot {
        self.stats.snapshot()
    }

    #[cfg(feature = "debug")]
    pub fn print_free_list_validity(&self) {
        for (i, m) in self.sub_lists.iter().enumerate() {
            let list = m.lock();
            let ok = unsafe { list.validate() };
            println!("sub-list {i}: valid={ok} free_size={} free_count={}", list.free_size, list.free_count);
        }
        let reserved = self.reserved_sub_list.lock();
        println!(
            "reserved sub-list: valid={} free_size={} free_count={}",
            unsafe { reserved.validate() },
            reserved.free_size,
            reserved.free_count
        );
    }

    /// Debug validator across every sub-list (spec.md §4.9's
    /// `isMemoryPoolValid`).
    pub fn is_valid(&self) -> bool {
        for m in &self.sub_lists {
            if !unsafe { m.lock().validate() } {
                return false;
            }
        }
        unsafe { self.reserved_sub_list.lock().validate() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Variant;
    use std::vec;

    fn cfg(variant: Variant) -> PoolConfig {
        PoolConfig {
            heap_free_list_count: 2,
            minimum_free_entry_size: 16,
            very_large_object_threshold: 1 << 16,
            hint_capacity: 4,
            hint_max_walk: 2,
            large_object_allocate_stats_top_k: 8,
            large_object_allocate_stats_threshold: 64,
            large_object_size_class_ratio: 2.0,
            split_free_list_number_chunks_prepared: 8,
            tlh_minimum_size: 64,
            tlh_maximum_size: 4096,
            variant,
        }
    }

    fn region(size: usize) -> *mut u8 {
        vec![0u8; size].leak().as_mut_ptr()
    }

    #[test]
    fn rebuild_then_allocate_object() {
        let pool = SplitPool::new(cfg(Variant::Hybrid)).unwrap();
        let mem = region(1024);
        pool.rebuild_free_list_in_region(mem, unsafe { mem.add(1024) });
        let p = pool.allocate_object(64, 0).unwrap();
        assert_eq!(p, mem);
        assert_eq!(pool.stats_snapshot().alloc_count, 1);
        assert!(pool.is_valid());
    }

    #[test]
    fn allocate_object_exhausts_pool() {
        let pool = SplitPool::new(cfg(Variant::Hybrid)).unwrap();
        let mem = region(64);
        pool.rebuild_free_list_in_region(mem, unsafe { mem.add(64) });
        assert!(pool.allocate_object(64, 0).is_some());
        assert!(pool.allocate_object(16, 0).is_none());
    }

    #[test]
    fn expand_then_contract_round_trip() {
        let pool = SplitPool::new(cfg(Variant::Hybrid)).unwrap();
        let mem = region(256);
        pool.expand_with_range(mem, unsafe { mem.add(256) }, false);
        assert_eq!(pool.get_actual_free_memory_size(), 256);
        let out = pool.contract_with_range(mem, unsafe { mem.add(64) });
        assert_eq!(out, Some(mem));
        assert_eq!(pool.get_actual_free_memory_size(), 192);
    }

    #[test]
    fn reset_clears_all_state() {
        let pool = SplitPool::new(cfg(Variant::Split)).unwrap();
        let mem = region(256);
        pool.rebuild_free_list_in_region(mem, unsafe { mem.add(256) });
        pool.reset(Cause::Any);
        assert_eq!(pool.get_actual_free_memory_size(), 0);
        assert_eq!(pool.get_largest_free_entry(), 0);
    }
}
