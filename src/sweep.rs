//! Sweep Connector (C5): folds an address-ordered stream of sweep chunks
//! into a single address-ordered free list (spec.md §3.5, §4.7).
//!
//! There is no teacher counterpart to a sweep pass (`rtmalloc` never scans
//! live memory for garbage), so this module is grounded directly in
//! `original_source/gc/base/SweepPoolManagerAddressOrderedListBase.cpp` and
//! `ParallelSweepChunk.hpp`, re-expressed with the teacher's raw-pointer,
//! `#[repr(C)]`, `unsafe fn`-boundary idiom (as seen in `span.rs`) rather
//! than translated line for line.

use crate::free_entry::FreeEntry;
use crate::sub_list::SubList;
use core::ptr;

/// One sweep chunk as delivered by the collector (spec.md §3.5). The pool
/// only ever consumes these; it never constructs one.
pub struct SweepChunk {
    pub base: *mut u8,
    pub top: *mut u8,

    pub leading_free_candidate: *mut u8,
    pub leading_free_candidate_size: usize,
    pub trailing_free_candidate: *mut u8,
    pub trailing_free_candidate_size: usize,

    /// Bytes of a live object that began in this chunk and continues past
    /// `top` into the next one.
    pub projection: usize,

    /// Entries discovered strictly inside `[base, top)`, already linked to
    /// each other in address order (`free_list_head` through
    /// `free_list_tail`).
    pub free_list_head: *mut FreeEntry,
    pub free_list_head_size: usize,
    pub free_list_tail: *mut FreeEntry,
    pub free_list_tail_size: usize,

    pub free_bytes: usize,
    pub free_holes: usize,
    pub largest_free_entry: usize,

    /// Whether this chunk's leading/trailing candidates may coalesce with
    /// neighbors at all (false near concurrently-mutated regions).
    pub coalesce_candidate: bool,

    pub dark_matter_bytes: usize,
    pub dark_matter_samples: usize,

    /// Set by `connect_chunk` when this chunk is chosen as a sub-list split
    /// point candidate for `postProcess`'s by-chunk algorithm (§4.8).
    pub split_candidate: Option<*mut FreeEntry>,
    pub split_candidate_previous_entry: *mut FreeEntry,
    pub accumulated_free_size: usize,
    pub accumulated_free_holes: usize,
}

unsafe impl Send for SweepChunk {}

impl SweepChunk {
    /// Whether the joined trailing-then-leading run across a chunk boundary
    /// is large enough to become its own free entry (§4.7 step 3).
    fn can_connect(size: usize, minimum_free_entry_size: usize) -> bool {
        size >= minimum_free_entry_size
    }
}

/// Per-pool sweep state (spec.md §3.5), threaded across successive
/// `connect_chunk` calls for a single sweep pass. Reset at the start of each
/// pass (there is exactly one sweep per GC cycle per pool).
pub struct SweepState {
    pub prev_free_entry: *mut FreeEntry,
    pub prev_free_entry_size: usize,
    pub prev_prev_free_entry: *mut FreeEntry,
    /// Carry-over projection from the previous chunk, consumed by this one.
    pub prev_chunk_projection: usize,
    pub has_prev_chunk: bool,
    pub prev_chunk_trailing_free_candidate: *mut u8,
    pub prev_chunk_trailing_free_candidate_size: usize,
    pub prev_chunk_coalesce_candidate: bool,

    pub sweep_free_bytes: usize,
    pub sweep_free_holes: usize,
    pub largest_free_entry: usize,
    pub previous_largest_free_entry: usize,

    pub dark_matter_bytes: usize,
    pub dark_matter_samples: usize,
}

impl SweepState {
    pub fn new() -> Self {
        Self {
            prev_free_entry: ptr::null_mut(),
            prev_free_entry_size: 0,
            prev_prev_free_entry: ptr::null_mut(),
            prev_chunk_projection: 0,
            has_prev_chunk: false,
            prev_chunk_trailing_free_candidate: ptr::null_mut(),
            prev_chunk_trailing_free_candidate_size: 0,
            prev_chunk_coalesce_candidate: false,
            sweep_free_bytes: 0,
            sweep_free_holes: 0,
            largest_free_entry: 0,
            previous_largest_free_entry: 0,
            dark_matter_bytes: 0,
            dark_matter_samples: 0,
        }
    }

    fn note_largest(&mut self, size: usize) {
        if size > self.largest_free_entry {
            self.previous_largest_free_entry = self.largest_free_entry;
            self.largest_free_entry = size;
        }
    }

    /// §4.7 `connectChunk`: applies the eight-step decision table, installing
    /// entries onto `list` (sub-list 0, the single address-ordered run the
    /// pool holds during sweep, before `postProcess` splits it).
    ///
    /// # Safety
    /// `chunk` must describe a region not reachable by live data except as
    /// noted by its own fields; `list` must be the pool's sole sub-list
    /// during the sweep.
    pub unsafe fn connect_chunk(
        &mut self,
        list: &mut SubList,
        chunk: &mut SweepChunk,
        minimum_free_entry_size: usize,
    ) {
        // Step 1: projection absorption.
        if self.has_prev_chunk && self.prev_chunk_projection > 0 {
            let proj = self.prev_chunk_projection;
            if proj >= chunk.leading_free_candidate_size {
                let remaining = proj - chunk.leading_free_candidate_size;
                chunk.leading_free_candidate_size = 0;
                chunk.leading_free_candidate = ptr::null_mut();
                chunk.projection += remaining;
            } else {
                chunk.leading_free_candidate =
                    unsafe { chunk.leading_free_candidate.add(proj) };
                chunk.leading_free_candidate_size -= proj;
            }
            self.prev_chunk_projection = 0;
        }

        // Step 2: previous free entry absorbs this chunk's leading candidate.
        if !self.prev_free_entry.is_null()
            && chunk.leading_free_candidate_size > 0
            && unsafe { FreeEntry::addr(self.prev_free_entry).add(self.prev_free_entry_size) }
                == chunk.leading_free_candidate
            && chunk.coalesce_candidate
        {
            self.grow_prev_free_entry(list, chunk.leading_free_candidate_size);
            chunk.leading_free_candidate = ptr::null_mut();
            chunk.leading_free_candidate_size = 0;
        } else {
            // Steps 3-6 only apply when step 2 didn't already consume the
            // leading candidate into an existing entry.
            let prev_trailing = self.prev_chunk_trailing_free_candidate;
            let prev_trailing_size = self.prev_chunk_trailing_free_candidate_size;
            let joined_contiguous = !prev_trailing.is_null()
                && chunk.leading_free_candidate_size > 0
                && unsafe { prev_trailing.add(prev_trailing_size) } == chunk.leading_free_candidate
                && self.prev_chunk_coalesce_candidate
                && chunk.coalesce_candidate;

            if joined_contiguous
                && SweepChunk::can_connect(
                    prev_trailing_size + chunk.leading_free_candidate_size,
                    minimum_free_entry_size,
                )
            {
                // Step 3: trailing of previous joins leading of this chunk.
                let joined_size = prev_trailing_size + chunk.leading_free_candidate_size;
                self.install_and_advance(list, prev_trailing, joined_size);
                chunk.leading_free_candidate = ptr::null_mut();
                chunk.leading_free_candidate_size = 0;
            } else if !prev_trailing.is_null()
                && prev_trailing_size >= minimum_free_entry_size
                && self.prev_chunk_coalesce_candidate
            {
                // Step 4: trailing of previous chunk alone.
                self.install_and_advance(list, prev_trailing, prev_trailing_size);
            } else if chunk.leading_free_candidate_size >= minimum_free_entry_size {
                // Step 5: leading candidate alone.
                self.install_and_advance(
                    list,
                    chunk.leading_free_candidate,
                    chunk.leading_free_candidate_size,
                );
                chunk.leading_free_candidate = ptr::null_mut();
                chunk.leading_free_candidate_size = 0;
            }
            // else: abandoned. Nothing tracked; caller already zeroed the
            // dead-object header for us as part of sweep scanning.
        }

        // Step 6: leading candidate spans the whole chunk — reinterpret as
        // this chunk's own trailing candidate.
        if !chunk.leading_free_candidate.is_null()
            && unsafe { chunk.leading_free_candidate.add(chunk.leading_free_candidate_size) }
                == chunk.top
        {
            chunk.trailing_free_candidate = chunk.leading_free_candidate;
            chunk.trailing_free_candidate_size = chunk.leading_free_candidate_size;
            chunk.leading_free_candidate = ptr::null_mut();
            chunk.leading_free_candidate_size = 0;
        }

        // Step 7: splice in this chunk's already-linked interior free list.
        if !chunk.free_list_head.is_null() {
            if !self.prev_free_entry.is_null() {
                unsafe { (*self.prev_free_entry).next = chunk.free_list_head };
            } else {
                list.head = chunk.free_list_head;
            }
            chunk.split_candidate = Some(chunk.free_list_head);
            chunk.split_candidate_previous_entry = self.prev_free_entry;
            chunk.accumulated_free_size = self.sweep_free_bytes;
            chunk.accumulated_free_holes = self.sweep_free_holes;

            self.note_largest(chunk.largest_free_entry);
            self.prev_prev_free_entry = self.prev_free_entry;
            self.prev_free_entry = chunk.free_list_tail;
            self.prev_free_entry_size = chunk.free_list_tail_size;
            list.free_size += chunk.free_bytes;
            list.free_count += chunk.free_holes;
            self.sweep_free_bytes += chunk.free_bytes;
            self.sweep_free_holes += chunk.free_holes;
        }

        // Step 8: remember this chunk; fold dark matter into the pool total.
        self.dark_matter_bytes += chunk.dark_matter_bytes;
        self.dark_matter_samples += chunk.dark_matter_samples;
        self.prev_chunk_projection = chunk.projection;
        self.prev_chunk_trailing_free_candidate = chunk.trailing_free_candidate;
        self.prev_chunk_trailing_free_candidate_size = chunk.trailing_free_candidate_size;
        self.prev_chunk_coalesce_candidate = chunk.coalesce_candidate;
        self.has_prev_chunk = true;
    }

    /// §4.7 `flushFinalChunk`: the very last chunk's trailing candidate gets
    /// one more chance to become an entry (step 4 reapplied), or is abandoned.
    ///
    /// # Safety
    /// `list` must be the pool's sole sub-list during the sweep.
    pub unsafe fn flush_final_chunk(&mut self, list: &mut SubList, minimum_free_entry_size: usize) {
        if !self.prev_chunk_trailing_free_candidate.is_null()
            && self.prev_chunk_trailing_free_candidate_size >= minimum_free_entry_size
            && self.prev_chunk_coalesce_candidate
        {
            let addr = self.prev_chunk_trailing_free_candidate;
            let size = self.prev_chunk_trailing_free_candidate_size;
            self.install_and_advance(list, addr, size);
        }
        self.prev_chunk_trailing_free_candidate = ptr::null_mut();
        self.prev_chunk_trailing_free_candidate_size = 0;
    }

    /// §4.7 `connectFinalChunk`: terminates the merged list and returns the
    /// totals to publish on the pool (the pool then calls `postProcess`).
    ///
    /// # Safety
    /// `list` must be the pool's sole sub-list during the sweep.
    pub unsafe fn connect_final_chunk(&mut self, _list: &mut SubList) {
        if !self.prev_free_entry.is_null() {
            unsafe { (*self.prev_free_entry).next = ptr::null_mut() };
        }
    }

    fn grow_prev_free_entry(&mut self, list: &mut SubList, extra: usize) {
        unsafe { (*self.prev_free_entry).size += extra };
        self.prev_free_entry_size += extra;
        list.free_size += extra;
        self.sweep_free_bytes += extra;
        self.note_largest(self.prev_free_entry_size);
    }

    /// Install a brand-new entry covering `[addr, addr+size)`, link it after
    /// `prev_free_entry`, and advance sweep-state bookkeeping.
    fn install_and_advance(&mut self, list: &mut SubList, addr: *mut u8, size: usize) {
        let entry = unsafe { FreeEntry::install(addr, size, ptr::null_mut()) };
        if self.prev_free_entry.is_null() {
            list.head = entry;
        } else {
            unsafe { (*self.prev_free_entry).next = entry };
        }
        self.prev_prev_free_entry = self.prev_free_entry;
        self.prev_free_entry = entry;
        self.prev_free_entry_size = size;
        list.free_size += size;
        list.free_count += 1;
        self.sweep_free_bytes += size;
        self.sweep_free_holes += 1;
        self.note_largest(size);
    }
}

impl Default for SweepState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec;

    fn region(size: usize) -> *mut u8 {
        vec![0u8; size].leak().as_mut_ptr()
    }

    fn empty_chunk(base: *mut u8, top: *mut u8) -> SweepChunk {
        SweepChunk {
            base,
            top,
            leading_free_candidate: ptr::null_mut(),
            leading_free_candidate_size: 0,
            trailing_free_candidate: ptr::null_mut(),
            trailing_free_candidate_size: 0,
            projection: 0,
            free_list_head: ptr::null_mut(),
            free_list_head_size: 0,
            free_list_tail: ptr::null_mut(),
            free_list_tail_size: 0,
            free_bytes: 0,
            free_holes: 0,
            largest_free_entry: 0,
            coalesce_candidate: true,
            dark_matter_bytes: 0,
            dark_matter_samples: 0,
            split_candidate: None,
            split_candidate_previous_entry: ptr::null_mut(),
            accumulated_free_size: 0,
            accumulated_free_holes: 0,
        }
    }

    #[test]
    fn single_chunk_leading_candidate_installed() {
        let mem = region(256);
        let mut list = SubList::new(4);
        let mut state = SweepState::new();
        let mut chunk = empty_chunk(mem, unsafe { mem.add(256) });
        chunk.leading_free_candidate = mem;
        chunk.leading_free_candidate_size = 64;

        unsafe {
            state.connect_chunk(&mut list, &mut chunk, 16);
            state.flush_final_chunk(&mut list, 16);
            state.connect_final_chunk(&mut list);
        }

        assert_eq!(list.free_size, 64);
        assert_eq!(list.free_count, 1);
        assert_eq!(state.sweep_free_bytes, 64);
    }

    #[test]
    fn contiguous_trailing_and_leading_join_across_chunks() {
        let mem = region(512);
        let mut list = SubList::new(4);
        let mut state = SweepState::new();

        let mut chunk_a = empty_chunk(mem, unsafe { mem.add(128) });
        chunk_a.trailing_free_candidate = unsafe { mem.add(96) };
        chunk_a.trailing_free_candidate_size = 32; // [96,128)

        let mut chunk_b = empty_chunk(unsafe { mem.add(128) }, unsafe { mem.add(256) });
        chunk_b.leading_free_candidate = unsafe { mem.add(128) };
        chunk_b.leading_free_candidate_size = 32; // [128,160), contiguous with chunk_a's trailing

        unsafe {
            state.connect_chunk(&mut list, &mut chunk_a, 16);
            state.connect_chunk(&mut list, &mut chunk_b, 16);
            state.flush_final_chunk(&mut list, 16);
            state.connect_final_chunk(&mut list);
        }

        assert_eq!(list.free_count, 1);
        assert_eq!(list.free_size, 64);
    }

    #[test]
    fn projection_consumes_next_chunk_leading_candidate() {
        let mem = region(256);
        let mut list = SubList::new(4);
        let mut state = SweepState::new();

        let mut chunk_a = empty_chunk(mem, unsafe { mem.add(128) });
        chunk_a.projection = 16; // a live object overruns into chunk_b by 16 bytes

        let mut chunk_b = empty_chunk(unsafe { mem.add(128) }, unsafe { mem.add(256) });
        chunk_b.leading_free_candidate = unsafe { mem.add(128) };
        chunk_b.leading_free_candidate_size = 64;

        unsafe {
            state.connect_chunk(&mut list, &mut chunk_a, 16);
            state.connect_chunk(&mut list, &mut chunk_b, 16);
        }

        // Leading candidate shrinks by the projected amount and shifts forward.
        assert_eq!(chunk_b.leading_free_candidate_size, 48);
    }

    #[test]
    fn interior_free_list_is_spliced_in_address_order() {
        let mem = region(256);
        let mut list = SubList::new(4);
        let mut state = SweepState::new();

        let e2 = unsafe { FreeEntry::install(mem.add(192), 64, ptr::null_mut()) };
        let e1 = unsafe { FreeEntry::install(mem.add(64), 64, e2) };

        let mut chunk = empty_chunk(mem, unsafe { mem.add(256) });
        chunk.free_list_head = e1;
        chunk.free_list_head_size = 64;
        chunk.free_list_tail = e2;
        chunk.free_list_tail_size = 64;
        chunk.free_bytes = 128;
        chunk.free_holes = 2;
        chunk.largest_free_entry = 64;

        unsafe {
            state.connect_chunk(&mut list, &mut chunk, 16);
            state.connect_final_chunk(&mut list);
        }

        assert_eq!(list.head, e1);
        assert_eq!(unsafe { (*e1).next }, e2);
        assert!(unsafe { (*e2).next }.is_null());
        assert_eq!(list.free_size, 128);
        assert_eq!(list.free_count, 2);
    }
}
