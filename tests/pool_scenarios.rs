//! End-to-end scenarios for the split free-list pool, mirroring the
//! documented allocate/recycle, expansion, and reserved-entry promotion
//! behaviors. Addresses are relative to a freshly allocated backing buffer
//! rather than literal hex addresses, since this process doesn't control
//! where the OS places memory, but the byte deltas match exactly.

use gcfreepool::config::{PoolConfig, Variant};
use gcfreepool::pool::{Cause, SplitPool};
use gcfreepool::sweep::{SweepChunk, SweepState};
use std::ptr;
use std::vec;

const MINIMUM_FREE_ENTRY_SIZE: usize = 32;
const VERY_LARGE_OBJECT_THRESHOLD: usize = 4096;

fn base_config(variant: Variant) -> PoolConfig {
    PoolConfig {
        heap_free_list_count: 2,
        minimum_free_entry_size: MINIMUM_FREE_ENTRY_SIZE,
        very_large_object_threshold: VERY_LARGE_OBJECT_THRESHOLD,
        hint_capacity: 8,
        hint_max_walk: 4,
        large_object_allocate_stats_top_k: 16,
        large_object_allocate_stats_threshold: 256,
        large_object_size_class_ratio: 2.0,
        split_free_list_number_chunks_prepared: 64,
        tlh_minimum_size: 2048,
        tlh_maximum_size: 1 << 20,
        variant,
    }
}

fn region(size: usize) -> *mut u8 {
    vec![0u8; size].leak().as_mut_ptr()
}

// Scenario A — plain allocate + recycle.
#[test]
fn scenario_a_plain_allocate_and_recycle() {
    let pool = SplitPool::new(base_config(Variant::Hybrid)).unwrap();
    let region = region(0x1000);
    pool.rebuild_free_list_in_region(region, unsafe { region.add(0x1000) });

    let got = pool.allocate_object(64, 0).unwrap();
    assert_eq!(got, region);

    let snap = pool.stats_snapshot();
    assert_eq!(snap.alloc_count, 1);
    assert_eq!(snap.alloc_bytes, 64);
    assert_eq!(pool.get_actual_free_memory_size(), 0x1000 - 64);
    assert_eq!(pool.get_actual_free_entry_count(), 1);
    assert!(pool.is_valid());
}

// Scenario B — residual below minimum is discarded.
#[test]
fn scenario_b_residual_below_minimum_is_discarded() {
    let pool = SplitPool::new(base_config(Variant::Hybrid)).unwrap();
    let region = region(80);
    pool.rebuild_free_list_in_region(region, unsafe { region.add(80) });

    let got = pool.allocate_object(64, 0).unwrap();
    assert_eq!(got, region);

    let snap = pool.stats_snapshot();
    assert_eq!(snap.alloc_bytes, 64);
    assert_eq!(snap.alloc_discarded_bytes, 16);
    assert_eq!(pool.get_actual_free_entry_count(), 0);
    assert_eq!(pool.get_actual_free_memory_size(), 0);
}

// Scenario C — expansion coalesces with the sub-list tail.
#[test]
fn scenario_c_expansion_coalesces_with_tail() {
    let pool = SplitPool::new(base_config(Variant::Hybrid)).unwrap();
    let region = region(512);
    // Tail entry of size 256 at the start of the region.
    pool.expand_with_range(region, unsafe { region.add(256) }, false);
    assert_eq!(pool.get_actual_free_memory_size(), 256);

    // Adjacent range starting exactly where the tail entry ends.
    let gap_base = unsafe { region.add(256) };
    pool.expand_with_range(gap_base, unsafe { gap_base.add(128) }, true);

    assert_eq!(pool.get_actual_free_memory_size(), 384);
    assert_eq!(pool.get_actual_free_entry_count(), 1);
}

// Scenario D — expansion promotes the coalesced entry to reserved once it
// crosses the threshold.
#[test]
fn scenario_d_expansion_promotes_to_reserved_hybrid() {
    let pool = SplitPool::new(base_config(Variant::Hybrid)).unwrap();
    let region = region(8192);
    pool.expand_with_range(region, unsafe { region.add(4000) }, false);

    let gap_base = unsafe { region.add(4000) };
    pool.expand_with_range(gap_base, unsafe { gap_base.add(200) }, true);

    assert!(pool.get_largest_free_entry() >= 4200);
    assert_eq!(pool.get_actual_free_memory_size(), 4200);
}

#[test]
fn scenario_d_expansion_promotes_to_reserved_split() {
    let pool = SplitPool::new(base_config(Variant::Split)).unwrap();
    let region = region(8192);
    pool.expand_with_range(region, unsafe { region.add(4000) }, false);
    let gap_base = unsafe { region.add(4000) };
    pool.expand_with_range(gap_base, unsafe { gap_base.add(200) }, true);

    assert!(pool.get_largest_free_entry() >= 4200);
    // The entry stays addressable through the normal sub-list in variant S;
    // total free memory accounting is identical to the Hybrid case.
    assert_eq!(pool.get_actual_free_memory_size(), 4200);
}

// A request larger than the reserved entry, after only a small normal entry
// remains, must fail on pass 1 and succeed via pass 2 against the reserved
// entry (§4.3).
#[test]
fn reserved_entry_is_reachable_on_fallback_pass() {
    let pool = SplitPool::new(base_config(Variant::Hybrid)).unwrap();
    let region = region(8192);
    pool.expand_with_range(region, unsafe { region.add(4200) }, false);
    assert!(pool.get_largest_free_entry() >= VERY_LARGE_OBJECT_THRESHOLD);

    let got = pool.allocate_object(4096, 0);
    assert!(got.is_some());
}

// Round-trip: expand then contract the same range restores prior free size
// (testable property 8).
#[test]
fn expand_then_contract_round_trips_free_size() {
    let pool = SplitPool::new(base_config(Variant::Hybrid)).unwrap();
    let region = region(256);
    pool.expand_with_range(region, unsafe { region.add(256) }, false);
    let before = pool.get_actual_free_memory_size();

    let out = pool.contract_with_range(region, unsafe { region.add(64) });
    assert!(out.is_some());
    assert_eq!(pool.get_actual_free_memory_size(), before - 64);
}

// reset(any) clears every sub-list, hint cache, and aggregate stat
// (testable property 6).
#[test]
fn reset_any_clears_everything() {
    let pool = SplitPool::new(base_config(Variant::Split)).unwrap();
    let region = region(1024);
    pool.rebuild_free_list_in_region(region, unsafe { region.add(1024) });
    pool.allocate_object(64, 0);

    pool.reset(Cause::Any);

    assert_eq!(pool.get_actual_free_memory_size(), 0);
    assert_eq!(pool.get_actual_free_entry_count(), 0);
    assert_eq!(pool.get_largest_free_entry(), 0);
    let snap = pool.stats_snapshot();
    assert_eq!(snap.alloc_count, 0);
    assert_eq!(snap.alloc_bytes, 0);
}

// postProcess splits a single merged address-ordered run into N sub-lists
// with every byte still accounted for.
#[test]
fn post_process_splits_merged_list_into_n_sublists() {
    let pool = SplitPool::new(base_config(Variant::Split)).unwrap();
    let region = region(10_000);
    pool.rebuild_free_list_in_region(region, unsafe { region.add(10_000) });

    unsafe { pool.post_process(Cause::ForSweep, 10_000) };

    assert_eq!(pool.get_actual_free_memory_size(), 10_000);
    assert!(pool.is_valid());
}

// Allocation failure returns None rather than panicking, and updates
// largestFreeEntry so callers can skip the pool (§4.9).
#[test]
fn allocation_failure_returns_none_not_panic() {
    let pool = SplitPool::new(base_config(Variant::Hybrid)).unwrap();
    let region = region(64);
    pool.rebuild_free_list_in_region(region, unsafe { region.add(64) });

    assert!(pool.allocate_object(1 << 20, 0).is_none());
    assert_eq!(pool.get_largest_free_entry(), 0);
}

// TLH allocation absorbs a too-small residual into the consumed range
// rather than leaving an unrecyclable sliver (§4.4).
#[test]
fn tlh_allocation_absorbs_small_residual() {
    let pool = SplitPool::new(base_config(Variant::Hybrid)).unwrap();
    let region = region(100);
    pool.rebuild_free_list_in_region(region, unsafe { region.add(100) });

    // Request less than the full entry, leaving a residual of 100-64=36
    // which IS above minimum (32) so should recycle normally; bump request
    // to leave a residual below the minimum instead.
    let (base, top) = pool.allocate_tlh(84, 0).unwrap();
    assert_eq!(base, region);
    // Residual would be 16 bytes (< minimum_free_entry_size 32): absorbed.
    assert_eq!(unsafe { top.offset_from(region) }, 100);
    assert_eq!(pool.get_actual_free_memory_size(), 0);
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

// End-to-end sweep connector wiring: connect_chunk/flush_final_chunk/
// connect_final_chunk fold a chunk stream into the pool, publish totals, and
// trigger postProcess automatically (§4.7's connectFinalChunk contract).
#[test]
fn sweep_connector_wiring_publishes_totals_and_runs_post_process() {
    let pool = SplitPool::new(base_config(Variant::Split)).unwrap();
    let region = region(512);

    let mut state = SweepState::new();
    let mut chunk = empty_chunk(region, unsafe { region.add(256) });
    chunk.leading_free_candidate = region;
    chunk.leading_free_candidate_size = 128;
    chunk.dark_matter_bytes = 40;
    chunk.dark_matter_samples = 2;

    unsafe {
        pool.connect_chunk(&mut state, &mut chunk);
    }
    pool.flush_final_chunk(&mut state);
    unsafe {
        pool.connect_final_chunk(&mut state);
    }

    assert_eq!(pool.get_actual_free_memory_size(), 128);
    assert_eq!(pool.get_actual_free_entry_count(), 1);
    assert_eq!(pool.get_dark_matter_bytes(), 40);
    assert_eq!(pool.get_dark_matter_samples(), 2);
    assert!(pool.is_valid());
}

#[test]
fn multithreaded_concurrent_allocation_never_double_issues_memory() {
    use std::sync::Arc;
    use std::thread;

    let pool = Arc::new(SplitPool::new(base_config(Variant::Split)).unwrap());
    let region_size = 1 << 20;
    let region = region(region_size);
    pool.rebuild_free_list_in_region(region, unsafe { region.add(region_size) });

    let num_threads = 8;
    let per_thread = 200;
    let handles: Vec<_> = (0..num_threads)
        .map(|worker_id| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut bases = Vec::with_capacity(per_thread);
                for _ in 0..per_thread {
                    if let Some(p) = pool.allocate_object(64, worker_id) {
                        bases.push(p as usize);
                    }
                }
                bases
            })
        })
        .collect();

    let mut all_bases = Vec::new();
    for h in handles {
        all_bases.extend(h.join().unwrap());
    }

    all_bases.sort_unstable();
    let before = all_bases.len();
    all_bases.dedup();
    assert_eq!(before, all_bases.len(), "no two threads received the same base address");
    assert!(pool.is_valid());
}
