//! Allocation statistics (spec.md §3.4, §6.2).
//!
//! Two kinds of counters live here, mirroring the teacher's split between
//! `stats.rs` (plain atomic counters, `Relaxed` ordering, read via a
//! [`Snapshot`]) and `histogram.rs` (bucketed distribution tracking). The
//! pool-wide counters below follow the former; [`AllocateStats`] is the
//! latter's collaborator, generalized from fixed 8-byte buckets to the
//! pool's configured geometric size classes (`large_object_size_class_ratio`)
//! since free-entry and TLH sizes span a far wider range than tcmalloc's
//! request sizes.

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

/// Pool-wide counters (spec.md §3.4's `allocCount`/`allocBytes`/
/// `allocDiscardedBytes`/`darkMatterBytes`/`darkMatterSamples`). All
/// `Relaxed` — these are observational, not used for synchronization; the
/// sub-list mutexes provide the real ordering guarantees.
pub struct PoolStats {
    pub alloc_count: AtomicU64,
    pub alloc_bytes: AtomicU64,
    pub alloc_discarded_bytes: AtomicU64,
    pub dark_matter_bytes: AtomicU64,
    pub dark_matter_samples: AtomicU64,
}

impl PoolStats {
    pub const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            alloc_bytes: AtomicU64::new(0),
            alloc_discarded_bytes: AtomicU64::new(0),
            dark_matter_bytes: AtomicU64::new(0),
            dark_matter_samples: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_allocation(&self, size: usize) {
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
        self.alloc_bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_discarded(&self, size: usize) {
        self.alloc_discarded_bytes
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dark_matter(&self, bytes: usize) {
        self.dark_matter_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.dark_matter_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold in an already-aggregated `(bytes, samples)` pair, as published by
    /// the sweep connector at `connectFinalChunk` (spec.md §4.7), rather than
    /// incrementing the sample count by exactly one.
    #[inline]
    pub fn record_dark_matter_totals(&self, bytes: usize, samples: usize) {
        self.dark_matter_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.dark_matter_samples
            .fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.alloc_count.store(0, Ordering::Relaxed);
        self.alloc_bytes.store(0, Ordering::Relaxed);
        self.alloc_discarded_bytes.store(0, Ordering::Relaxed);
        self.dark_matter_bytes.store(0, Ordering::Relaxed);
        self.dark_matter_samples.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            alloc_count: self.alloc_count.load(Ordering::Relaxed),
            alloc_bytes: self.alloc_bytes.load(Ordering::Relaxed),
            alloc_discarded_bytes: self.alloc_discarded_bytes.load(Ordering::Relaxed),
            dark_matter_bytes: self.dark_matter_bytes.load(Ordering::Relaxed),
            dark_matter_samples: self.dark_matter_samples.load(Ordering::Relaxed),
        }
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of [`PoolStats`]. Not globally consistent across
/// fields — individual loads race with concurrent allocation — but
/// sufficient for monitoring (same caveat as the teacher's `stats::Snapshot`).
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub alloc_count: u64,
    pub alloc_bytes: u64,
    pub alloc_discarded_bytes: u64,
    pub dark_matter_bytes: u64,
    pub dark_matter_samples: u64,
}

/// One geometric size-class bucket in an [`AllocateStats`] histogram.
struct Bucket {
    /// Inclusive upper bound of this class.
    ceiling: usize,
    current: AtomicU64,
}

/// Large-object allocate-stats collaborator (spec.md §3.4's
/// `largeObjectAllocateStats`/`largeObjectAllocateStatsForFreeList`).
/// Generalizes the teacher's fixed 8-byte-bucket histogram to geometric
/// classes starting at `threshold` and growing by `ratio` each step, capped
/// at `top_k` classes — free-entry and TLH sizes span orders of magnitude,
/// unlike tcmalloc's request sizes.
pub struct AllocateStats {
    buckets: Vec<Bucket>,
    below_threshold: AtomicU64,
}

impl AllocateStats {
    /// Build a histogram covering `[threshold, ..)` in `top_k` geometric
    /// classes growing by `ratio` (`ratio > 1.0`, enforced by
    /// `PoolConfig::validate`).
    pub fn new(threshold: usize, ratio: f64, top_k: usize) -> Self {
        let mut buckets = Vec::with_capacity(top_k.max(1));
        let mut ceiling = threshold.max(1) as f64;
        for _ in 0..top_k.max(1) {
            buckets.push(Bucket {
                ceiling: ceiling as usize,
                current: AtomicU64::new(0),
            });
            ceiling *= ratio;
        }
        Self {
            buckets,
            below_threshold: AtomicU64::new(0),
        }
    }

    fn bucket_index(&self, size: usize) -> Option<usize> {
        self.buckets.iter().position(|b| size <= b.ceiling)
    }

    /// Record one allocation/free-entry of `size` bytes.
    pub fn increment(&self, size: usize) {
        match self.bucket_index(size) {
            Some(i) => {
                self.buckets[i].current.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.below_threshold.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Undo a previous [`increment`] — used when a free entry shrinks into a
    /// different class or is fully consumed (§4.3).
    pub fn decrement(&self, size: usize) {
        match self.bucket_index(size) {
            Some(i) => {
                self.buckets[i].current.fetch_sub(1, Ordering::Relaxed);
            }
            None => {
                self.below_threshold.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Move one count from `old_size`'s class to `new_size`'s class, used
    /// when a tracked entry is resized in place rather than created/destroyed.
    pub fn reclassify(&self, old_size: usize, new_size: usize) {
        self.decrement(old_size);
        self.increment(new_size);
    }

    /// Fold `other`'s current counts into `self` (§5's `mergeLargeObjectAllocateStats`).
    /// Caller must ensure `other` has the same class layout (same threshold/ratio/top_k).
    pub fn merge(&self, other: &AllocateStats) {
        debug_assert_eq!(self.buckets.len(), other.buckets.len());
        for (mine, theirs) in self.buckets.iter().zip(other.buckets.iter()) {
            mine.current
                .fetch_add(theirs.current.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        self.below_threshold.fetch_add(
            other.below_threshold.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
    }

    /// Divide every class's count by `divisor` (§5's `averageLargeObjectAllocateStats`,
    /// used after merging per-sub-list stats into the aggregate across a GC cycle).
    pub fn average(&self, divisor: u64) {
        if divisor == 0 {
            return;
        }
        for b in &self.buckets {
            let v = b.current.load(Ordering::Relaxed);
            b.current.store(v / divisor, Ordering::Relaxed);
        }
        let v = self.below_threshold.load(Ordering::Relaxed);
        self.below_threshold.store(v / divisor, Ordering::Relaxed);
    }

    /// Zero every counter (start of a new GC cycle's accumulation).
    pub fn reset_current(&self) {
        for b in &self.buckets {
            b.current.store(0, Ordering::Relaxed);
        }
        self.below_threshold.store(0, Ordering::Relaxed);
    }

    /// The `k` classes with the highest counts, sorted by ceiling ascending.
    /// Returns `(ceiling, count)` pairs; empty classes are excluded. Gated
    /// behind `profiling` (always available under `cfg(test)`), the same way
    /// the teacher gates its own histogram reporting behind `alloc-histogram`
    /// — sorting every bucket isn't worth paying for on the hot allocate path
    /// in builds that never inspect it.
    #[cfg(any(test, feature = "profiling"))]
    pub fn top_k_classes(&self, k: usize) -> Vec<(usize, u64)> {
        let mut all: Vec<(usize, u64)> = self
            .buckets
            .iter()
            .map(|b| (b.ceiling, b.current.load(Ordering::Relaxed)))
            .filter(|(_, c)| *c > 0)
            .collect();
        all.sort_unstable_by_key(|(_, c)| core::cmp::Reverse(*c));
        all.truncate(k);
        all.sort_unstable_by_key(|(ceiling, _)| *ceiling);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_stats_record_and_snapshot() {
        let stats = PoolStats::new();
        stats.record_allocation(128);
        stats.record_allocation(256);
        stats.record_discarded(8);
        stats.record_dark_matter(40);
        let snap = stats.snapshot();
        assert_eq!(snap.alloc_count, 2);
        assert_eq!(snap.alloc_bytes, 384);
        assert_eq!(snap.alloc_discarded_bytes, 8);
        assert_eq!(snap.dark_matter_bytes, 40);
        assert_eq!(snap.dark_matter_samples, 1);
    }

    #[test]
    fn pool_stats_reset_clears_everything() {
        let stats = PoolStats::new();
        stats.record_allocation(64);
        stats.reset();
        assert_eq!(stats.snapshot().alloc_count, 0);
    }

    #[test]
    fn allocate_stats_buckets_by_ceiling() {
        let hist = AllocateStats::new(16, 2.0, 4); // classes: 16, 32, 64, 128
        hist.increment(10); // below threshold
        hist.increment(16);
        hist.increment(20);
        hist.increment(200); // overflow past last class
        let top = hist.top_k_classes(4);
        assert!(top.contains(&(16, 1)));
        assert!(top.contains(&(32, 1)));
        assert_eq!(hist.below_threshold.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn allocate_stats_merge_and_average() {
        let a = AllocateStats::new(16, 2.0, 2);
        let b = AllocateStats::new(16, 2.0, 2);
        a.increment(16);
        b.increment(16);
        b.increment(16);
        a.merge(&b);
        assert_eq!(a.top_k_classes(2), alloc::vec![(16, 3)]);
        a.average(3);
        assert_eq!(a.top_k_classes(2), alloc::vec![(16, 1)]);
    }

    #[test]
    fn allocate_stats_reclassify_moves_count() {
        let hist = AllocateStats::new(16, 2.0, 4);
        hist.increment(20); // class 32
        hist.reclassify(20, 60); // move to class 64
        let top = hist.top_k_classes(4);
        assert_eq!(top, alloc::vec![(64, 1)]);
    }
}
