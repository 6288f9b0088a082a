//! Pool configuration (spec.md §6.1).
//!
//! The teacher crate derives its size-class table at compile time via
//! `build.rs` reading a TOML file (see `resolve_config`/`validate_classes` in
//! the original `rtmalloc` `build.rs`). `heap_free_list_count` here is chosen
//! per GC heap instance at runtime (it tracks the collector's worker count,
//! which varies per process), so the same validate-with-assertions style is
//! ported as a runtime constructor instead of a build script.

use core::fmt;

/// Which of the two concrete search/reserved-entry policies a pool uses.
///
/// Mirrors `MemoryPoolHybrid` vs. `MemoryPoolSplitAddressOrderedList`, both of
/// which share nearly all of `MemoryPoolSplitAddressOrderedListBase` and
/// differ only in how the reserved (very-large) free entry is tracked.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Variant {
    /// The reserved entry lives on its own sub-list, tried only as a fallback.
    Hybrid,
    /// The reserved entry stays in place on a normal sub-list, skipped on the
    /// first search pass and addressed directly on the fallback pass.
    Split,
}

/// Process-wide pool parameters, read once at construction (spec.md §6).
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    /// `N`: number of normal sub-lists. Typically equal to GC worker count.
    pub heap_free_list_count: usize,
    /// Minimum size, in bytes, of any free entry placed on a sub-list.
    pub minimum_free_entry_size: usize,
    /// Size threshold at or above which an entry may become the reserved entry.
    pub very_large_object_threshold: usize,
    /// Hint cache capacity per sub-list (spec.md §3.2; typical value 8).
    pub hint_capacity: usize,
    /// Entries walked past before a search promotes a new hint (typical 4).
    pub hint_max_walk: usize,
    /// Sizing knobs for the large-object allocate-stats histograms.
    pub large_object_allocate_stats_top_k: usize,
    pub large_object_allocate_stats_threshold: usize,
    pub large_object_size_class_ratio: f64,
    /// Cap on sweep chunks consulted by the by-chunk `post_process` split.
    pub split_free_list_number_chunks_prepared: usize,
    /// Histogram domain for TLH size-class stats.
    pub tlh_minimum_size: usize,
    pub tlh_maximum_size: usize,
    /// Which reserved-entry policy this pool uses.
    pub variant: Variant,
}

/// Reported by [`PoolConfig::validate`]. Mirrors the assertion messages in
/// the teacher's `build.rs::resolve_config`/`validate_classes`, but returned
/// as a value rather than a build-time `panic!` since a misconfigured pool is
/// a normal runtime condition a collector must be able to report, not a
/// build failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    ZeroFreeListCount,
    MinimumFreeEntryTooSmall { got: usize, floor: usize },
    MinimumFreeEntryNotPowerOfTwo { got: usize },
    ThresholdBelowMinimumEntry { threshold: usize, minimum: usize },
    ZeroHintCapacity,
    ZeroHintMaxWalk,
    ZeroSplitChunksPrepared,
    TlhRangeInverted { min: usize, max: usize },
    ZeroSizeClassRatio,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroFreeListCount => {
                write!(f, "heap_free_list_count must be > 0")
            }
            ConfigError::MinimumFreeEntryTooSmall { got, floor } => write!(
                f,
                "minimum_free_entry_size ({got}) must be >= {floor} (size of a free entry header)"
            ),
            ConfigError::MinimumFreeEntryNotPowerOfTwo { got } => write!(
                f,
                "minimum_free_entry_size ({got}) must be a power of two"
            ),
            ConfigError::ThresholdBelowMinimumEntry { threshold, minimum } => write!(
                f,
                "very_large_object_threshold ({threshold}) must be >= minimum_free_entry_size ({minimum})"
            ),
            ConfigError::ZeroHintCapacity => write!(f, "hint_capacity must be > 0"),
            ConfigError::ZeroHintMaxWalk => write!(f, "hint_max_walk must be > 0"),
            ConfigError::ZeroSplitChunksPrepared => {
                write!(f, "split_free_list_number_chunks_prepared must be > 0")
            }
            ConfigError::TlhRangeInverted { min, max } => write!(
                f,
                "tlh_minimum_size ({min}) must be <= tlh_maximum_size ({max})"
            ),
            ConfigError::ZeroSizeClassRatio => {
                write!(f, "large_object_size_class_ratio must be > 0.0")
            }
        }
    }
}

impl PoolConfig {
    /// Minimum legal `minimum_free_entry_size`: a free entry's in-band header
    /// (`size` + `next`, see `free_entry::FreeEntry`).
    pub const FREE_ENTRY_HEADER_SIZE: usize = crate::free_entry::FreeEntry::HEADER_SIZE;

    /// Validate the configuration, matching the assertions in the teacher's
    /// `build.rs::resolve_config`. Returns the (unmodified) config on success
    /// so callers can write `let cfg = PoolConfig { .. }.validate()?;`.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.heap_free_list_count == 0 {
            return Err(ConfigError::ZeroFreeListCount);
        }
        if self.minimum_free_entry_size < Self::FREE_ENTRY_HEADER_SIZE {
            return Err(ConfigError::MinimumFreeEntryTooSmall {
                got: self.minimum_free_entry_size,
                floor: Self::FREE_ENTRY_HEADER_SIZE,
            });
        }
        if !self.minimum_free_entry_size.is_power_of_two() {
            return Err(ConfigError::MinimumFreeEntryNotPowerOfTwo {
                got: self.minimum_free_entry_size,
            });
        }
        if self.very_large_object_threshold < self.minimum_free_entry_size {
            return Err(ConfigError::ThresholdBelowMinimumEntry {
                threshold: self.very_large_object_threshold,
                minimum: self.minimum_free_entry_size,
            });
        }
        if self.hint_capacity == 0 {
            return Err(ConfigError::ZeroHintCapacity);
        }
        if self.hint_max_walk == 0 {
            return Err(ConfigError::ZeroHintMaxWalk);
        }
        if self.split_free_list_number_chunks_prepared == 0 {
            return Err(ConfigError::ZeroSplitChunksPrepared);
        }
        if self.tlh_minimum_size > self.tlh_maximum_size {
            return Err(ConfigError::TlhRangeInverted {
                min: self.tlh_minimum_size,
                max: self.tlh_maximum_size,
            });
        }
        if self.large_object_size_class_ratio <= 0.0 {
            return Err(ConfigError::ZeroSizeClassRatio);
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PoolConfig {
        PoolConfig {
            heap_free_list_count: 2,
            minimum_free_entry_size: 32,
            very_large_object_threshold: 4096,
            hint_capacity: 8,
            hint_max_walk: 4,
            large_object_allocate_stats_top_k: 8,
            large_object_allocate_stats_threshold: 16,
            large_object_size_class_ratio: 2.0,
            split_free_list_number_chunks_prepared: 64,
            tlh_minimum_size: 1024,
            tlh_maximum_size: 1 << 20,
            variant: Variant::Split,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_free_lists_rejected() {
        let mut cfg = base_config();
        cfg.heap_free_list_count = 0;
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::ZeroFreeListCount);
    }

    #[test]
    fn non_power_of_two_minimum_rejected() {
        let mut cfg = base_config();
        cfg.minimum_free_entry_size = 48;
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::MinimumFreeEntryNotPowerOfTwo { .. }
        ));
    }

    #[test]
    fn threshold_below_minimum_rejected() {
        let mut cfg = base_config();
        cfg.very_large_object_threshold = 16;
        cfg.minimum_free_entry_size = 32;
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::ThresholdBelowMinimumEntry { .. }
        ));
    }

    #[test]
    fn inverted_tlh_range_rejected() {
        let mut cfg = base_config();
        cfg.tlh_minimum_size = 2048;
        cfg.tlh_maximum_size = 1024;
        assert!(matches!(
            cfg.validate().unwrap_err(),
            ConfigError::TlhRangeInverted { .. }
        ));
    }
}
