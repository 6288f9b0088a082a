#![no_std]

//! gcfreepool: a split, address-ordered free-list memory pool for a
//! garbage-collected heap.
//!
//! Services two request shapes from an enclosing memory subsystem:
//! - **Object allocation** — an exact-sized byte range for one object.
//! - **TLH allocation** — a larger contiguous range a mutator thread bumps
//!   into.
//!
//! The pool owns a contiguous heap region, multiplexes its free list across
//! `N` parallel sub-lists for concurrent allocation, keeps a single very-
//! large *reserved* entry out of the normal search path, and absorbs free
//! ranges from a sweep phase or heap expansion.
//!
//! # Usage
//!
//! ```ignore
//! use gcfreepool::config::{PoolConfig, Variant};
//! use gcfreepool::pool::SplitPool;
//!
//! let pool = SplitPool::new(PoolConfig {
//!     heap_free_list_count: 4,
//!     minimum_free_entry_size: 32,
//!     very_large_object_threshold: 1 << 20,
//!     hint_capacity: 8,
//!     hint_max_walk: 4,
//!     large_object_allocate_stats_top_k: 16,
//!     large_object_allocate_stats_threshold: 256,
//!     large_object_size_class_ratio: 2.0,
//!     split_free_list_number_chunks_prepared: 64,
//!     tlh_minimum_size: 2048,
//!     tlh_maximum_size: 1 << 20,
//!     variant: Variant::Split,
//! })?;
//! ```

extern crate alloc;
#[cfg(any(test, feature = "std", feature = "debug"))]
extern crate std;

pub mod config;
pub mod free_entry;
pub mod hint_cache;
pub mod macros;
pub mod pool;
pub mod stats;
pub mod sub_list;
pub mod sweep;
pub mod sync;

pub use config::{ConfigError, PoolConfig, Variant};
pub use free_entry::FreeEntry;
pub use pool::{Cause, SplitPool};
