//! Debug-trace helpers, feature-gated the way the teacher gates stat
//! macros: they compile to nothing (including the argument expressions)
//! when `debug` is off, so call sites never pay for formatting work in
//! release builds.

/// Print a free-list trace line. Compiles to nothing without the `debug`
/// feature.
#[macro_export]
macro_rules! pool_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "debug")]
        {
            ::std::println!($($arg)*);
        }
    };
}

/// Run a debug-only invariant check and panic with a message naming the
/// violated invariant if it fails. Compiles to nothing without the `debug`
/// feature (spec.md §4.9: invariant violations are fatal in debug builds).
#[macro_export]
macro_rules! pool_assert_valid {
    ($pool:expr, $what:expr) => {
        #[cfg(feature = "debug")]
        {
            if !$pool.is_valid() {
                panic!("free-list invariant violated: {}", $what);
            }
        }
    };
}
