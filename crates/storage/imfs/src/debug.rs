//! Debug macros for the IMFS
//!
//! These macros compile to nothing when the `debug-imfs` feature is disabled.

/// Verbose trace for path evaluation, block allocation and node lifecycle
#[macro_export]
#[cfg(feature = "debug-imfs")]
macro_rules! debug_imfs {
    ($($arg:tt)*) => {
        log::trace!(target: "imfs", $($arg)*)
    };
}

#[macro_export]
#[cfg(not(feature = "debug-imfs"))]
macro_rules! debug_imfs {
    ($($arg:tt)*) => {};
}
