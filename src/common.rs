/// Index of a fixed-size chunk within a stream.
pub type ChunkIndex = u64;

/// Compile-time check that an error type is usable across the crate boundary.
pub(crate) const fn error_traits_hold<T>()
where
    T: std::error::Error + Send + Sync + Clone + 'static,
{
}

macro_rules! assert_error_traits {
    ($to_test:path) => {
        const _: () = $crate::common::error_traits_hold::<$to_test>();
    };
}
pub(crate) use assert_error_traits;

/// Reports a failure that happened while tearing a stream down, where it can no longer be
/// returned to the caller.
pub(crate) fn report_teardown_error(context: &str, err: &dyn std::error::Error) {
    #[cfg(feature = "tracing")]
    tracing::warn!("{context}: {err}");
    #[cfg(not(feature = "tracing"))]
    eprintln!("{context}: {err}");
}
