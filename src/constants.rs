//! Common constants

/// Chunk size (bytes) a [`BufferedStream`](crate::BufferedStream) uses by default.
///
/// Always a power of two, as chunk sizes must be.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Number of chunks a [`BufferedStream`](crate::BufferedStream) keeps resident by default.
pub const DEFAULT_BUFFER_COUNT: usize = 16;

/// Largest single pull (bytes) a [`CachedFileStream`](crate::CachedFileStream) makes from its
/// source while staging.
pub const DEFAULT_STAGING_SIZE: usize = 64 * 1024;
