//! The byte stream contract shared by transports and cache layers.
//!
//! Everything in this crate talks to its neighbours through the [`Stream`] trait: transports
//! implement it, and the cache layers ([`BufferedStream`], [`CachedFileStream`]) both consume and
//! implement it. This makes them stackable on top of each other or on top of any conforming
//! transport.
//!
//! # Completion modes
//!
//! Every [`read`](Stream::read) and [`write`](Stream::write) takes a [`CompletionMode`] that
//! bounds how much blocking work a single call may perform against the layer below:
//!
//! - [`CompletionMode::Immediate`] only moves bytes that are ready without blocking.
//! - [`CompletionMode::Once`] performs at most one blocking operation.
//! - [`CompletionMode::All`] keeps going until the full request is satisfied, failing with
//!   [`StreamError::PastEnd`] if the stream ends first.

use std::io;
use std::sync::Arc;

use crate::common::assert_error_traits;

mod buffered;
mod cached_file;
mod handle;

pub use self::buffered::{BufferSettings, BufferedStream, BufferedStreamBuilder, SettingsError};
pub use self::cached_file::{
    CacheFileError, CacheSettings, CachedFileStream, CachedFileStreamBuilder,
};
pub use self::handle::StreamHandle;

/// Result type used by every [`Stream`] operation.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Policy controlling how much blocking I/O a single read or write may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompletionMode {
    /// Return as soon as no further progress can be made without blocking.
    Immediate,
    /// Perform at most one blocking operation, then return what has been accumulated.
    Once,
    /// Block until the whole request is satisfied or the stream ends.
    #[default]
    All,
}

impl CompletionMode {
    /// Whether a call in this mode may start a blocking operation now.
    ///
    /// `blocked` tells whether the call already performed one, `progressed` whether it already
    /// moved any bytes.
    #[inline]
    pub(crate) fn may_block(self, blocked: bool, progressed: bool) -> bool {
        match self {
            CompletionMode::Immediate => false,
            CompletionMode::Once => !blocked && !progressed,
            CompletionMode::All => true,
        }
    }
}

/// Errors that can occur when operating on a [`Stream`].
#[derive(Debug, thiserror::Error, Clone)]
pub enum StreamError {
    /// A read in [`CompletionMode::All`] hit the end of the stream. The bytes that were
    /// available have been consumed.
    #[error("reading past end of stream: requested {requested} bytes, got {read}")]
    PastEnd {
        /// Number of bytes the caller asked for.
        requested: usize,
        /// Number of bytes that were actually transferred.
        read: usize,
    },
    /// An offset lies beyond the size of the stream, even after refreshing it.
    #[error("offset {offset} is out of range for a stream of {size} bytes")]
    OutOfRange {
        /// The offending offset.
        offset: u64,
        /// The best known size of the stream.
        size: u64,
    },
    /// The transport failed.
    #[error("I/O error")]
    Io(#[source] Arc<io::Error>),
    /// The stream does not support this operation.
    #[error("operation not supported by this stream: {0}")]
    Unsupported(&'static str),
    /// A write was attempted on a stream opened without write access.
    #[error("stream is read-only")]
    ReadOnly,
    /// The stream was closed explicitly.
    #[error("stream is closed")]
    Closed,
}
assert_error_traits!(StreamError);

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Io(Arc::new(err))
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::PastEnd { .. } => io::ErrorKind::UnexpectedEof,
            StreamError::OutOfRange { .. } => io::ErrorKind::InvalidInput,
            StreamError::Io(inner) => inner.kind(),
            StreamError::Unsupported(_) => io::ErrorKind::Unsupported,
            StreamError::ReadOnly => io::ErrorKind::PermissionDenied,
            StreamError::Closed => io::ErrorKind::NotConnected,
        };
        io::Error::new(kind, err)
    }
}

/// A positioned stream of bytes.
///
/// Implementors only need to provide positioning, sizing and raw transfers; the cache layers
/// are built on top through the adapter methods ([`buffered`](Stream::buffered),
/// [`cached`](Stream::cached), [`shared`](Stream::shared)).
///
/// Operations on one stream are expected to come from a single logical task at a time.
pub trait Stream {
    /// Returns the total size of the stream in bytes, as far as it is known.
    ///
    /// For sequential sources this may grow as more data arrives.
    fn size(&mut self) -> Result<u64>;

    /// Returns how many bytes past the current position can be read without blocking.
    fn least_size(&mut self) -> Result<u64> {
        Ok(self.size()?.saturating_sub(self.tell()))
    }

    /// Returns the current position.
    fn tell(&self) -> u64;

    /// Moves the position to `offset`, counted from the start of the stream.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Reads into `dst` from the current position and advances past the bytes read.
    ///
    /// Returns the number of bytes read. `0` with a non-empty `dst` means that nothing could be
    /// read under the given `mode`, which for [`CompletionMode::Once`] is the end of the stream.
    fn read(&mut self, dst: &mut [u8], mode: CompletionMode) -> Result<usize>;

    /// Writes `src` at the current position and advances past the bytes written.
    fn write(&mut self, src: &[u8], mode: CompletionMode) -> Result<usize>;

    /// Pushes buffered writes down to the layer below.
    fn flush(&mut self) -> Result<()>;

    /// Cuts or extends the stream to exactly `size` bytes.
    fn truncate(&mut self, size: u64) -> Result<()> {
        let _ = size;
        Err(StreamError::Unsupported("truncate"))
    }

    /// Reads until `dst` is full or the stream ends. Returns the number of bytes read.
    ///
    /// Unlike a read in [`CompletionMode::All`], reaching the end early is not an error.
    fn fill(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < dst.len() {
            match self.read(&mut dst[filled..], CompletionMode::Once)? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    /// Caches this stream in a fixed number of fixed-size chunks, using the default settings.
    ///
    /// Use [`BufferedStream::builder`] to pick the chunk size and count.
    #[inline]
    fn buffered(self) -> BufferedStream<Self>
    where
        Self: Sized,
    {
        BufferedStream::new(self)
    }

    /// Stages this stream into an anonymous temporary file as it is read, making it seekable.
    ///
    /// Use [`CachedFileStream::builder`] to pick the file location or enable writes.
    #[inline]
    fn cached(self) -> Result<CachedFileStream<Self>, CacheFileError>
    where
        Self: Sized,
    {
        CachedFileStream::builder(self).open()
    }

    /// Wraps this stream in a cheaply clonable, reference-counted handle.
    #[inline]
    fn shared(self) -> StreamHandle<Self>
    where
        Self: Sized,
    {
        StreamHandle::new(self)
    }
}

impl<S: Stream + ?Sized> Stream for Box<S> {
    #[inline]
    fn size(&mut self) -> Result<u64> {
        (**self).size()
    }

    #[inline]
    fn least_size(&mut self) -> Result<u64> {
        (**self).least_size()
    }

    #[inline]
    fn tell(&self) -> u64 {
        (**self).tell()
    }

    #[inline]
    fn seek(&mut self, offset: u64) -> Result<()> {
        (**self).seek(offset)
    }

    #[inline]
    fn read(&mut self, dst: &mut [u8], mode: CompletionMode) -> Result<usize> {
        (**self).read(dst, mode)
    }

    #[inline]
    fn write(&mut self, src: &[u8], mode: CompletionMode) -> Result<usize> {
        (**self).write(src, mode)
    }

    #[inline]
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    #[inline]
    fn truncate(&mut self, size: u64) -> Result<()> {
        (**self).truncate(size)
    }
}
