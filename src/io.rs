//! Bridges between [`Stream`] and the [`std::io`] traits.
//!
//! - [`IoStream`] turns a random-access `Read + Write + Seek` value, such as a
//!   [`File`](std::fs::File) or a [`Cursor`](std::io::Cursor), into a [`Stream`].
//! - [`ReadStream`] turns a forward-only reader, such as a network body, into a sequential
//!   [`Stream`], typically placed below a [`CachedFileStream`](crate::CachedFileStream).
//! - [`StdIo`] goes the other way and exposes any [`Stream`] through `Read + Write + Seek`.
//!
//! The std traits carry no readiness information, so [`CompletionMode::Immediate`] behaves like
//! [`CompletionMode::Once`] on the adapters in this module.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::stream::{CompletionMode, Result, Stream, StreamError};

fn read_with_mode<R: Read + ?Sized>(
    reader: &mut R,
    dst: &mut [u8],
    mode: CompletionMode,
) -> Result<usize> {
    let mut read = 0;
    while read < dst.len() {
        match reader.read(&mut dst[read..]) {
            Ok(0) => break,
            Ok(n) => {
                read += n;
                if mode != CompletionMode::All {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    if mode == CompletionMode::All && read < dst.len() {
        return Err(StreamError::PastEnd {
            requested: dst.len(),
            read,
        });
    }
    Ok(read)
}

fn write_with_mode<W: Write + ?Sized>(
    writer: &mut W,
    src: &[u8],
    mode: CompletionMode,
) -> Result<usize> {
    let mut written = 0;
    while written < src.len() {
        match writer.write(&src[written..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            Ok(n) => {
                written += n;
                if mode != CompletionMode::All {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(written)
}

/// A [`Stream`] over a random-access std I/O object.
///
/// The position is tracked here, so the wrapped value must not be moved behind the adapter's
/// back.
#[derive(Debug)]
pub struct IoStream<T> {
    inner: T,
    pos: u64,
}

impl<T: Read + Write + Seek> IoStream<T> {
    /// Wraps `inner`, starting at its current position.
    pub fn new(mut inner: T) -> Result<IoStream<T>> {
        let pos = inner.stream_position()?;
        Ok(IoStream { inner, pos })
    }

    /// Gets a reference to the wrapped value.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consumes the adapter, returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Write + Seek> Stream for IoStream<T> {
    fn size(&mut self) -> Result<u64> {
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(self.pos))?;
        Ok(end)
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.pos = self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8], mode: CompletionMode) -> Result<usize> {
        let result = read_with_mode(&mut self.inner, dst, mode);
        if let Ok(read) | Err(StreamError::PastEnd { read, .. }) = result {
            self.pos += read as u64;
        }
        result
    }

    fn write(&mut self, src: &[u8], mode: CompletionMode) -> Result<usize> {
        let written = write_with_mode(&mut self.inner, src, mode)?;
        self.pos += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// A sequential [`Stream`] over a forward-only reader.
///
/// Seeking forwards discards bytes; seeking backwards fails with
/// [`StreamError::Unsupported`]. The reader never reports bytes as ready, so a
/// [`CachedFileStream`](crate::CachedFileStream) above it pulls with blocking reads only.
#[derive(Debug)]
pub struct ReadStream<R> {
    inner: R,
    pos: u64,
    len: Option<u64>,
}

impl<R: Read> ReadStream<R> {
    /// Wraps a reader of unknown length.
    pub fn new(inner: R) -> ReadStream<R> {
        ReadStream {
            inner,
            pos: 0,
            len: None,
        }
    }

    /// Wraps a reader that is known to produce `len` bytes, such as a body with a content
    /// length.
    pub fn with_len(inner: R, len: u64) -> ReadStream<R> {
        ReadStream {
            inner,
            pos: 0,
            len: Some(len),
        }
    }

    /// Consumes the adapter, returning the reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Stream for ReadStream<R> {
    /// The declared length, or the number of bytes seen so far when there is none.
    fn size(&mut self) -> Result<u64> {
        Ok(self.len.map_or(self.pos, |len| len.max(self.pos)))
    }

    #[inline]
    fn least_size(&mut self) -> Result<u64> {
        Ok(0)
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if offset < self.pos {
            return Err(StreamError::Unsupported("backward seek"));
        }
        let wanted = offset - self.pos;
        let skipped = io::copy(&mut (&mut self.inner).take(wanted), &mut io::sink())?;
        self.pos += skipped;
        if skipped < wanted {
            return Err(StreamError::OutOfRange {
                offset,
                size: self.pos,
            });
        }
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8], mode: CompletionMode) -> Result<usize> {
        let result = read_with_mode(&mut self.inner, dst, mode);
        if let Ok(read) | Err(StreamError::PastEnd { read, .. }) = result {
            self.pos += read as u64;
        }
        result
    }

    fn write(&mut self, _src: &[u8], _mode: CompletionMode) -> Result<usize> {
        Err(StreamError::Unsupported("write"))
    }

    #[inline]
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Exposes a [`Stream`] as [`Read`], [`Write`] and [`Seek`].
///
/// Reads and writes perform at most one blocking operation each, as the std traits expect.
///
/// # Example
///
/// ```
/// use std::io::{Read, Seek, SeekFrom};
/// use stream_cache::io::StdIo;
/// use stream_cache::{MemoryStream, Stream};
///
/// let mut io = StdIo::new(MemoryStream::from(b"hello world".to_vec()).buffered());
/// io.seek(SeekFrom::End(-5))?;
/// let mut word = String::new();
/// io.read_to_string(&mut word)?;
/// assert_eq!(word, "world");
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct StdIo<S> {
    inner: S,
}

impl<S: Stream> StdIo<S> {
    /// Wraps `inner`.
    pub fn new(inner: S) -> StdIo<S> {
        StdIo { inner }
    }

    /// Gets a reference to the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Gets a mutable reference to the wrapped stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes the adapter, returning the wrapped stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Stream> Read for StdIo<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.inner.read(buf, CompletionMode::Once)?)
    }
}

impl<S: Stream> Write for StdIo<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.inner.write(buf, CompletionMode::Once)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.inner.flush()?)
    }
}

impl<S: Stream> Seek for StdIo<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.inner.tell().checked_add_signed(delta),
            SeekFrom::End(delta) => self.inner.size()?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        self.inner.seek(target)?;
        Ok(target)
    }
}
