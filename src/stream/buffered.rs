//! Chunked LRU cache over a random-access stream.
//!
//! A [`BufferedStream`] keeps a fixed number of fixed-size chunks of the stream below it in
//! memory. Reads and writes are served from resident chunks; a miss loads the chunk into the
//! least recently used slot, writing that slot back first if it holds unflushed data.
//!
//! # Example
//!
//! ```
//! use stream_cache::{BufferedStream, CompletionMode, MemoryStream, Stream};
//!
//! let data: Vec<u8> = (0..=255).collect();
//! let mut stream = BufferedStream::builder(MemoryStream::from(data))
//!     .with_buffer_size(16)
//!     .with_buffer_count(4)
//!     .build()?;
//!
//! stream.seek(100)?;
//! let mut buf = [0u8; 4];
//! stream.read(&mut buf, CompletionMode::All)?;
//! assert_eq!(buf, [100, 101, 102, 103]);
//! assert!(stream.is_resident(6));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io;
use std::ops::ControlFlow;

use crate::common::{assert_error_traits, report_teardown_error, ChunkIndex};
use crate::constants::{DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE};

use self::chunks::{ChunkSpan, ChunkTable, Slot};
use super::{CompletionMode, Result, Stream, StreamError};

mod chunks;

/// Buffered stream configuration.
#[derive(Clone, Debug)]
pub struct BufferSettings {
    /// Size of one chunk in bytes. Rounded up to a power of two when building.
    pub(crate) buffer_size: usize,

    /// Number of chunks kept in memory at once.
    pub(crate) buffer_count: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }
}

/// Error that can occur when building a [`BufferedStream`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// Chunks must hold at least one byte.
    #[error("buffer size must not be zero")]
    ZeroBufferSize,
    /// At least one chunk must be resident.
    #[error("buffer count must not be zero")]
    ZeroBufferCount,
    /// The chunk arena would not fit in memory.
    #[error("{buffer_count} buffers of {buffer_size} bytes do not fit in memory")]
    TooLarge {
        /// Requested chunk size.
        buffer_size: usize,
        /// Requested chunk count.
        buffer_count: usize,
    },
}
assert_error_traits!(SettingsError);

/// Builder for configuring and creating a [`BufferedStream`].
///
/// # Example
///
/// ```
/// use stream_cache::{BufferedStream, MemoryStream};
///
/// let stream = BufferedStream::builder(MemoryStream::new())
///     .with_buffer_size(1000) // rounded up to 1024
///     .with_buffer_count(8)
///     .build()?;
/// assert_eq!(stream.buffer_size(), 1024);
/// # Ok::<(), stream_cache::SettingsError>(())
/// ```
#[derive(Debug)]
pub struct BufferedStreamBuilder<S> {
    inner: S,
    settings: BufferSettings,
}

impl<S: Stream> BufferedStreamBuilder<S> {
    /// Sets the size of one chunk. Rounded up to the next power of two.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.settings.buffer_size = buffer_size;
        self
    }

    /// Sets how many chunks are kept in memory at once.
    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.settings.buffer_count = buffer_count;
        self
    }

    /// Replaces all settings at once.
    pub fn with_settings(mut self, settings: BufferSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Allocates the chunk arena and creates the stream.
    pub fn build(self) -> Result<BufferedStream<S>, SettingsError> {
        let BufferSettings {
            buffer_size,
            buffer_count,
        } = self.settings;
        if buffer_size == 0 {
            return Err(SettingsError::ZeroBufferSize);
        }
        if buffer_count == 0 {
            return Err(SettingsError::ZeroBufferCount);
        }
        let too_large = SettingsError::TooLarge {
            buffer_size,
            buffer_count,
        };
        let buffer_size = buffer_size
            .checked_next_power_of_two()
            .ok_or_else(|| too_large.clone())?;
        let arena = buffer_size.checked_mul(buffer_count).ok_or(too_large.clone())?;
        if arena > isize::MAX as usize {
            return Err(too_large);
        }
        Ok(BufferedStream::with_table(
            self.inner,
            ChunkTable::new(buffer_size, buffer_count),
        ))
    }
}

/// Zero-copy window into the resident chunk at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Peek {
    slot: usize,
    start: usize,
    end: usize,
}

impl Peek {
    #[inline]
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// A stream that caches its inner stream in a fixed number of fixed-size chunks.
///
/// This `struct` is created by the [`buffered`](Stream::buffered) method on [`Stream`] or
/// through [`BufferedStream::builder`].
///
/// Dirty chunks are written back when they are evicted, on [`flush`](Stream::flush) and when
/// the stream is dropped. Errors while flushing on drop can only be logged; call `flush`
/// explicitly to observe them.
pub struct BufferedStream<S: Stream> {
    inner: S,
    table: ChunkTable,
    /// Logical position.
    ptr: u64,
    /// Best known size, including unflushed writes.
    size: u64,
    peek: Option<Peek>,
}

impl<S: Stream> BufferedStream<S> {
    /// Creates a buffered stream with the default chunk size and count.
    pub fn new(inner: S) -> BufferedStream<S> {
        BufferedStream::with_table(
            inner,
            ChunkTable::new(DEFAULT_BUFFER_SIZE, DEFAULT_BUFFER_COUNT),
        )
    }

    /// Returns a [`BufferedStreamBuilder`] for configuring a new `BufferedStream`.
    pub fn builder(inner: S) -> BufferedStreamBuilder<S> {
        BufferedStreamBuilder {
            inner,
            settings: BufferSettings::default(),
        }
    }

    fn with_table(inner: S, table: ChunkTable) -> BufferedStream<S> {
        BufferedStream {
            inner,
            table,
            ptr: 0,
            size: 0,
            peek: None,
        }
    }

    /// Size of one chunk in bytes.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.table.buffer_size()
    }

    /// Number of chunk slots.
    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.table.buffer_count()
    }

    /// Indices of the chunks currently held in memory, in slot order.
    pub fn resident_chunks(&self) -> Vec<ChunkIndex> {
        self.table.resident_chunks().collect()
    }

    /// Whether `chunk` is currently held in memory.
    pub fn is_resident(&self, chunk: ChunkIndex) -> bool {
        self.table.find(chunk).is_some()
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Gets a mutable reference to the underlying stream.
    ///
    /// Changing the underlying stream behind the cache's back leaves resident chunks stale;
    /// call [`sync`](BufferedStream::sync) afterwards.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Flushes, then forgets every resident chunk and re-reads the size of the underlying
    /// stream.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.table.unassign_all();
        self.peek = None;
        self.size = self.inner.size()?;
        Ok(())
    }

    fn refresh_size(&mut self) -> Result<()> {
        self.size = self.size.max(self.inner.size()?);
        Ok(())
    }

    /// Writes a dirty slot back to the underlying stream.
    fn flush_slot(&mut self, slot: usize) -> Result<()> {
        let Slot::Resident {
            chunk,
            fill,
            dirty: true,
        } = self.table.slot(slot)
        else {
            return Ok(());
        };
        let offset = self.table.chunk_offset(chunk);
        self.inner.seek(offset)?;
        let written = self
            .inner
            .write(&self.table.memory(slot)[..fill], CompletionMode::All)?;
        if written < fill {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "underlying stream accepted a short write",
            )
            .into());
        }
        self.size = self.size.max(offset + fill as u64);
        self.table.set(
            slot,
            Slot::Resident {
                chunk,
                fill,
                dirty: false,
            },
        );
        self.table.touch(slot);
        #[cfg(feature = "tracing")]
        tracing::trace!(chunk, slot, fill, "flushed chunk");
        Ok(())
    }

    /// Returns the slot holding `chunk`, loading it into the least recently used slot on a miss.
    fn buffer_chunk(&mut self, chunk: ChunkIndex) -> Result<usize> {
        if let Some(slot) = self.table.find(chunk) {
            return Ok(slot);
        }

        let offset = self.table.chunk_offset(chunk);
        if offset + self.table.buffer_size() as u64 > self.size {
            self.refresh_size()?;
        }
        if offset > self.size {
            return Err(StreamError::OutOfRange {
                offset,
                size: self.size,
            });
        }

        let victim = self.table.victim();
        self.flush_slot(victim)?;
        if self.peek.is_some_and(|peek| peek.slot == victim) {
            self.peek = None;
        }
        #[cfg(feature = "tracing")]
        {
            if let Slot::Resident { chunk: evicted, .. } = self.table.slot(victim) {
                tracing::trace!(evicted, slot = victim, "evicting chunk");
            }
        }
        self.table.unassign(victim);

        let want = (self.size - offset).min(self.table.buffer_size() as u64) as usize;
        self.inner.seek(offset)?;
        let fill = self.inner.fill(&mut self.table.memory_mut(victim)[..want])?;
        self.table.set(
            victim,
            Slot::Resident {
                chunk,
                fill,
                dirty: false,
            },
        );
        self.table.touch(victim);
        #[cfg(feature = "tracing")]
        tracing::trace!(chunk, slot = victim, fill, "loaded chunk");
        Ok(victim)
    }

    /// Reads the part of a resident chunk that lies past its fill but inside the stream, and
    /// returns the new fill. Bytes below the fill, dirty or not, are left alone.
    fn top_up(&mut self, slot: usize) -> Result<usize> {
        let Slot::Resident { chunk, fill, dirty } = self.table.slot(slot) else {
            return Ok(0);
        };
        let buffer_size = self.table.buffer_size();
        let offset = self.table.chunk_offset(chunk);
        if fill == buffer_size {
            return Ok(fill);
        }
        if offset + buffer_size as u64 > self.size {
            self.refresh_size()?;
        }
        let want = self.size.saturating_sub(offset).min(buffer_size as u64) as usize;
        if want <= fill {
            return Ok(fill);
        }

        self.inner.seek(offset + fill as u64)?;
        let read = self
            .inner
            .fill(&mut self.table.memory_mut(slot)[fill..want])?;
        let fill = fill + read;
        self.table.set(slot, Slot::Resident { chunk, fill, dirty });
        #[cfg(feature = "tracing")]
        tracing::trace!(chunk, slot, fill, "topped up chunk");
        Ok(fill)
    }

    /// Calls `f` for every chunk touched by `[offset, offset + len)`, with the resident slot of
    /// that chunk if there is one. Nothing is loaded here; `f` decides what to do on a miss.
    fn iterate_chunks<F>(&mut self, offset: u64, len: usize, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Self, ChunkSpan) -> Result<ControlFlow<()>>,
    {
        for mut span in self.table.spans(offset, len) {
            span.slot = self.table.find(span.chunk);
            if f(self, span)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Peek window for position `pos` in `slot`, if `slot` holds bytes at `pos`.
    fn peek_at(&self, slot: usize, pos: u64) -> Option<Peek> {
        match self.table.slot(slot) {
            Slot::Resident { chunk, fill, .. } if chunk == self.table.chunk_of(pos) => {
                let start = self.table.intra(pos);
                (start < fill).then_some(Peek {
                    slot,
                    start,
                    end: fill,
                })
            }
            _ => None,
        }
    }
}

impl<S: Stream> Stream for BufferedStream<S> {
    fn size(&mut self) -> Result<u64> {
        self.refresh_size()?;
        Ok(self.size)
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.ptr
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if offset == self.ptr {
            return Ok(());
        }
        if let Some(peek) = &mut self.peek {
            if offset > self.ptr && offset - self.ptr < peek.len() as u64 {
                peek.start += (offset - self.ptr) as usize;
                self.ptr = offset;
                return Ok(());
            }
        }

        if offset > self.size {
            self.refresh_size()?;
            if offset > self.size {
                return Err(StreamError::OutOfRange {
                    offset,
                    size: self.size,
                });
            }
        }
        self.ptr = offset;
        self.peek = self
            .table
            .find(self.table.chunk_of(offset))
            .and_then(|slot| self.peek_at(slot, offset));
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8], mode: CompletionMode) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        if let Some(peek) = &mut self.peek {
            if dst.len() <= peek.len() {
                let n = dst.len();
                dst.copy_from_slice(&self.table.memory(peek.slot)[peek.start..peek.start + n]);
                peek.start += n;
                let slot = peek.slot;
                if peek.len() == 0 {
                    self.peek = None;
                }
                self.table.touch(slot);
                self.ptr += n as u64;
                return Ok(n);
            }
        }

        let start = self.ptr;
        let requested = dst.len();
        if start + requested as u64 > self.size {
            self.refresh_size()?;
        }
        let len = (self.size.saturating_sub(start)).min(requested as u64) as usize;

        let mut read = 0;
        let mut blocked = false;
        let mut last = None;
        self.iterate_chunks(start, len, |this, span| {
            let slot = match span.slot {
                Some(slot) => slot,
                None if mode.may_block(blocked, read > 0) => {
                    blocked = true;
                    this.buffer_chunk(span.chunk)?
                }
                None => return Ok(ControlFlow::Break(())),
            };
            let mut fill = this.table.fill(slot);
            if span.slot.is_some() && fill < span.intra_end && mode.may_block(blocked, read > 0) {
                blocked = true;
                fill = this.top_up(slot)?;
            }
            let end = span.intra_end.min(fill);
            if end <= span.intra_begin {
                return Ok(ControlFlow::Break(()));
            }
            let n = end - span.intra_begin;
            dst[span.request.start..span.request.start + n]
                .copy_from_slice(&this.table.memory(slot)[span.intra_begin..end]);
            this.table.touch(slot);
            read += n;
            last = Some(slot);
            Ok(if n < span.len() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })?;

        self.ptr += read as u64;
        self.peek = last.and_then(|slot| self.peek_at(slot, self.ptr));
        if mode == CompletionMode::All && read < requested {
            return Err(StreamError::PastEnd { requested, read });
        }
        Ok(read)
    }

    fn write(&mut self, src: &[u8], mode: CompletionMode) -> Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }

        let start = self.ptr;
        let mut written = 0;
        let mut blocked = false;
        let mut last = None;
        self.iterate_chunks(start, src.len(), |this, span| {
            let bytes = &src[span.request.clone()];
            let slot = match span.slot {
                Some(slot) => slot,
                None if !mode.may_block(blocked, written > 0) => {
                    return Ok(ControlFlow::Break(()));
                }
                None if mode == CompletionMode::All => {
                    blocked = true;
                    this.buffer_chunk(span.chunk)?
                }
                None => {
                    // Write-through: the chunk stays uncached.
                    blocked = true;
                    let offset = span.chunk_offset + span.intra_begin as u64;
                    this.inner.seek(offset)?;
                    let n = this.inner.write(bytes, mode)?;
                    written += n;
                    this.size = this.size.max(offset + n as u64);
                    return Ok(if n < bytes.len() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    });
                }
            };

            let mut fill = this.table.fill(slot);
            if span.intra_begin > fill {
                if span.slot.is_some() && !mode.may_block(blocked, written > 0) {
                    return Ok(ControlFlow::Break(()));
                }
                blocked = true;
                fill = this.top_up(slot)?;
            }
            let Slot::Resident { chunk, .. } = this.table.slot(slot) else {
                return Ok(ControlFlow::Break(()));
            };
            let memory = this.table.memory_mut(slot);
            if span.intra_begin > fill {
                memory[fill..span.intra_begin].fill(0);
            }
            memory[span.intra_begin..span.intra_end].copy_from_slice(bytes);
            this.table.set(
                slot,
                Slot::Resident {
                    chunk,
                    fill: fill.max(span.intra_end),
                    dirty: true,
                },
            );
            this.table.touch(slot);
            written += bytes.len();
            this.size = this.size.max(span.chunk_offset + span.intra_end as u64);
            last = Some(slot);
            Ok(ControlFlow::Continue(()))
        })?;

        self.ptr += written as u64;
        self.peek = last.and_then(|slot| self.peek_at(slot, self.ptr));
        Ok(written)
    }

    fn flush(&mut self) -> Result<()> {
        for slot in 0..self.table.buffer_count() {
            self.flush_slot(slot)?;
        }
        self.inner.flush()
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.inner.truncate(size)?;
        for slot in 0..self.table.buffer_count() {
            if let Slot::Resident { chunk, fill, dirty } = self.table.slot(slot) {
                let offset = self.table.chunk_offset(chunk);
                if offset >= size {
                    self.table.unassign(slot);
                } else if offset + fill as u64 > size {
                    let fill = (size - offset) as usize;
                    self.table.set(slot, Slot::Resident { chunk, fill, dirty });
                }
            }
        }
        self.size = size;
        self.ptr = self.ptr.min(size);
        self.peek = None;
        Ok(())
    }
}

impl<S: Stream> Drop for BufferedStream<S> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            report_teardown_error("failed to flush buffered stream on drop", &err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStream;
    use crate::stream::StreamHandle;

    fn counting(len: usize) -> Vec<u8> {
        (0..len).map(|n| n as u8).collect()
    }

    fn buffered(data: Vec<u8>, size: usize, count: usize) -> BufferedStream<MemoryStream> {
        BufferedStream::builder(MemoryStream::from(data))
            .with_buffer_size(size)
            .with_buffer_count(count)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_rounds_buffer_size_up() {
        let stream = buffered(Vec::new(), 17, 3);
        assert_eq!(stream.buffer_size(), 32);
        assert_eq!(stream.buffer_count(), 3);
    }

    #[test]
    fn builder_rejects_zero_sizes() {
        let err = BufferedStream::builder(MemoryStream::new())
            .with_buffer_size(0)
            .build()
            .err();
        assert_eq!(err, Some(SettingsError::ZeroBufferSize));
        let err = BufferedStream::builder(MemoryStream::new())
            .with_buffer_count(0)
            .build()
            .err();
        assert_eq!(err, Some(SettingsError::ZeroBufferCount));
    }

    #[test]
    fn builder_rejects_oversized_arena() {
        let err = BufferedStream::builder(MemoryStream::new())
            .with_buffer_size(usize::MAX / 2)
            .with_buffer_count(4)
            .build()
            .err();
        assert!(matches!(err, Some(SettingsError::TooLarge { .. })));
    }

    #[test]
    fn sequential_single_byte_reads() {
        let mut stream = buffered(counting(256), 16, 4);
        let mut byte = [0u8; 1];
        for expected in 0..128u8 {
            assert_eq!(stream.read(&mut byte, CompletionMode::All).unwrap(), 1);
            assert_eq!(byte[0], expected);
        }
        assert_eq!(stream.tell(), 128);
    }

    #[test]
    fn far_seek_keeps_first_chunk_resident() {
        let mut stream = buffered(counting(256), 16, 4);
        let mut byte = [0u8; 1];
        stream.read(&mut byte, CompletionMode::All).unwrap();
        assert_eq!(byte[0], 0);

        stream.seek(126).unwrap();
        stream.read(&mut byte, CompletionMode::All).unwrap();
        assert_eq!(byte[0], 126);

        assert!(stream.is_resident(0));
        assert!(stream.is_resident(7));
        assert_eq!(stream.resident_chunks().len(), 2);
    }

    #[test]
    fn cross_chunk_read() {
        let mut stream = buffered(counting(64), 16, 2);
        stream.seek(10).unwrap();
        let mut buf = [0u8; 30];
        assert_eq!(stream.read(&mut buf, CompletionMode::All).unwrap(), 30);
        assert_eq!(buf.to_vec(), counting(40)[10..].to_vec());
        assert_eq!(stream.tell(), 40);
    }

    #[test]
    fn least_recently_used_chunk_is_evicted() {
        let mut stream = buffered(counting(256), 16, 4);
        let mut byte = [0u8; 1];
        for chunk in 0..5u64 {
            stream.seek(chunk * 16).unwrap();
            stream.read(&mut byte, CompletionMode::All).unwrap();
        }
        assert!(!stream.is_resident(0));
        for chunk in 1..5 {
            assert!(stream.is_resident(chunk));
        }
    }

    #[test]
    fn retouched_chunk_survives_eviction() {
        let mut stream = buffered(counting(256), 16, 2);
        let mut byte = [0u8; 1];
        stream.seek(0).unwrap();
        stream.read(&mut byte, CompletionMode::All).unwrap();
        stream.seek(16).unwrap();
        stream.read(&mut byte, CompletionMode::All).unwrap();
        stream.seek(1).unwrap();
        stream.read(&mut byte, CompletionMode::All).unwrap();
        stream.seek(32).unwrap();
        stream.read(&mut byte, CompletionMode::All).unwrap();
        assert!(stream.is_resident(0));
        assert!(!stream.is_resident(1));
    }

    #[test]
    fn dirty_chunk_is_written_back_on_eviction() {
        let backing = MemoryStream::from(vec![0u8; 64]).shared();
        let mut stream = BufferedStream::builder(backing.clone())
            .with_buffer_size(16)
            .with_buffer_count(1)
            .build()
            .unwrap();

        stream.seek(20).unwrap();
        stream.write(&[7, 8, 9], CompletionMode::All).unwrap();
        assert_eq!(backing.borrow().get_ref()[20..23], [0, 0, 0]);

        stream.seek(40).unwrap();
        let mut byte = [0u8; 1];
        stream.read(&mut byte, CompletionMode::All).unwrap();
        assert_eq!(backing.borrow().get_ref()[20..23], [7, 8, 9]);
        assert_eq!(backing.borrow().get_ref()[16..20], [0, 0, 0, 0]);
        assert!(!stream.is_resident(1));
    }

    #[test]
    fn writes_extend_the_stream() {
        let backing = MemoryStream::new().shared();
        let mut stream = BufferedStream::builder(backing.clone())
            .with_buffer_size(8)
            .with_buffer_count(2)
            .build()
            .unwrap();
        let data = counting(20);
        assert_eq!(stream.write(&data, CompletionMode::All).unwrap(), 20);
        assert_eq!(stream.size().unwrap(), 20);

        stream.seek(0).unwrap();
        let mut buf = [0u8; 20];
        stream.read(&mut buf, CompletionMode::All).unwrap();
        assert_eq!(buf.to_vec(), data);

        stream.flush().unwrap();
        assert_eq!(backing.borrow().get_ref(), &data);
    }

    #[test]
    fn reading_past_end_fails_in_all_mode() {
        let mut stream = buffered(counting(10), 16, 2);
        stream.seek(6).unwrap();
        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf, CompletionMode::All).unwrap_err();
        assert!(matches!(
            err,
            StreamError::PastEnd {
                requested: 8,
                read: 4
            }
        ));
        assert_eq!(&buf[..4], &[6, 7, 8, 9]);
        assert_eq!(stream.tell(), 10);
    }

    #[test]
    fn reading_past_end_is_short_in_once_mode() {
        let mut stream = buffered(counting(10), 16, 2);
        let mut buf = [0u8; 32];
        assert_eq!(stream.read(&mut buf, CompletionMode::Once).unwrap(), 10);
        assert_eq!(stream.read(&mut buf, CompletionMode::Once).unwrap(), 0);
    }

    #[test]
    fn immediate_read_never_loads() {
        let mut stream = buffered(counting(64), 16, 4);
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf, CompletionMode::Immediate).unwrap(), 0);
        assert!(stream.resident_chunks().is_empty());

        stream.read(&mut buf, CompletionMode::All).unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(stream.read(&mut buf, CompletionMode::Immediate).unwrap(), 12);
        assert_eq!(stream.resident_chunks(), vec![0]);
    }

    #[test]
    fn once_read_loads_at_most_one_chunk() {
        let mut stream = buffered(counting(64), 16, 4);
        let mut buf = [0u8; 40];
        assert_eq!(stream.read(&mut buf, CompletionMode::Once).unwrap(), 16);
        assert_eq!(stream.resident_chunks(), vec![0]);
    }

    #[test]
    fn once_write_goes_through_when_chunk_is_not_resident() {
        let backing = MemoryStream::from(vec![0u8; 32]).shared();
        let mut stream = BufferedStream::builder(backing.clone())
            .with_buffer_size(16)
            .with_buffer_count(2)
            .build()
            .unwrap();
        stream.seek(4).unwrap();
        assert_eq!(stream.write(&[1, 2], CompletionMode::Once).unwrap(), 2);
        assert!(stream.resident_chunks().is_empty());
        assert_eq!(backing.borrow().get_ref()[4..6], [1, 2]);
    }

    #[test]
    fn immediate_write_stops_at_missing_chunk() {
        let mut stream = buffered(vec![0u8; 32], 16, 2);
        assert_eq!(stream.write(&[1, 2], CompletionMode::Immediate).unwrap(), 0);
        assert_eq!(stream.tell(), 0);
    }

    #[test]
    fn seek_beyond_end_is_out_of_range() {
        let mut stream = buffered(counting(10), 16, 2);
        assert!(stream.seek(10).is_ok());
        let err = stream.seek(11).unwrap_err();
        assert!(matches!(
            err,
            StreamError::OutOfRange {
                offset: 11,
                size: 10
            }
        ));
    }

    #[test]
    fn seek_within_peek_shrinks_it() {
        let mut stream = buffered(counting(64), 16, 2);
        let mut byte = [0u8; 1];
        stream.read(&mut byte, CompletionMode::All).unwrap();
        assert_eq!(
            stream.peek,
            Some(Peek {
                slot: 0,
                start: 1,
                end: 16
            })
        );
        stream.seek(5).unwrap();
        assert_eq!(stream.peek.map(|p| p.start), Some(5));
        stream.read(&mut byte, CompletionMode::Immediate).unwrap();
        assert_eq!(byte[0], 5);
    }

    #[test]
    fn seek_backwards_rederives_peek_from_resident_chunk() {
        let mut stream = buffered(counting(64), 16, 2);
        let mut buf = [0u8; 8];
        stream.seek(8).unwrap();
        stream.read(&mut buf, CompletionMode::All).unwrap();
        assert_eq!(stream.peek, None);

        stream.seek(2).unwrap();
        assert_eq!(stream.peek.map(|p| (p.start, p.end)), Some((2, 16)));
        stream.seek(40).unwrap();
        assert_eq!(stream.peek, None);
    }

    #[test]
    fn eviction_invalidates_peek() {
        let mut stream = buffered(counting(64), 16, 1);
        let mut byte = [0u8; 1];
        stream.read(&mut byte, CompletionMode::All).unwrap();
        assert!(stream.peek.is_some());
        stream.buffer_chunk(2).unwrap();
        assert_eq!(stream.peek, None);
    }

    #[test]
    fn sync_forgets_resident_chunks() {
        let mut stream = buffered(counting(32), 16, 2);
        let mut byte = [0u8; 1];
        stream.read(&mut byte, CompletionMode::All).unwrap();
        stream.get_mut().get_mut()[1] = 99;

        stream.read(&mut byte, CompletionMode::All).unwrap();
        assert_eq!(byte[0], 1);

        stream.sync().unwrap();
        assert!(stream.resident_chunks().is_empty());
        stream.seek(1).unwrap();
        stream.read(&mut byte, CompletionMode::All).unwrap();
        assert_eq!(byte[0], 99);
    }

    #[test]
    fn truncate_discards_chunks_past_the_end() {
        let mut stream = buffered(counting(64), 16, 4);
        let mut buf = [0u8; 64];
        stream.read(&mut buf, CompletionMode::All).unwrap();
        stream.truncate(20).unwrap();
        assert_eq!(stream.size().unwrap(), 20);
        assert_eq!(stream.tell(), 20);
        assert_eq!(stream.resident_chunks(), vec![0, 1]);

        stream.seek(16).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf, CompletionMode::Once).unwrap(), 4);
        assert_eq!(&buf[..4], &[16, 17, 18, 19]);
    }

    #[test]
    fn first_write_loads_the_whole_chunk() {
        let mut stream = buffered(counting(64), 16, 4);
        stream.write(&[9, 9], CompletionMode::All).unwrap();
        stream.seek(0).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf, CompletionMode::All).unwrap(), 16);
        assert_eq!(buf[..2], [9, 9]);
        assert_eq!(buf[2..], counting(16)[2..]);
    }

    #[test]
    fn write_past_a_gap_keeps_the_bytes_in_between() {
        let backing = MemoryStream::from(counting(64)).shared();
        let mut stream = BufferedStream::builder(backing.clone())
            .with_buffer_size(16)
            .with_buffer_count(4)
            .build()
            .unwrap();
        stream.write(&[9, 9], CompletionMode::All).unwrap();
        assert_eq!(stream.size().unwrap(), 64);
        stream.seek(10).unwrap();
        stream.write(&[7], CompletionMode::All).unwrap();
        stream.flush().unwrap();
        assert_eq!(
            backing.borrow().get_ref()[..12],
            [9, 9, 2, 3, 4, 5, 6, 7, 8, 9, 7, 11]
        );
    }

    #[test]
    fn short_resident_chunk_is_topped_up() {
        let mut stream = buffered(counting(10), 16, 2);
        let mut buf = [0u8; 10];
        stream.read(&mut buf, CompletionMode::All).unwrap();
        stream.inner.get_mut().extend_from_slice(&[42; 4]);
        let mut tail = [0u8; 4];
        stream.read(&mut tail, CompletionMode::All).unwrap();
        assert_eq!(tail, [42; 4]);
        assert_eq!(stream.table.fill(0), 14);
    }

    #[test]
    fn extended_stream_reads_zeros_past_the_old_end() {
        let mut stream = buffered(counting(10), 16, 2);
        let mut buf = [0u8; 10];
        stream.read(&mut buf, CompletionMode::All).unwrap();
        stream.truncate(20).unwrap();

        stream.seek(12).unwrap();
        let mut buf = [0xffu8; 4];
        assert_eq!(stream.read(&mut buf, CompletionMode::All).unwrap(), 4);
        assert_eq!(buf, [0; 4]);

        stream.seek(8).unwrap();
        let mut buf = [0xffu8; 12];
        stream.read(&mut buf, CompletionMode::All).unwrap();
        assert_eq!(buf[..2], [8, 9]);
        assert!(buf[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn drop_flushes_dirty_chunks() {
        let backing: StreamHandle<MemoryStream> = MemoryStream::new().shared();
        {
            let mut stream = BufferedStream::builder(backing.clone())
                .with_buffer_size(16)
                .build()
                .unwrap();
            stream.write(b"hello", CompletionMode::All).unwrap();
        }
        assert_eq!(backing.borrow().get_ref(), b"hello");
    }
}
