//! In-memory stream.

use crate::stream::{CompletionMode, Result, Stream, StreamError};

/// A [`Stream`] over a growable byte vector.
///
/// Behaves like [`std::io::Cursor`]: the position may be moved past the end, and writing there
/// fills the gap with zeros. Nothing ever blocks, so all completion modes transfer as much as
/// is available.
///
/// # Example
///
/// ```
/// use stream_cache::{CompletionMode, MemoryStream, Stream};
///
/// let mut stream = MemoryStream::new();
/// stream.seek(2)?;
/// stream.write(b"hi", CompletionMode::All)?;
/// assert_eq!(stream.get_ref(), b"\0\0hi");
/// # Ok::<(), stream_cache::StreamError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStream {
    data: Vec<u8>,
    pos: u64,
}

impl MemoryStream {
    /// Creates an empty stream.
    pub fn new() -> MemoryStream {
        MemoryStream::default()
    }

    /// Gets a reference to the underlying bytes.
    pub fn get_ref(&self) -> &Vec<u8> {
        &self.data
    }

    /// Gets a mutable reference to the underlying bytes.
    pub fn get_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Consumes the stream, returning the underlying bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn remaining(&self) -> &[u8] {
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX);
        self.data.get(start..).unwrap_or_default()
    }
}

impl From<Vec<u8>> for MemoryStream {
    fn from(data: Vec<u8>) -> Self {
        MemoryStream { data, pos: 0 }
    }
}

impl From<&[u8]> for MemoryStream {
    fn from(data: &[u8]) -> Self {
        MemoryStream::from(data.to_vec())
    }
}

impl Stream for MemoryStream {
    #[inline]
    fn size(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.pos
    }

    #[inline]
    fn seek(&mut self, offset: u64) -> Result<()> {
        self.pos = offset;
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8], mode: CompletionMode) -> Result<usize> {
        let remaining = self.remaining();
        let read = remaining.len().min(dst.len());
        dst[..read].copy_from_slice(&remaining[..read]);
        self.pos += read as u64;
        if mode == CompletionMode::All && read < dst.len() {
            return Err(StreamError::PastEnd {
                requested: dst.len(),
                read,
            });
        }
        Ok(read)
    }

    fn write(&mut self, src: &[u8], _mode: CompletionMode) -> Result<usize> {
        let start = usize::try_from(self.pos)
            .map_err(|_| StreamError::OutOfRange {
                offset: self.pos,
                size: self.data.len() as u64,
            })?;
        let end = start + src.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(src);
        self.pos = end as u64;
        Ok(src.len())
    }

    #[inline]
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        let len = usize::try_from(size).map_err(|_| StreamError::OutOfRange {
            offset: size,
            size: self.data.len() as u64,
        })?;
        self.data.resize(len, 0);
        Ok(())
    }
}
