#![allow(dead_code)]
//! Shared fixtures, kept in a folder so they are not run as an integration test of their own.

use std::cell::Cell;
use std::rc::Rc;

use stream_cache::{CompletionMode, MemoryStream, Result, Stream, StreamError};

/// Bytes `0, 1, 2, ...` wrapping at 256.
pub fn counting(len: usize) -> Vec<u8> {
    (0..len).map(|n| n as u8).collect()
}

/// Calls observed by a [`Probe`].
#[derive(Debug, Default)]
pub struct IoCounts {
    pub reads: Cell<usize>,
    pub writes: Cell<usize>,
    pub seeks: Cell<usize>,
    pub flushes: Cell<usize>,
    pub bytes_read: Cell<u64>,
    pub bytes_written: Cell<u64>,
    /// Makes every following write fail.
    pub fail_writes: Cell<bool>,
}

impl IoCounts {
    /// Number of read, write and seek calls.
    pub fn io_calls(&self) -> usize {
        self.reads.get() + self.writes.get() + self.seeks.get()
    }
}

fn bump(cell: &Cell<usize>) {
    cell.set(cell.get() + 1);
}

/// A random-access stream that counts the calls made to it.
#[derive(Debug)]
pub struct Probe<S = MemoryStream> {
    inner: S,
    counts: Rc<IoCounts>,
}

impl Probe<MemoryStream> {
    pub fn memory(data: Vec<u8>) -> Self {
        Probe::new(MemoryStream::from(data))
    }
}

impl<S: Stream> Probe<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            counts: Rc::default(),
        }
    }

    pub fn counts(&self) -> Rc<IoCounts> {
        Rc::clone(&self.counts)
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: Stream> Stream for Probe<S> {
    fn size(&mut self) -> Result<u64> {
        self.inner.size()
    }

    fn least_size(&mut self) -> Result<u64> {
        self.inner.least_size()
    }

    fn tell(&self) -> u64 {
        self.inner.tell()
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        bump(&self.counts.seeks);
        self.inner.seek(offset)
    }

    fn read(&mut self, dst: &mut [u8], mode: CompletionMode) -> Result<usize> {
        bump(&self.counts.reads);
        let result = self.inner.read(dst, mode);
        if let Ok(read) | Err(StreamError::PastEnd { read, .. }) = result {
            self.counts
                .bytes_read
                .set(self.counts.bytes_read.get() + read as u64);
        }
        result
    }

    fn write(&mut self, src: &[u8], mode: CompletionMode) -> Result<usize> {
        bump(&self.counts.writes);
        if self.counts.fail_writes.get() {
            return Err(std::io::Error::other("injected write failure").into());
        }
        let written = self.inner.write(src, mode)?;
        self.counts
            .bytes_written
            .set(self.counts.bytes_written.get() + written as u64);
        Ok(written)
    }

    fn flush(&mut self) -> Result<()> {
        bump(&self.counts.flushes);
        self.inner.flush()
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        self.inner.truncate(size)
    }
}

/// A sequential source that only has a few bytes ready at a time.
///
/// `ready` bytes can be read without blocking. Once they are used up, a blocking read makes the
/// next `burst` bytes ready.
#[derive(Debug)]
pub struct Trickle {
    data: Vec<u8>,
    pos: usize,
    ready: usize,
    burst: usize,
    blocking_reads: Rc<Cell<usize>>,
}

impl Trickle {
    pub fn new(data: Vec<u8>, burst: usize) -> Self {
        assert!(burst > 0);
        Self {
            data,
            pos: 0,
            ready: 0,
            burst,
            blocking_reads: Rc::default(),
        }
    }

    /// Makes the first `ready` bytes available without blocking.
    pub fn with_ready(mut self, ready: usize) -> Self {
        self.ready = ready.min(self.data.len());
        self
    }

    pub fn blocking_reads(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.blocking_reads)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl Stream for Trickle {
    /// Only what has been produced so far is known.
    fn size(&mut self) -> Result<u64> {
        Ok((self.pos + self.ready) as u64)
    }

    fn least_size(&mut self) -> Result<u64> {
        Ok(self.ready as u64)
    }

    fn tell(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if offset == self.pos as u64 {
            Ok(())
        } else {
            Err(StreamError::Unsupported("seek"))
        }
    }

    fn read(&mut self, dst: &mut [u8], mode: CompletionMode) -> Result<usize> {
        let mut read = 0;
        let mut blocked = false;
        while read < dst.len() && self.remaining() > 0 {
            if self.ready == 0 {
                let may_block = match mode {
                    CompletionMode::Immediate => false,
                    CompletionMode::Once => !blocked && read == 0,
                    CompletionMode::All => true,
                };
                if !may_block {
                    break;
                }
                blocked = true;
                self.blocking_reads.set(self.blocking_reads.get() + 1);
                self.ready = self.burst.min(self.remaining());
            }
            let n = self.ready.min(dst.len() - read);
            dst[read..read + n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            self.ready -= n;
            read += n;
        }
        if mode == CompletionMode::All && read < dst.len() {
            return Err(StreamError::PastEnd {
                requested: dst.len(),
                read,
            });
        }
        Ok(read)
    }

    fn write(&mut self, _src: &[u8], _mode: CompletionMode) -> Result<usize> {
        Err(StreamError::Unsupported("write"))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
