//! Progressive disk-backed cache for sequential sources.
//!
//! A [`CachedFileStream`] copies bytes from its source into a local file as they are needed,
//! which turns a forward-only source into a seekable stream. Bytes are pulled from the source
//! at most once: seeking backwards reads from the file, seeking forwards stages everything up
//! to the destination first.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::{assert_error_traits, report_teardown_error};
use crate::constants::DEFAULT_STAGING_SIZE;

use super::{CompletionMode, Result, Stream, StreamError};

/// Error that can occur when opening the cache file of a [`CachedFileStream`].
#[derive(Debug, thiserror::Error, Clone)]
pub enum CacheFileError {
    /// The anonymous temporary file could not be created.
    #[error("failed to create temporary cache file")]
    Create(#[source] Arc<io::Error>),
    /// The cache file at the requested path could not be opened.
    #[error("failed to open cache file {}", path.display())]
    Open {
        /// Requested location of the cache file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },
}
assert_error_traits!(CacheFileError);

impl From<CacheFileError> for StreamError {
    fn from(err: CacheFileError) -> Self {
        match err {
            CacheFileError::Create(source) | CacheFileError::Open { source, .. } => {
                StreamError::Io(source)
            }
        }
    }
}

/// Cached file stream configuration.
#[derive(Clone, Debug)]
pub struct CacheSettings {
    /// Location of the cache file. An anonymous temporary file is used when `None`.
    pub(crate) path: Option<PathBuf>,

    /// Whether callers may write to the stream.
    pub(crate) writable: bool,

    /// Whether the cache file is removed on close. Always true for temporary files.
    pub(crate) delete_on_close: bool,

    /// Largest number of bytes pulled from the source in one go.
    pub(crate) staging_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: None,
            writable: false,
            delete_on_close: false,
            staging_size: DEFAULT_STAGING_SIZE,
        }
    }
}

/// Builder for configuring and opening a [`CachedFileStream`].
///
/// # Example
///
/// ```
/// use stream_cache::{CachedFileStream, CompletionMode, MemoryStream, Stream};
///
/// let dir = tempfile::tempdir()?;
/// let mut stream = CachedFileStream::builder(MemoryStream::from(vec![1, 2, 3, 4]))
///     .with_path(dir.path().join("cache.bin"))
///     .with_delete_on_close(true)
///     .open()?;
///
/// let mut buf = [0u8; 2];
/// stream.read(&mut buf, CompletionMode::All)?;
/// assert_eq!(stream.staged_len(), 2);
/// stream.close()?;
/// assert!(!dir.path().join("cache.bin").exists());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct CachedFileStreamBuilder<S> {
    source: S,
    settings: CacheSettings,
}

impl<S: Stream> CachedFileStreamBuilder<S> {
    /// Keeps the cache file at `path` instead of an anonymous temporary file.
    ///
    /// An existing file at `path` is truncated.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.path = Some(path.into());
        self
    }

    /// Allows writes. Written bytes only ever reach the cache file, never the source.
    pub fn with_writable(mut self, writable: bool) -> Self {
        self.settings.writable = writable;
        self
    }

    /// Removes the file at the configured path when the stream is closed.
    pub fn with_delete_on_close(mut self, delete_on_close: bool) -> Self {
        self.settings.delete_on_close = delete_on_close;
        self
    }

    /// Sets the largest number of bytes pulled from the source in one go.
    pub fn with_staging_size(mut self, staging_size: usize) -> Self {
        self.settings.staging_size = staging_size;
        self
    }

    /// Replaces all settings at once.
    pub fn with_settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Creates the cache file and the stream. Nothing is pulled from the source yet.
    pub fn open(self) -> Result<CachedFileStream<S>, CacheFileError> {
        let CacheSettings {
            path,
            writable,
            delete_on_close,
            staging_size,
        } = self.settings;

        let (file, path, delete_on_close) = match path {
            Some(path) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .map_err(|err| CacheFileError::Open {
                        path: path.clone(),
                        source: Arc::new(err),
                    })?;
                (file, path, delete_on_close)
            }
            None => {
                let (file, path) = tempfile::Builder::new()
                    .prefix("stream-cache-")
                    .tempfile()
                    .and_then(|file| file.keep().map_err(io::Error::from))
                    .map_err(|err| CacheFileError::Create(Arc::new(err)))?;
                (file, path, true)
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(path = %path.display(), writable, "opened cache file");

        let start = self.source.tell();
        Ok(CachedFileStream {
            source: self.source,
            file: Some(file),
            path,
            start,
            pos: 0,
            read_ptr: 0,
            file_len: 0,
            detached: false,
            writable,
            delete_on_close,
            staging: vec![0; staging_size.max(1)].into_boxed_slice(),
        })
    }
}

/// A seekable stream over a sequential source, backed by a local cache file.
///
/// This `struct` is created by the [`cached`](Stream::cached) method on [`Stream`] or through
/// [`CachedFileStream::builder`].
///
/// The source is read from its current position onwards, which becomes offset `0` of this
/// stream.
///
/// # Writes
///
/// Writes only go to the cache file. Before writing, the source is staged up to the end of the
/// written range as far as the completion mode allows, so staged bytes never replace written
/// ones. When staging stops short of the written range (the source has not produced those bytes
/// yet), a later pull overwrites what was written there.
///
/// # Closing
///
/// Call [`close`](CachedFileStream::close) to observe errors; dropping the stream closes it and
/// only logs them.
pub struct CachedFileStream<S: Stream> {
    source: S,
    file: Option<File>,
    path: PathBuf,
    /// Position of the source when the stream was opened.
    start: u64,
    pos: u64,
    /// Offset up to which the source has been copied into the file. Never decreases.
    read_ptr: u64,
    /// Length of the cache file.
    file_len: u64,
    /// Set once a truncation cut into staged bytes or pulled bytes could not be stored; nothing
    /// more is pulled afterwards.
    detached: bool,
    writable: bool,
    delete_on_close: bool,
    staging: Box<[u8]>,
}

impl<S: Stream> CachedFileStream<S> {
    /// Returns a [`CachedFileStreamBuilder`] for configuring a new `CachedFileStream`.
    pub fn builder(source: S) -> CachedFileStreamBuilder<S> {
        CachedFileStreamBuilder {
            source,
            settings: CacheSettings::default(),
        }
    }

    /// Number of source bytes copied into the cache file so far.
    #[inline]
    pub fn staged_len(&self) -> u64 {
        self.read_ptr
    }

    /// Location of the cache file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`close`](CachedFileStream::close) has been called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Gets a reference to the source.
    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Flushes and closes the cache file, removing it if configured to.
    ///
    /// Failing to remove the file is logged rather than returned. Closing twice is a no-op;
    /// every other operation on a closed stream fails with [`StreamError::Closed`].
    pub fn close(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let flushed = file.flush();
        drop(file);
        if self.delete_on_close {
            match fs::remove_file(&self.path) {
                Ok(()) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(path = %self.path.display(), "removed cache file");
                }
                Err(err) => report_teardown_error("failed to remove cache file", &err),
            }
        }
        flushed.map_err(StreamError::from)
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(StreamError::Closed)
    }

    /// Copies source bytes into the file until `target` is staged, the source runs dry or
    /// `mode` forbids blocking any further.
    fn read_up_to(&mut self, target: u64, mode: CompletionMode) -> Result<()> {
        if target <= self.read_ptr || self.detached {
            return Ok(());
        }
        let CachedFileStream {
            source,
            file,
            read_ptr,
            file_len,
            detached,
            staging,
            ..
        } = self;
        let file = file.as_mut().ok_or(StreamError::Closed)?;
        file.seek(SeekFrom::Start(*read_ptr))?;

        let mut blocked = false;
        while *read_ptr < target {
            let want = (target - *read_ptr).min(staging.len() as u64) as usize;
            let ready = source.least_size()?;
            let pulled = if ready > 0 {
                let len = ready.min(want as u64) as usize;
                source.read(&mut staging[..len], CompletionMode::Once)?
            } else if mode.may_block(blocked, false) {
                blocked = true;
                source.read(&mut staging[..want], CompletionMode::Once)?
            } else {
                break;
            };
            if pulled == 0 {
                break;
            }
            if let Err(err) = file.write_all(&staging[..pulled]) {
                // The pulled bytes are gone; staging past them would shift the content.
                *detached = true;
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    staged = *read_ptr,
                    pulled,
                    "failed to stage source bytes, detaching"
                );
                return Err(err.into());
            }
            *read_ptr += pulled as u64;
            *file_len = (*file_len).max(*read_ptr);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(up_to = target, staged = *read_ptr, "staged source bytes");
        Ok(())
    }
}

impl<S: Stream> Stream for CachedFileStream<S> {
    /// The larger of the cache file length, the staged length plus what the source has ready,
    /// and the size the source declares past its position at open.
    fn size(&mut self) -> Result<u64> {
        self.file()?;
        if self.detached {
            return Ok(self.file_len);
        }
        let pending = self.source.least_size()?;
        let declared = self.source.size()?;
        Ok(self
            .file_len
            .max(self.read_ptr + pending)
            .max(declared.saturating_sub(self.start)))
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.file()?;
        if offset == self.pos {
            return Ok(());
        }
        self.read_up_to(offset, CompletionMode::All)?;
        if offset > self.file_len {
            return Err(StreamError::OutOfRange {
                offset,
                size: self.file_len,
            });
        }
        self.pos = offset;
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8], mode: CompletionMode) -> Result<usize> {
        self.file()?;
        if dst.is_empty() {
            return Ok(0);
        }
        let requested = dst.len();
        self.read_up_to(self.pos + requested as u64, mode)?;

        let pos = self.pos;
        let read = self.file_len.saturating_sub(pos).min(requested as u64) as usize;
        if read > 0 {
            let file = self.file()?;
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut dst[..read])?;
            self.pos += read as u64;
        }
        if mode == CompletionMode::All && read < requested {
            return Err(StreamError::PastEnd { requested, read });
        }
        Ok(read)
    }

    fn write(&mut self, src: &[u8], mode: CompletionMode) -> Result<usize> {
        self.file()?;
        if !self.writable {
            return Err(StreamError::ReadOnly);
        }
        if src.is_empty() {
            return Ok(0);
        }
        self.read_up_to(self.pos + src.len() as u64, mode)?;

        let pos = self.pos;
        let file = self.file()?;
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(src)?;
        self.pos += src.len() as u64;
        self.file_len = self.file_len.max(self.pos);
        Ok(src.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.file()?.flush()?;
        Ok(())
    }

    /// Cuts or extends the cache file. The source is left alone.
    ///
    /// Cutting into bytes that were already staged detaches the stream from its source: the
    /// file alone defines the content from then on.
    fn truncate(&mut self, size: u64) -> Result<()> {
        self.file()?;
        if !self.writable {
            return Err(StreamError::ReadOnly);
        }
        self.file()?.set_len(size)?;
        self.file_len = size;
        if size < self.read_ptr {
            self.detached = true;
        }
        self.pos = self.pos.min(size);
        Ok(())
    }
}

impl<S: Stream> Drop for CachedFileStream<S> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            report_teardown_error("failed to close cache file on drop", &err);
        }
    }
}
