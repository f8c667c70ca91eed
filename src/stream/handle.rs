//! Shared ownership of a stream within one thread.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use super::{CompletionMode, Result, Stream};

/// A cheaply clonable handle to a stream shared by several owners.
///
/// All clones refer to the same stream, including its position. The stream is dropped, and a
/// cache engine below it flushed or closed, when the last handle goes away.
///
/// This `struct` is created by the [`shared`](Stream::shared) method on [`Stream`].
///
/// # Panics
///
/// Operations panic if the stream is already borrowed through [`borrow_mut`], the same way
/// [`RefCell`] does. Only one logical task may use the stream at a time.
///
/// [`borrow_mut`]: StreamHandle::borrow_mut
pub struct StreamHandle<S> {
    inner: Rc<RefCell<S>>,
}

impl<S> StreamHandle<S> {
    /// Wraps `stream` in a new handle.
    pub fn new(stream: S) -> StreamHandle<S> {
        StreamHandle {
            inner: Rc::new(RefCell::new(stream)),
        }
    }

    /// Number of handles sharing the stream, this one included.
    #[inline]
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Whether both handles share the same stream.
    #[inline]
    pub fn ptr_eq(&self, other: &StreamHandle<S>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Immutably borrows the shared stream.
    pub fn borrow(&self) -> Ref<'_, S> {
        self.inner.borrow()
    }

    /// Mutably borrows the shared stream.
    pub fn borrow_mut(&self) -> RefMut<'_, S> {
        self.inner.borrow_mut()
    }

    /// Returns the stream if this is the last handle, or the handle itself otherwise.
    pub fn try_unwrap(self) -> std::result::Result<S, StreamHandle<S>> {
        Rc::try_unwrap(self.inner)
            .map(RefCell::into_inner)
            .map_err(|inner| StreamHandle { inner })
    }
}

impl<S> Clone for StreamHandle<S> {
    fn clone(&self) -> Self {
        StreamHandle {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for StreamHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("handle_count", &self.handle_count())
            .finish_non_exhaustive()
    }
}

impl<S: Stream> Stream for StreamHandle<S> {
    #[inline]
    fn size(&mut self) -> Result<u64> {
        self.inner.borrow_mut().size()
    }

    #[inline]
    fn least_size(&mut self) -> Result<u64> {
        self.inner.borrow_mut().least_size()
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.inner.borrow().tell()
    }

    #[inline]
    fn seek(&mut self, offset: u64) -> Result<()> {
        self.inner.borrow_mut().seek(offset)
    }

    #[inline]
    fn read(&mut self, dst: &mut [u8], mode: CompletionMode) -> Result<usize> {
        self.inner.borrow_mut().read(dst, mode)
    }

    #[inline]
    fn write(&mut self, src: &[u8], mode: CompletionMode) -> Result<usize> {
        self.inner.borrow_mut().write(src, mode)
    }

    #[inline]
    fn flush(&mut self) -> Result<()> {
        self.inner.borrow_mut().flush()
    }

    #[inline]
    fn truncate(&mut self, size: u64) -> Result<()> {
        self.inner.borrow_mut().truncate(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStream;
    use crate::stream::BufferedStream;

    #[test]
    fn clones_share_position() {
        let mut first = MemoryStream::from(vec![1u8, 2, 3, 4]).shared();
        let mut second = first.clone();
        assert!(first.ptr_eq(&second));
        assert_eq!(first.handle_count(), 2);

        let mut byte = [0u8; 1];
        first.read(&mut byte, CompletionMode::All).unwrap();
        assert_eq!(second.tell(), 1);
        second.read(&mut byte, CompletionMode::All).unwrap();
        assert_eq!(byte[0], 2);
    }

    #[test]
    fn separate_handles_are_not_equal() {
        let first = MemoryStream::new().shared();
        let second = MemoryStream::new().shared();
        assert!(!first.ptr_eq(&second));
    }

    #[test]
    fn try_unwrap_needs_the_last_handle() {
        let first = MemoryStream::from(vec![7u8]).shared();
        let second = first.clone();
        let first = first.try_unwrap().unwrap_err();
        drop(second);
        let stream = first.try_unwrap().unwrap();
        assert_eq!(stream.get_ref(), &[7]);
    }

    #[test]
    fn last_handle_flushes_the_engine() {
        let backing = MemoryStream::new().shared();
        let mut handle = BufferedStream::new(backing.clone()).shared();
        let other = handle.clone();
        handle.write(b"abc", CompletionMode::All).unwrap();

        drop(handle);
        assert!(backing.borrow().get_ref().is_empty());
        drop(other);
        assert_eq!(backing.borrow().get_ref(), b"abc");
    }
}
