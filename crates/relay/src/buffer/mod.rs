//! Reference counted byte regions.
//!
//! A [`Buffer`] is a handle onto a shared region of bytes with its own reader
//! and writer cursors. Handles come in two kinds:
//!
//! - counted handles, created by [`Buffer::allocate`], [`Buffer::wrap`],
//!   [`BufferPool`] and [`Buffer::retain`], each hold one reference and give it
//!   back when released or dropped
//! - views, created by [`Buffer::slice`], borrow the region without holding a
//!   reference and fail with [`BufferError::UseAfterFree`] once the last counted
//!   handle is gone
//!
//! [`Buffer::release`] consumes the handle, so releasing twice does not compile.
//! When the count reaches zero the storage is freed, or handed back to the pool
//! the buffer came from.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use thiserror::Error;

mod pool;

pub use pool::BufferPool;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("requested {requested} bytes but only {available} are readable")]
    OutOfData { requested: usize, available: usize },

    #[error("buffer accessed after its reference count reached zero")]
    UseAfterFree,

    #[error("range {offset}+{len} is outside the {limit} readable bytes")]
    OutOfBounds { offset: usize, len: usize, limit: usize },

    #[error("write of {requested} bytes exceeds the {writable} writable bytes")]
    CapacityExceeded { requested: usize, writable: usize },

    #[error("buffer is read only")]
    ReadOnly,
}

enum Storage {
    Writable(BytesMut),
    Frozen(Bytes),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Writable(bytes) => bytes.as_ref(),
            Storage::Frozen(bytes) => bytes.as_ref(),
        }
    }

    /// Bytes in `start..end`, without a copy when the storage is frozen.
    fn bytes(&self, start: usize, end: usize) -> Bytes {
        match self {
            Storage::Writable(bytes) => Bytes::copy_from_slice(&bytes[start..end]),
            Storage::Frozen(bytes) => bytes.slice(start..end),
        }
    }
}

struct Region {
    refs: AtomicUsize,
    storage: Mutex<Option<Storage>>,
    pool: Option<BufferPool>,
}

impl Region {
    fn new(storage: Storage, pool: Option<BufferPool>) -> Arc<Self> {
        Arc::new(Self { refs: AtomicUsize::new(1), storage: Mutex::new(Some(storage)), pool })
    }

    fn retain(&self) -> Result<(), BufferError> {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| (refs > 0).then_some(refs + 1))
            .map(|_| ())
            .map_err(|_refs| BufferError::UseAfterFree)
    }

    /// Gives back one reference; only counted handles call this, so the count
    /// is at least one here.
    fn release(&self) -> bool {
        if self.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return false;
        }

        let storage = self.storage.lock().take();
        if let (Some(Storage::Writable(bytes)), Some(pool)) = (storage, &self.pool) {
            pool.recycle(bytes);
        }
        true
    }

    fn with_storage<T>(&self, f: impl FnOnce(&Storage) -> T) -> Result<T, BufferError> {
        self.storage.lock().as_ref().map(f).ok_or(BufferError::UseAfterFree)
    }

    fn with_storage_mut<T>(&self, f: impl FnOnce(&mut Storage) -> T) -> Result<T, BufferError> {
        self.storage.lock().as_mut().map(f).ok_or(BufferError::UseAfterFree)
    }
}

/// A handle onto a reference counted byte region.
///
/// Exactly one handle is expected to move the cursors of a region at a time;
/// handles passed on to another stage or task carry their own reference.
pub struct Buffer {
    region: Arc<Region>,
    /// start of this handle inside the region
    offset: usize,
    reader: usize,
    writer: usize,
    capacity: usize,
    counted: bool,
}

impl Buffer {
    /// An empty, writable buffer holding up to `capacity` bytes.
    pub fn allocate(capacity: usize) -> Self {
        Self::counted(Storage::Writable(BytesMut::with_capacity(capacity)), 0, capacity, None)
    }

    /// A read only buffer over `bytes`, without a copy.
    pub fn wrap(bytes: Bytes) -> Self {
        let len = bytes.len();
        Self::counted(Storage::Frozen(bytes), len, len, None)
    }

    /// A writable buffer holding a copy of `src`, with no spare capacity.
    pub fn copy_from_slice(src: &[u8]) -> Self {
        Self::counted(Storage::Writable(BytesMut::from(src)), src.len(), src.len(), None)
    }

    pub(crate) fn pooled(storage: BytesMut, capacity: usize, pool: BufferPool) -> Self {
        let len = storage.len();
        Self::counted(Storage::Writable(storage), len, capacity.max(len), Some(pool))
    }

    fn counted(storage: Storage, writer: usize, capacity: usize, pool: Option<BufferPool>) -> Self {
        Self { region: Region::new(storage, pool), offset: 0, reader: 0, writer, capacity, counted: true }
    }

    /// Current reference count of the underlying region.
    pub fn ref_cnt(&self) -> usize {
        self.region.refs.load(Ordering::Acquire)
    }

    pub fn is_accessible(&self) -> bool {
        self.ref_cnt() > 0
    }

    pub fn readable_bytes(&self) -> usize {
        self.writer - self.reader
    }

    pub fn writable_bytes(&self) -> usize {
        self.capacity - self.writer
    }

    pub fn is_empty(&self) -> bool {
        self.readable_bytes() == 0
    }

    /// Another counted handle onto the same region, with its own cursors.
    pub fn retain(&self) -> Result<Buffer, BufferError> {
        self.region.retain()?;
        Ok(Buffer {
            region: Arc::clone(&self.region),
            offset: self.offset,
            reader: self.reader,
            writer: self.writer,
            capacity: self.capacity,
            counted: true,
        })
    }

    /// Gives this handle's reference back, returning whether the region was freed.
    ///
    /// Views hold no reference; releasing one returns `false` and changes nothing.
    pub fn release(mut self) -> bool {
        let freed = self.counted && self.region.release();
        self.counted = false;
        freed
    }

    /// Reads the next `n` bytes and advances the reader cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, BufferError> {
        let available = self.readable_bytes();
        if n > available {
            return Err(BufferError::OutOfData { requested: n, available });
        }

        let start = self.offset + self.reader;
        let bytes = self.region.with_storage(|storage| storage.bytes(start, start + n))?;
        self.reader += n;
        Ok(bytes)
    }

    /// Moves every readable byte into `dst`, returning how many were moved.
    pub fn read_into(&mut self, dst: &mut BytesMut) -> Result<usize, BufferError> {
        let (start, end) = (self.offset + self.reader, self.offset + self.writer);
        self.region.with_storage(|storage| dst.extend_from_slice(&storage.as_slice()[start..end]))?;
        let n = end - start;
        self.reader += n;
        Ok(n)
    }

    /// Appends `src` at the writer cursor.
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<(), BufferError> {
        let writable = self.writable_bytes();
        if src.len() > writable {
            return Err(BufferError::CapacityExceeded { requested: src.len(), writable });
        }

        let start = self.offset + self.writer;
        self.region.with_storage_mut(|storage| match storage {
            Storage::Writable(bytes) => {
                let end = start + src.len();
                if bytes.len() < end {
                    bytes.resize(end, 0);
                }
                bytes[start..end].copy_from_slice(src);
                Ok(())
            }
            Storage::Frozen(_) => Err(BufferError::ReadOnly),
        })??;

        self.writer += src.len();
        Ok(())
    }

    /// A view of `len` bytes starting `offset` bytes into this buffer, sharing
    /// its storage. The view holds no reference of its own.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Buffer, BufferError> {
        self.check_range(offset, len)?;
        if !self.is_accessible() {
            return Err(BufferError::UseAfterFree);
        }

        Ok(Buffer {
            region: Arc::clone(&self.region),
            offset: self.offset + offset,
            reader: 0,
            writer: len,
            capacity: len,
            counted: false,
        })
    }

    /// `len` bytes starting `offset` bytes into this buffer, copied into fresh storage.
    pub fn copy(&self, offset: usize, len: usize) -> Result<Buffer, BufferError> {
        self.check_range(offset, len)?;
        let start = self.offset + offset;
        self.region.with_storage(|storage| Buffer::copy_from_slice(&storage.as_slice()[start..start + len]))
    }

    /// The readable bytes, leaving the cursors alone.
    pub fn to_bytes(&self) -> Result<Bytes, BufferError> {
        let (start, end) = (self.offset + self.reader, self.offset + self.writer);
        self.region.with_storage(|storage| storage.bytes(start, end))
    }

    /// The readable bytes; the handle is released afterwards.
    pub fn into_bytes(self) -> Result<Bytes, BufferError> {
        self.to_bytes()
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), BufferError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.writer => Ok(()),
            _ => Err(BufferError::OutOfBounds { offset, len, limit: self.writer }),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.counted {
            self.region.release();
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("ref_cnt", &self.ref_cnt())
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .field("capacity", &self.capacity)
            .field("counted", &self.counted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_reduces_count_by_one() {
        let buffer = Buffer::copy_from_slice(b"hello");
        let retained = buffer.retain().unwrap();
        assert_eq!(buffer.ref_cnt(), 2);

        assert!(!retained.release());
        assert_eq!(buffer.ref_cnt(), 1);
        assert!(buffer.release());
    }

    #[test]
    fn view_fails_after_count_reaches_zero() {
        let buffer = Buffer::copy_from_slice(b"hello world");
        let mut view = buffer.slice(6, 5).unwrap();
        assert_eq!(view.ref_cnt(), 1);

        assert!(buffer.release());
        assert!(!view.is_accessible());
        assert_eq!(view.read_bytes(1), Err(BufferError::UseAfterFree));
        assert_eq!(view.retain().unwrap_err(), BufferError::UseAfterFree);
        assert!(!view.release());
    }

    #[test]
    fn dropping_a_handle_releases_it() {
        let buffer = Buffer::wrap(Bytes::from_static(b"abc"));
        {
            let _retained = buffer.retain().unwrap();
            assert_eq!(buffer.ref_cnt(), 2);
        }
        assert_eq!(buffer.ref_cnt(), 1);
    }

    #[test]
    fn reading_past_the_writer_is_out_of_data() {
        let mut buffer = Buffer::allocate(16);
        buffer.write_bytes(b"abcd").unwrap();

        assert_eq!(&buffer.read_bytes(3).unwrap()[..], b"abc");
        assert_eq!(buffer.read_bytes(2), Err(BufferError::OutOfData { requested: 2, available: 1 }));
        assert_eq!(&buffer.read_bytes(1).unwrap()[..], b"d");
        assert!(buffer.is_empty());
    }

    #[test]
    fn writes_are_bounded_by_capacity() {
        let mut buffer = Buffer::allocate(4);
        buffer.write_bytes(b"abc").unwrap();
        assert_eq!(buffer.write_bytes(b"de"), Err(BufferError::CapacityExceeded { requested: 2, writable: 1 }));

        let mut frozen = Buffer::wrap(Bytes::from_static(b"x"));
        assert!(frozen.write_bytes(b"y").is_err());
    }

    #[test]
    fn slice_shares_and_copy_does_not() {
        let mut buffer = Buffer::allocate(8);
        buffer.write_bytes(b"abcdef").unwrap();

        let view = buffer.slice(2, 3).unwrap();
        let copy = buffer.copy(2, 3).unwrap();
        assert_eq!(&view.to_bytes().unwrap()[..], b"cde");
        assert!(buffer.slice(4, 3).is_err());

        drop(buffer);
        assert_eq!(view.to_bytes(), Err(BufferError::UseAfterFree));
        assert_eq!(&copy.to_bytes().unwrap()[..], b"cde");
    }

    #[test]
    fn read_into_drains_readable_bytes() {
        let mut buffer = Buffer::copy_from_slice(b"GET / HTTP/1.1\r\n");
        let mut dst = BytesMut::from(&b">"[..]);

        assert_eq!(buffer.read_into(&mut dst).unwrap(), 16);
        assert_eq!(&dst[..], b">GET / HTTP/1.1\r\n");
        assert_eq!(buffer.readable_bytes(), 0);
    }
}
