use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::trace;

use crate::buffer::Buffer;

/// Recycles the storage of freed read buffers.
///
/// At most `max_pooled` regions are kept; storage smaller than `buffer_size` is
/// never pooled.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buffer_size: usize,
    max_pooled: usize,
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self { inner: Arc::new(PoolInner { buffer_size, max_pooled, free: Mutex::new(Vec::with_capacity(max_pooled)) }) }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of regions waiting to be reused.
    pub fn pooled(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// An empty writable buffer of `buffer_size` bytes.
    pub fn acquire(&self) -> Buffer {
        Buffer::pooled(self.take_storage(), self.inner.buffer_size, self.clone())
    }

    /// Raw storage to read into; hand it back as a buffer with [`BufferPool::wrap`].
    pub fn take_storage(&self) -> BytesMut {
        self.inner.free.lock().pop().unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_size))
    }

    /// A counted buffer over filled storage; the storage returns here once freed.
    pub fn wrap(&self, storage: BytesMut) -> Buffer {
        let len = storage.len();
        Buffer::pooled(storage, len, self.clone())
    }

    pub(super) fn recycle(&self, mut storage: BytesMut) {
        storage.clear();
        if storage.capacity() < self.inner.buffer_size {
            return;
        }

        let mut free = self.inner.free.lock();
        if free.len() < self.inner.max_pooled {
            free.push(storage);
            trace!(pooled = free.len(), "recycled buffer storage");
        }
    }
}
