//! Size-classed byte buffer pool shared by all connections of a server.

use bytes::BytesMut;
use crossbeam_queue::SegQueue;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Capacity of the per-connection read buffer.
pub const READ_BUFFER_SIZE: usize = 4 << 10;
/// Capacity of the per-connection write buffer.
pub const WRITE_BUFFER_SIZE: usize = 2 << 10;

const DEFAULT_MAX_POOLED: usize = 256;

struct SizeClass {
    capacity: usize,
    max_pooled: usize,
    free: SegQueue<BytesMut>,
}

impl SizeClass {
    fn new(capacity: usize, max_pooled: usize) -> Self {
        Self {
            capacity,
            max_pooled,
            free: SegQueue::new(),
        }
    }

    fn take(&self) -> BytesMut {
        self.free
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.capacity))
    }

    fn give_back(&self, mut buf: BytesMut) {
        buf.clear();
        // A buffer that grew for one oversized exchange is not kept around.
        if buf.capacity() > self.capacity * 4 {
            return;
        }
        if buf.capacity() < self.capacity {
            buf.reserve(self.capacity);
        }
        if self.free.len() < self.max_pooled {
            self.free.push(buf);
        }
    }
}

/// Pool of read and write buffers.
///
/// Buffers are handed out as [`PooledBuffer`]s, which clear themselves and go
/// back to their size class when dropped. Acquire and release are lock-free.
pub struct BufferPool {
    read: Arc<SizeClass>,
    write: Arc<SizeClass>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_max_pooled(DEFAULT_MAX_POOLED)
    }

    /// Keep at most `max_pooled` idle buffers in each size class.
    pub fn with_max_pooled(max_pooled: usize) -> Self {
        Self {
            read: Arc::new(SizeClass::new(READ_BUFFER_SIZE, max_pooled)),
            write: Arc::new(SizeClass::new(WRITE_BUFFER_SIZE, max_pooled)),
        }
    }

    pub fn read_buffer(&self) -> PooledBuffer {
        PooledBuffer::new(&self.read)
    }

    pub fn write_buffer(&self) -> PooledBuffer {
        PooledBuffer::new(&self.write)
    }

    /// Idle read buffers currently pooled.
    pub fn idle_read(&self) -> usize {
        self.read.free.len()
    }

    /// Idle write buffers currently pooled.
    pub fn idle_write(&self) -> usize {
        self.write.free.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle_read", &self.idle_read())
            .field("idle_write", &self.idle_write())
            .finish()
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledBuffer {
    buf: BytesMut,
    class: Arc<SizeClass>,
}

impl PooledBuffer {
    fn new(class: &Arc<SizeClass>) -> Self {
        Self {
            buf: class.take(),
            class: Arc::clone(class),
        }
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.class.give_back(std::mem::take(&mut self.buf));
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}
