use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, LazyLock};

use crossbeam_queue::ArrayQueue;

const POOL_CAPACITY: usize = 16;

/// Buffers that grew past this are dropped instead of pooled
const MAX_RETAINED_CAPACITY: usize = 1024 * 1024;

pub static GLOBAL_BUFFER_POOL: LazyLock<Arc<BufferPool>> =
    LazyLock::new(|| Arc::new(BufferPool::default()));

/// A pooled `Vec<u8>` that returns itself to the pool on drop.
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    inner: ManuallyDrop<Vec<u8>>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        // SAFETY: inner is never accessed after this
        let vec = unsafe { ManuallyDrop::take(&mut self.inner) };
        self.pool.put(vec);
    }
}

/// Scratch buffers for streaming LOCAL INFILE content.
///
/// Holds at most `capacity` idle buffers; a buffer whose capacity exceeds
/// `max_retained` is released on return rather than kept.
#[derive(Debug)]
pub struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
    max_retained: usize,
}

impl BufferPool {
    pub fn new(capacity: usize, max_retained: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity.max(1)),
            max_retained,
        }
    }

    /// Take a cleared buffer holding at least `min_capacity` bytes of space
    pub fn get(self: &Arc<Self>, min_capacity: usize) -> PooledBuffer {
        let mut vec = self.buffers.pop().unwrap_or_default();
        vec.clear();
        vec.reserve(min_capacity);
        PooledBuffer {
            pool: Arc::clone(self),
            inner: ManuallyDrop::new(vec),
        }
    }

    fn put(&self, mut vec: Vec<u8>) {
        if vec.capacity() > self.max_retained {
            return;
        }
        vec.clear();
        // Ignore if pool is full
        let _ = self.buffers.push(vec);
    }

    pub fn idle(&self) -> usize {
        self.buffers.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(POOL_CAPACITY, MAX_RETAINED_CAPACITY)
    }
}
