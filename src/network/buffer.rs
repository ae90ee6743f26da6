//! Buffer pool for frame construction.
//!
//! The sender builds one frame per (target, template) pair; reusing buffers
//! keeps the hot loop free of allocations.

use std::sync::Arc;

use parking_lot::Mutex;

/// Capacity of a pooled buffer.
/// Ethernet (14) + IPv6 (40) + TCP with options (60) + a full 1500 byte MTU
/// fits; larger template frames get a one-off allocation.
pub const FRAME_BUFFER_CAPACITY: usize = 2048;

/// A frame buffer borrowed from the pool.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl PooledBuffer {
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buffer = std::mem::take(&mut self.data);
        buffer.clear();
        // Oversized one-off buffers are not worth keeping around.
        if buffer.capacity() <= FRAME_BUFFER_CAPACITY * 2 {
            self.pool.lock().push(buffer);
        }
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// A pool of reusable frame buffers.
#[derive(Clone)]
pub struct BufferPool {
    buffers: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    /// Create a pool with `pool_size` pre-allocated buffers.
    pub fn new(pool_size: usize) -> Self {
        let buffers: Vec<Vec<u8>> = (0..pool_size)
            .map(|_| Vec::with_capacity(FRAME_BUFFER_CAPACITY))
            .collect();

        Self {
            buffers: Arc::new(Mutex::new(buffers)),
        }
    }

    /// Get a buffer of exactly `len` zero bytes.
    ///
    /// If the pool is empty, a new buffer is allocated. The buffer goes back
    /// to the pool when dropped.
    pub fn get_zeroed(&self, len: usize) -> PooledBuffer {
        let mut data = self
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(FRAME_BUFFER_CAPACITY.max(len)));
        data.resize(len, 0);

        PooledBuffer {
            data,
            pool: Arc::clone(&self.buffers),
        }
    }

    /// Number of buffers currently available.
    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(4)
    }
}
