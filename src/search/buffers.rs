//! Reusable candidate buffers.
//!
//! Each batch of candidates is generated into a byte buffer taken from a
//! bounded lock-free queue and handed back on drop, so a long search (or
//! many concurrent ones) reuses a fixed set of allocations.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

#[derive(Debug)]
struct Shared {
    free: ArrayQueue<Vec<u8>>,
    allocations: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct BufferPool {
    shared: Arc<Shared>,
}

impl BufferPool {
    /// Pool retaining at most `capacity` idle buffers.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                free: ArrayQueue::new(capacity.max(1)),
                allocations: AtomicUsize::new(0),
            }),
        }
    }

    /// Take an idle buffer or allocate one. Contents are unspecified.
    pub fn acquire(&self) -> PooledBuffer {
        let buf = self.shared.free.pop().unwrap_or_else(|| {
            self.shared.allocations.fetch_add(1, Ordering::Relaxed);
            Vec::new()
        });
        PooledBuffer {
            buf,
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn idle(&self) -> usize {
        self.shared.free.len()
    }

    /// Buffers allocated over the pool's lifetime.
    pub fn allocations(&self) -> usize {
        self.shared.allocations.load(Ordering::Relaxed)
    }
}

/// A buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    shared: Arc<Shared>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        // A full queue drops the buffer.
        let _ = self.shared.free.push(buf);
    }
}
