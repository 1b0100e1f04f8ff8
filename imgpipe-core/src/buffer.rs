//! Instrumented buffer pool for slot staging and device memory
//!
//! Every buffer the pipeline allocates comes from a [`BufferPool`], which
//! tracks outstanding allocations so shutdown can be verified: after `stop`,
//! the pool must report zero outstanding buffers.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Allocation statistics for a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently alive
    pub outstanding_buffers: usize,

    /// Bytes currently alive
    pub outstanding_bytes: usize,

    /// Peak outstanding bytes over the pool's lifetime
    pub peak_bytes: usize,

    /// Total number of allocations performed
    pub total_allocations: usize,
}

/// Pool that accounts for every buffer it hands out
///
/// Buffers report back on drop, so the counters reflect live memory at any
/// point in time.
#[derive(Debug, Default)]
pub struct BufferPool {
    outstanding_buffers: AtomicUsize,
    outstanding_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    total_allocations: AtomicUsize,
}

impl BufferPool {
    /// Create a new pool
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate a zeroed buffer of `len` bytes
    pub fn allocate(self: &Arc<Self>, len: usize) -> Result<Buffer> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| Error::AllocationFailed { requested: len })?;
        bytes.resize(len, 0);

        self.outstanding_buffers.fetch_add(1, Ordering::SeqCst);
        let current = self.outstanding_bytes.fetch_add(len, Ordering::SeqCst) + len;
        self.peak_bytes.fetch_max(current, Ordering::SeqCst);
        self.total_allocations.fetch_add(1, Ordering::SeqCst);

        Ok(Buffer {
            bytes,
            pool: Arc::clone(self),
        })
    }

    /// Current accounting snapshot
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            outstanding_buffers: self.outstanding_buffers.load(Ordering::SeqCst),
            outstanding_bytes: self.outstanding_bytes.load(Ordering::SeqCst),
            peak_bytes: self.peak_bytes.load(Ordering::SeqCst),
            total_allocations: self.total_allocations.load(Ordering::SeqCst),
        }
    }
}

/// Owned byte buffer accounted against its pool
#[derive(Debug)]
pub struct Buffer {
    bytes: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Buffer {
    /// Size of the buffer in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer holds zero bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.pool.outstanding_buffers.fetch_sub(1, Ordering::SeqCst);
        self.pool
            .outstanding_bytes
            .fetch_sub(self.bytes.len(), Ordering::SeqCst);
    }
}
