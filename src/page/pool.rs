//! Page buffer pool
//!
//! Lock-free free list of page-sized buffers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use super::{Page, PageId, PAGE_SIZE};

/// Recycles `PAGE_SIZE` buffers between dropped and newly created pages
///
/// ## Concurrency:
/// - `free`: bounded lock-free queue, safe to push/pop from any thread
/// - Buffers beyond capacity are simply freed on release
pub struct PagePool {
    free: ArrayQueue<Box<[u8]>>,
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl PagePool {
    /// Create a pool retaining at most `capacity` idle buffers
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: ArrayQueue::new(capacity.max(1)),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        })
    }

    /// Create a zero-filled page backed by this pool
    pub fn page(self: &Arc<Self>, id: PageId) -> Page {
        Page::pooled(id, self)
    }

    /// Take a zeroed buffer, reusing an idle one when available
    pub(crate) fn acquire(&self) -> Box<[u8]> {
        match self.free.pop() {
            Some(mut buf) => {
                buf.fill(0);
                self.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0u8; PAGE_SIZE].into_boxed_slice()
            }
        }
    }

    /// Hand a buffer back; dropped if the pool is full
    pub(crate) fn release(&self, buf: Box<[u8]>) {
        if buf.len() == PAGE_SIZE {
            let _ = self.free.push(buf);
        }
    }

    /// Number of idle buffers ready for reuse
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Buffers allocated fresh because the pool was empty
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Buffers served from the free list
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }
}
