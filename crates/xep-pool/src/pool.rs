use crate::block::MemoryBlock;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared state of one pool.
///
/// Wrapped in Arc so outstanding blocks can find their way home.
pub(crate) struct PoolInner {
    /// Lock-free queue of free blocks
    free_blocks: SegQueue<Box<[u8]>>,
    /// Size in bytes of every block
    block_size: usize,
    /// Number of blocks created at startup
    block_count: usize,
    /// Blocks currently on the free list. Never below the queue length.
    free: AtomicUsize,
    /// Lowest value `free` has ever reached
    min_free: AtomicUsize,
    /// Metrics: total takes
    total_takes: AtomicU64,
    /// Metrics: total releases
    total_releases: AtomicU64,
}

impl PoolInner {
    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }

    pub(crate) fn release(&self, mut data: Box<[u8]>) {
        data.fill(0);
        // Count before publishing: a taker may pop the block immediately
        self.free.fetch_add(1, Ordering::AcqRel);
        self.free_blocks.push(data);
        self.total_releases.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Block size in bytes
    pub block_size: usize,
    /// Total number of blocks
    pub block_count: usize,
    /// Blocks currently free
    pub free: usize,
    /// Minimum free blocks ever observed
    pub min_free: usize,
    /// Total successful takes
    pub total_takes: u64,
    /// Total releases
    pub total_releases: u64,
}

/// A pool of `block_count` blocks, each `block_size` bytes.
///
/// Block size and count are fixed at creation. Cloning the pool is cheap and
/// shares the same free list.
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Pre-allocate every block of the pool.
    ///
    /// Callers validate that both arguments are non-zero.
    pub(crate) fn new(block_size: usize, block_count: usize) -> Self {
        let free_blocks = SegQueue::new();
        for _ in 0..block_count {
            free_blocks.push(vec![0u8; block_size].into_boxed_slice());
        }

        Self {
            inner: Arc::new(PoolInner {
                free_blocks,
                block_size,
                block_count,
                free: AtomicUsize::new(block_count),
                min_free: AtomicUsize::new(block_count),
                total_takes: AtomicU64::new(0),
                total_releases: AtomicU64::new(0),
            }),
        }
    }

    /// Take a free block, or `None` when the pool is exhausted.
    #[must_use]
    pub fn try_take(&self) -> Option<MemoryBlock> {
        let data = self.inner.free_blocks.pop()?;

        let now_free = self.inner.free.fetch_sub(1, Ordering::AcqRel) - 1;
        self.inner.min_free.fetch_min(now_free, Ordering::AcqRel);
        self.inner.total_takes.fetch_add(1, Ordering::Relaxed);

        Some(MemoryBlock::new(data, Arc::clone(&self.inner)))
    }

    /// Size in bytes of every block in this pool.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Number of blocks the pool was created with.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.inner.block_count
    }

    /// Number of blocks currently on the free list.
    #[must_use]
    pub fn free(&self) -> usize {
        self.inner.free.load(Ordering::Acquire)
    }

    /// Minimum number of free blocks ever observed.
    #[must_use]
    pub fn min_free(&self) -> usize {
        self.inner.min_free.load(Ordering::Acquire)
    }

    /// Get current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            block_size: self.inner.block_size,
            block_count: self.inner.block_count,
            free: self.free(),
            min_free: self.min_free(),
            total_takes: self.inner.total_takes.load(Ordering::Relaxed),
            total_releases: self.inner.total_releases.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("block_size", &self.block_size())
            .field("block_count", &self.block_count())
            .field("free", &self.free())
            .field("min_free", &self.min_free())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation() {
        let pool = MemoryPool::new(64, 4);
        assert_eq!(pool.block_size(), 64);
        assert_eq!(pool.block_count(), 4);
        assert_eq!(pool.free(), 4);
        assert_eq!(pool.min_free(), 4);
    }

    #[test]
    fn test_try_take_exhausted() {
        let pool = MemoryPool::new(16, 2);
        let a = pool.try_take();
        let b = pool.try_take();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(pool.try_take().is_none());
        assert_eq!(pool.free(), 0);
    }

    #[test]
    fn test_watermark_only_decreases() {
        let pool = MemoryPool::new(16, 3);

        let a = pool.try_take().unwrap();
        let b = pool.try_take().unwrap();
        assert_eq!(pool.min_free(), 1);

        drop(a);
        drop(b);
        assert_eq!(pool.free(), 3);
        assert_eq!(pool.min_free(), 1);

        let c = pool.try_take().unwrap();
        assert_eq!(pool.min_free(), 1);
        drop(c);
    }

    #[test]
    fn test_concurrent_take_release_keeps_every_block() {
        let pool = MemoryPool::new(8, 1);
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let mut taken = 0u64;
                    for _ in 0..200_000 {
                        if let Some(block) = pool.try_take() {
                            taken += 1;
                            drop(block);
                        }
                    }
                    taken
                })
            })
            .collect();
        let taken: u64 = workers.into_iter().map(|w| w.join().unwrap()).sum();

        assert!(taken > 0);
        assert_eq!(pool.free(), 1);
        let stats = pool.stats();
        assert_eq!(stats.total_takes, taken);
        assert_eq!(stats.total_releases, taken);
        assert!(pool.try_take().is_some());
    }

    #[test]
    fn test_released_block_is_zeroed() {
        let pool = MemoryPool::new(8, 1);
        let mut block = pool.try_take().unwrap();
        block.copy_from_slice(&[7u8; 8]);
        drop(block);

        let block = pool.try_take().unwrap();
        assert!(block.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_metrics() {
        let pool = MemoryPool::new(8, 2);
        let a = pool.try_take().unwrap();
        let b = pool.try_take().unwrap();
        drop(a);

        let stats = pool.stats();
        assert_eq!(stats.total_takes, 2);
        assert_eq!(stats.total_releases, 1);
        assert_eq!(stats.free, 1);
        assert_eq!(stats.min_free, 0);
        drop(b);
    }
}
