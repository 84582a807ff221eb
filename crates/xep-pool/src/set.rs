use crate::block::MemoryBlock;
use crate::error::PoolError;
use crate::pool::{MemoryPool, PoolStats};
use tracing::{debug, info};

/// Upper bound on pools in one set.
pub const MAX_POOLS: usize = 8;

/// Pools ordered by ascending block size.
///
/// Built once at boot; `add_pool` is the only mutation and takes `&mut self`,
/// so the set is read-only once shared.
#[derive(Debug)]
pub struct MemoryPoolSet {
    pools: Vec<MemoryPool>,
    capacity: usize,
}

impl MemoryPoolSet {
    /// Create an empty set that accepts up to `capacity` pools.
    ///
    /// `capacity` is clamped to [`MAX_POOLS`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_POOLS);
        Self {
            pools: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a set from `(block_size, block_count)` pairs.
    pub fn with_pools(specs: &[(usize, usize)]) -> Result<Self, PoolError> {
        let mut set = Self::new(specs.len());
        if specs.len() > set.capacity {
            return Err(PoolError::TooManyPools {
                capacity: set.capacity,
            });
        }
        for &(block_size, block_count) in specs {
            set.add_pool(block_size, block_count)?;
        }
        Ok(set)
    }

    /// Add a pool of `block_count` blocks of `block_size` bytes.
    pub fn add_pool(&mut self, block_size: usize, block_count: usize) -> Result<(), PoolError> {
        if block_size == 0 || block_count == 0 {
            return Err(PoolError::InvalidSize {
                block_size,
                block_count,
            });
        }
        if self.pools.len() >= self.capacity {
            return Err(PoolError::TooManyPools {
                capacity: self.capacity,
            });
        }

        let pool = MemoryPool::new(block_size, block_count);
        let position = self
            .pools
            .partition_point(|p| p.block_size() <= block_size);
        self.pools.insert(position, pool);

        info!(
            block_size,
            block_count,
            total_kb = (block_size * block_count) as f64 / 1024.0,
            "MemoryPool created"
        );
        Ok(())
    }

    /// Take a block of at least `size` bytes.
    ///
    /// Pools are tried from the smallest block size upwards; the first one
    /// that fits and has a free block wins. Never blocks.
    pub fn take(&self, size: usize) -> Result<MemoryBlock, PoolError> {
        let block = self
            .pools
            .iter()
            .filter(|pool| pool.block_size() >= size)
            .find_map(MemoryPool::try_take);

        block.ok_or_else(|| {
            debug!(requested = size, "No pool can satisfy request");
            PoolError::OutOfMemory { requested: size }
        })
    }

    /// Return a block to its origin pool.
    ///
    /// Equivalent to dropping the block; provided for call sites that want to
    /// make the release explicit.
    pub fn release(&self, block: MemoryBlock) {
        drop(block);
    }

    /// Pools in ascending block-size order.
    #[must_use]
    pub fn pools(&self) -> &[MemoryPool] {
        &self.pools
    }

    /// Number of pools in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// `true` when no pool has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Largest block size offered by the set.
    #[must_use]
    pub fn max_block_size(&self) -> usize {
        self.pools.last().map_or(0, MemoryPool::block_size)
    }

    /// Counters for every pool.
    #[must_use]
    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools.iter().map(MemoryPool::stats).collect()
    }

    /// One-line diagnostic: `"size: free/count (min_free)"` per pool.
    #[must_use]
    pub fn statistics(&self) -> String {
        self.pools
            .iter()
            .map(|p| {
                format!(
                    "{}: {}/{} ({})",
                    p.block_size(),
                    p.free(),
                    p.block_count(),
                    p.min_free()
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}
