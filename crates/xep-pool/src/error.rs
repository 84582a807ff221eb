use thiserror::Error;

/// Errors reported by the pool allocator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No pool has both a large enough block size and a free block.
    #[error("out of memory: no free block of at least {requested} bytes")]
    OutOfMemory {
        /// Requested size in bytes
        requested: usize,
    },

    /// The pool set already holds its configured number of pools.
    #[error("pool set is full ({capacity} pools)")]
    TooManyPools {
        /// Configured capacity of the set
        capacity: usize,
    },

    /// Block size or block count of zero.
    #[error("invalid pool geometry: {block_count} blocks of {block_size} bytes")]
    InvalidSize {
        /// Requested block size
        block_size: usize,
        /// Requested block count
        block_count: usize,
    },
}
