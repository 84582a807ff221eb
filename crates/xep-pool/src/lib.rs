//! Fixed block-size memory pools for the message bus.
//!
//! The radar pipeline cannot tolerate heap fragmentation or unbounded
//! allocation latency, so every in-flight message lives in a block taken from
//! a pre-allocated pool:
//!
//! - [`MemoryPool`]: `N` blocks of a fixed size `S`, with a lock-free free list
//!   and a "minimum free blocks ever observed" watermark.
//! - [`MemoryPoolSet`]: pools ordered by block size; [`MemoryPoolSet::take`]
//!   returns a block from the smallest pool that fits and still has a free
//!   block, or fails with [`PoolError::OutOfMemory`]. It never blocks and never
//!   falls back to the general allocator.
//! - [`MemoryBlock`]: exclusive ownership of one block. Dropping it returns the
//!   block to its origin pool, so a double release cannot be expressed.
//! - [`SharedBlock`]: reference-counted handle used when one block is
//!   delivered to several subscribers. The last clone to drop frees the block.
//!
//! # Memory Flow
//!
//! ```text
//! 1. MemoryPoolSet pre-allocates every block at boot
//! 2. take(size) pops a block from the smallest fitting pool
//! 3. Producer fills the block, then shares or freezes it
//! 4. Consumers hold SharedBlock clones or a Bytes view
//! 5. Last owner drops -> block pushed back on its pool's free list
//! ```
//!
//! # Example
//!
//! ```
//! use xep_pool::MemoryPoolSet;
//!
//! let mut pools = MemoryPoolSet::new(4);
//! pools.add_pool(100, 10).unwrap();
//! pools.add_pool(7000, 2).unwrap();
//!
//! let mut block = pools.take(512).unwrap();
//! assert_eq!(block.capacity(), 7000);
//! block[0] = 42;
//!
//! // Returned to the 7000-byte pool on drop
//! drop(block);
//! assert_eq!(pools.pools()[1].free(), 2);
//! ```

mod block;
mod error;
mod pool;
mod set;

pub use block::{MemoryBlock, SharedBlock};
pub use error::PoolError;
pub use pool::{MemoryPool, PoolStats};
pub use set::{MemoryPoolSet, MAX_POOLS};
