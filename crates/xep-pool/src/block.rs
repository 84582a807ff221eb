use crate::pool::PoolInner;
use bytes::Bytes;
use std::ops::{Deref, DerefMut, Range};
use std::sync::Arc;

/// Exclusive ownership of one pool block.
///
/// The block goes back to its origin pool when dropped. Holding a
/// `MemoryBlock` means no other task can observe or mutate its bytes.
pub struct MemoryBlock {
    data: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
}

impl MemoryBlock {
    pub(crate) fn new(data: Box<[u8]>, pool: Arc<PoolInner>) -> Self {
        Self {
            data: Some(data),
            pool,
        }
    }

    /// Capacity in bytes (the block size of the origin pool).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.block_size()
    }

    /// Immutable view of the whole block.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Mutable view of the whole block.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Convert into a reference-counted handle for broadcast delivery.
    #[must_use]
    pub fn into_shared(self) -> SharedBlock {
        SharedBlock(Arc::new(self))
    }

    /// Hand a byte range of the block to `Bytes` without copying.
    ///
    /// The block returns to its pool when the last `Bytes` clone drops.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds, like slice indexing.
    #[must_use]
    pub fn freeze(self, range: Range<usize>) -> Bytes {
        Bytes::from_owner(self).slice(range)
    }
}

impl Deref for MemoryBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for MemoryBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

// Required for Bytes::from_owner()
impl AsRef<[u8]> for MemoryBlock {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }
}

impl std::fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Shared, read-only handle to a block referenced by several messages.
///
/// Clones are cheap. The block is released when the last clone drops.
#[derive(Clone, Debug)]
pub struct SharedBlock(Arc<MemoryBlock>);

impl SharedBlock {
    /// Number of live handles to this block.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }

    /// Recover exclusive ownership if this is the only handle left.
    ///
    /// Returns the handle unchanged when other references are still alive.
    pub fn try_unique(self) -> Result<MemoryBlock, Self> {
        Arc::try_unwrap(self.0).map_err(Self)
    }

    /// Mutable access when this is the only handle.
    pub fn get_mut(&mut self) -> Option<&mut [u8]> {
        Arc::get_mut(&mut self.0).map(MemoryBlock::as_mut_slice)
    }

    /// Hand a byte range to `Bytes` without copying.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds, like slice indexing.
    #[must_use]
    pub fn freeze(self, range: Range<usize>) -> Bytes {
        Bytes::from_owner(self).slice(range)
    }
}

impl Deref for SharedBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl AsRef<[u8]> for SharedBlock {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl From<MemoryBlock> for SharedBlock {
    fn from(block: MemoryBlock) -> Self {
        block.into_shared()
    }
}
