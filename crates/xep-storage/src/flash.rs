#![allow(unsafe_code)]
//! Flash region abstraction.
//!
//! Erased flash reads as `0xFF`. Erase and write are the only mutating
//! operations; the store never assumes a write without a preceding erase.

use crate::error::FlashError;
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A contiguous flash region.
pub trait Flash: Send {
    /// Region length in bytes.
    fn size(&self) -> usize;

    /// Smallest programmable unit.
    fn page_size(&self) -> usize;

    /// Smallest erasable unit the region is aligned to.
    fn block_size(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Reset `len` bytes at `offset` to `0xFF`.
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError>;

    /// Program `data` at `offset`.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError>;

    /// Make previous writes durable.
    fn flush(&mut self) -> Result<(), FlashError> {
        Ok(())
    }
}

fn check_range(offset: usize, len: usize, size: usize) -> Result<(), FlashError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(FlashError::OutOfRange { offset, len, size }),
    }
}

#[derive(Debug)]
struct MemImage {
    bytes: Vec<u8>,
    /// Operations left before simulated power loss; `None` disables it
    ops_until_power_loss: Option<usize>,
}

impl MemImage {
    fn consume_op(&mut self) -> Result<(), FlashError> {
        match self.ops_until_power_loss {
            Some(0) => Err(FlashError::PowerLost),
            Some(ref mut n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// RAM-backed flash.
///
/// Clones share one image, so a test can drop a store and start a new one on
/// the same contents to simulate a reboot.
#[derive(Debug, Clone)]
pub struct MemFlash {
    image: Arc<Mutex<MemImage>>,
    page_size: usize,
    block_size: usize,
}

impl MemFlash {
    /// Create an erased region.
    #[must_use]
    pub fn new(size: usize, page_size: usize, block_size: usize) -> Self {
        Self {
            image: Arc::new(Mutex::new(MemImage {
                bytes: vec![0xFF; size],
                ops_until_power_loss: None,
            })),
            page_size,
            block_size,
        }
    }

    /// Let `ops` more erase/write operations succeed, then fail every
    /// following one with [`FlashError::PowerLost`].
    pub fn cut_power_after(&self, ops: usize) {
        self.image.lock().ops_until_power_loss = Some(ops);
    }

    /// Restore power.
    pub fn restore_power(&self) {
        self.image.lock().ops_until_power_loss = None;
    }

    /// Flip every bit of the byte at `offset`.
    pub fn corrupt(&self, offset: usize) {
        if let Some(b) = self.image.lock().bytes.get_mut(offset) {
            *b = !*b;
        }
    }

    /// Copy of the whole image.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.image.lock().bytes.clone()
    }
}

impl Flash for MemFlash {
    fn size(&self) -> usize {
        self.image.lock().bytes.len()
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        let image = self.image.lock();
        check_range(offset, buf.len(), image.bytes.len())?;
        buf.copy_from_slice(&image.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        let mut image = self.image.lock();
        check_range(offset, len, image.bytes.len())?;
        image.consume_op()?;
        image.bytes[offset..offset + len].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        let mut image = self.image.lock();
        check_range(offset, data.len(), image.bytes.len())?;
        image.consume_op()?;
        image.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// Flash backed by a memory-mapped file.
///
/// A new or short file is extended to `size` bytes of `0xFF`.
pub struct MmapFlash {
    path: PathBuf,
    mmap: MmapMut,
    page_size: usize,
    block_size: usize,
}

impl std::fmt::Debug for MmapFlash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapFlash")
            .field("path", &self.path)
            .field("size", &self.mmap.len())
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl MmapFlash {
    /// Open or create the backing file.
    pub fn open(
        path: impl AsRef<Path>,
        size: usize,
        page_size: usize,
        block_size: usize,
    ) -> Result<Self, FlashError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let existing = usize::try_from(file.metadata()?.len()).unwrap_or(usize::MAX);
        file.set_len(size as u64)?;

        // SAFETY: the file is opened read/write and sized above; the mapping
        // is owned by this struct and only accessed through it.
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        if existing < size {
            mmap[existing..].fill(0xFF);
        }

        tracing::debug!(path = %path.display(), size, "Flash image mapped");
        Ok(Self {
            path,
            mmap,
            page_size,
            block_size,
        })
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Flash for MmapFlash {
    fn size(&self) -> usize {
        self.mmap.len()
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        check_range(offset, buf.len(), self.mmap.len())?;
        buf.copy_from_slice(&self.mmap[offset..offset + buf.len()]);
        Ok(())
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        check_range(offset, len, self.mmap.len())?;
        self.mmap[offset..offset + len].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        check_range(offset, data.len(), self.mmap.len())?;
        self.mmap[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FlashError> {
        self.mmap.flush()?;
        Ok(())
    }
}
