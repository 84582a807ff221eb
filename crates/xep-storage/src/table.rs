//! On-flash allocation table image.
//!
//! ```text
//! offset  field
//! 0       u32 magic
//! 4       u32 version
//! 8       u32 crc
//! 12      u32 page_size
//! 16      u32 block_size
//! 20      u32 entry_count
//! 24      20 x {u32 offset, u32 allocated, u32 used, u32 type, u32 identifier}
//! 424     0xFF up to 512
//! ```
//!
//! The CRC is CRC-32 over the 512-byte image with the crc field set to
//! `0xFFFFFFFF`, followed by `0xFF` padding up to one page.

use crc::{Crc, CRC_32_ISO_HDLC};

/// Table header magic, `"$XFS"`.
pub const MAGIC: u32 = 0x2458_4653;

/// Table layout version.
pub const VERSION: u32 = 1;

/// Maximum number of files in the table.
pub const MAX_FILES: usize = 20;

/// Bytes of the table image written to flash.
pub const TABLE_IMAGE_SIZE: usize = 512;

const CRC_OFFSET: usize = 8;
const ENTRIES_OFFSET: usize = 24;
const ENTRY_SIZE: usize = 20;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One allocation table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    /// Offset from the start of the data area.
    pub offset: u32,
    /// Page-aligned reserved size.
    pub allocated_size: u32,
    /// Size given at creation.
    pub used_size: u32,
    /// File type.
    pub file_type: u32,
    /// Identifier within the type.
    pub identifier: u32,
}

impl FileEntry {
    /// First byte past the reserved run.
    #[must_use]
    pub fn end(&self) -> u32 {
        self.offset + self.allocated_size
    }

    /// `true` for the entry with this type and identifier.
    #[must_use]
    pub fn is(&self, file_type: u32, identifier: u32) -> bool {
        self.file_type == file_type && self.identifier == identifier
    }
}

/// Decoded table contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableImage {
    pub page_size: u32,
    pub block_size: u32,
    pub entries: Vec<FileEntry>,
}

/// Why an image was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageFault {
    Magic,
    Version,
    Crc,
    Geometry,
    Entries,
}

impl TableImage {
    pub fn encode(&self) -> [u8; TABLE_IMAGE_SIZE] {
        let mut img = [0xFFu8; TABLE_IMAGE_SIZE];
        put(&mut img, 0, MAGIC);
        put(&mut img, 4, VERSION);
        put(&mut img, 12, self.page_size);
        put(&mut img, 16, self.block_size);
        put(&mut img, 20, self.entries.len() as u32);
        for (i, e) in self.entries.iter().take(MAX_FILES).enumerate() {
            let at = ENTRIES_OFFSET + i * ENTRY_SIZE;
            put(&mut img, at, e.offset);
            put(&mut img, at + 4, e.allocated_size);
            put(&mut img, at + 8, e.used_size);
            put(&mut img, at + 12, e.file_type);
            put(&mut img, at + 16, e.identifier);
        }
        let crc = checksum(&img, self.page_size as usize);
        put(&mut img, CRC_OFFSET, crc);
        img
    }

    /// Validate and decode an image read from flash.
    ///
    /// `data_size` is the length of the data area; every entry must lie
    /// within it, and entries must be sorted and disjoint.
    pub fn decode(
        img: &[u8; TABLE_IMAGE_SIZE],
        page_size: u32,
        block_size: u32,
        data_size: u32,
    ) -> Result<Self, ImageFault> {
        if get(img, 0) != MAGIC {
            return Err(ImageFault::Magic);
        }
        if get(img, 4) != VERSION {
            return Err(ImageFault::Version);
        }

        let stored = get(img, CRC_OFFSET);
        let mut scratch = *img;
        put(&mut scratch, CRC_OFFSET, 0xFFFF_FFFF);
        if checksum(&scratch, page_size as usize) != stored {
            return Err(ImageFault::Crc);
        }

        if get(img, 12) != page_size || get(img, 16) != block_size {
            return Err(ImageFault::Geometry);
        }

        let count = get(img, 20) as usize;
        if count > MAX_FILES {
            return Err(ImageFault::Entries);
        }
        let mut entries: Vec<FileEntry> = Vec::with_capacity(count);
        for i in 0..count {
            let at = ENTRIES_OFFSET + i * ENTRY_SIZE;
            let e = FileEntry {
                offset: get(img, at),
                allocated_size: get(img, at + 4),
                used_size: get(img, at + 8),
                file_type: get(img, at + 12),
                identifier: get(img, at + 16),
            };
            let in_bounds = e
                .offset
                .checked_add(e.allocated_size)
                .is_some_and(|end| end <= data_size);
            let ordered = entries.last().map_or(true, |prev| prev.end() <= e.offset);
            if !in_bounds || !ordered || e.used_size > e.allocated_size {
                return Err(ImageFault::Entries);
            }
            entries.push(e);
        }

        Ok(Self {
            page_size,
            block_size,
            entries,
        })
    }
}

fn checksum(img: &[u8; TABLE_IMAGE_SIZE], page_size: usize) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(img);
    let pad = [0xFFu8; 64];
    let mut remaining = page_size.saturating_sub(TABLE_IMAGE_SIZE);
    while remaining > 0 {
        let n = remaining.min(pad.len());
        digest.update(&pad[..n]);
        remaining -= n;
    }
    digest.finalize()
}

fn put(img: &mut [u8; TABLE_IMAGE_SIZE], at: usize, value: u32) {
    img[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn get(img: &[u8; TABLE_IMAGE_SIZE], at: usize) -> u32 {
    u32::from_le_bytes([img[at], img[at + 1], img[at + 2], img[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableImage {
        TableImage {
            page_size: 512,
            block_size: 4096,
            entries: vec![
                FileEntry {
                    offset: 0,
                    allocated_size: 512,
                    used_size: 100,
                    file_type: 1,
                    identifier: 0,
                },
                FileEntry {
                    offset: 1024,
                    allocated_size: 1024,
                    used_size: 1024,
                    file_type: 2,
                    identifier: 7,
                },
            ],
        }
    }

    #[test]
    fn test_decode_encoded_table() {
        let table = sample();
        let img = table.encode();
        assert_eq!(TableImage::decode(&img, 512, 4096, 8192), Ok(table));
    }

    #[test]
    fn test_flipped_bit_fails_crc() {
        let mut img = sample().encode();
        img[30] ^= 0x01;
        assert_eq!(
            TableImage::decode(&img, 512, 4096, 8192),
            Err(ImageFault::Crc)
        );
    }

    #[test]
    fn test_erased_flash_fails_magic() {
        let img = [0xFFu8; TABLE_IMAGE_SIZE];
        assert_eq!(
            TableImage::decode(&img, 512, 4096, 8192),
            Err(ImageFault::Magic)
        );
    }

    #[test]
    fn test_geometry_mismatch() {
        let img = sample().encode();
        // The pad length is part of the crc, so a different page size also
        // fails the crc before the geometry check.
        assert!(TableImage::decode(&img, 1024, 4096, 8192).is_err());
        assert_eq!(
            TableImage::decode(&img, 512, 8192, 8192),
            Err(ImageFault::Geometry)
        );
    }

    #[test]
    fn test_entry_outside_data_area() {
        let img = sample().encode();
        assert_eq!(
            TableImage::decode(&img, 512, 4096, 1536),
            Err(ImageFault::Entries)
        );
    }
}
