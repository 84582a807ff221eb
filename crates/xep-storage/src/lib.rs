//! Flash file storage.
//!
//! Two layers:
//!
//! - [`FileStore`]: a sorted allocation table of at most [`MAX_FILES`] entries
//!   in the first page of a flash region, followed by the data area. Files are
//!   identified by `(type, identifier)` and occupy one contiguous, page-aligned
//!   run each. The table is persisted with a single page erase + write and
//!   protected by a CRC; a table that fails its integrity check on start-up is
//!   reformatted.
//! - [`FileSystem`]: open-file handles on top of the store, at most
//!   [`MAX_OPEN_FILES`] at a time.
//!
//! # File lifecycle
//!
//! ```text
//! create ──► clear ──► write ... ──► commit / sync ──► (delete)
//!   (RAM only)                        (table persisted)
//! ```
//!
//! A file that was created but never committed is not in the persisted table;
//! after a restart it is gone and its space is free again.
//!
//! # Example
//!
//! ```
//! use xep_storage::{FileStore, MemFlash};
//!
//! let flash = MemFlash::new(64 * 1024, 512, 4096);
//! let store = FileStore::init(Box::new(flash.clone())).unwrap();
//! store.create(0x8000_0000, 1, 5).unwrap();
//! store.commit(0x8000_0000, 1, b"hello").unwrap();
//!
//! // Same flash, fresh start-up
//! let store = FileStore::init(Box::new(flash)).unwrap();
//! assert_eq!(store.read(0x8000_0000, 1, 0, 16).unwrap(), b"hello");
//! ```

mod error;
mod file;
mod flash;
mod store;
mod table;

pub use error::{FileError, FileResult, FlashError, StoreError, StoreResult};
pub use file::{file_type, FileHandle, FileSystem, FORMAT_KEY, MAX_OPEN_FILES};
pub use flash::{Flash, MemFlash, MmapFlash};
pub use store::{FileStore, IGNORED_LOCK_TIMEOUT, LOCK_TIMEOUT};
pub use table::{FileEntry, MAX_FILES, TABLE_IMAGE_SIZE};
