//! Open-file handles over the [`FileStore`].

use crate::error::{FileError, FileResult, StoreError};
use crate::store::FileStore;
use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Maximum number of simultaneously open files.
pub const MAX_OPEN_FILES: usize = 10;

/// Key required by [`FileSystem::format`].
pub const FORMAT_KEY: u32 = 0x427F_00C9;

const LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// Well-known file types.
pub mod file_type {
    /// Crash dump written by housekeeping
    pub const CRASHDUMP: u32 = 0x0455_4D50;
    /// Profile parameter file
    pub const PARFILE: u32 = 0x037D_D98C;
    /// Stored slow noise map
    pub const NOISEMAP_SLOW: u32 = 0x05F0_9BCA;
    /// Stored fast noise map
    pub const NOISEMAP_FAST: u32 = 0x05F0_9BCB;
    /// Start of the user-defined range
    pub const USER_DEFINED: u32 = 0x8000_0000;
}

/// Handle of an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    slot: usize,
    /// File type
    pub file_type: u32,
    /// File identifier
    pub identifier: u32,
}

#[derive(Debug, Clone, Copy)]
struct OpenFile {
    file_type: u32,
    identifier: u32,
    size: u32,
}

/// File system with a fixed table of open files.
///
/// A file system without a store answers every call with
/// [`FileError::SystemNotInitialized`].
#[derive(Debug)]
pub struct FileSystem {
    store: Option<FileStore>,
    open: Mutex<[Option<OpenFile>; MAX_OPEN_FILES]>,
}

impl FileSystem {
    /// File system over an initialized store.
    #[must_use]
    pub fn new(store: FileStore) -> Self {
        Self {
            store: Some(store),
            open: Mutex::new([None; MAX_OPEN_FILES]),
        }
    }

    /// File system whose store failed to initialize.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            store: None,
            open: Mutex::new([None; MAX_OPEN_FILES]),
        }
    }

    /// Underlying store, if any.
    #[must_use]
    pub fn store(&self) -> Option<&FileStore> {
        self.store.as_ref()
    }

    fn require_store(&self) -> FileResult<&FileStore> {
        self.store.as_ref().ok_or(FileError::SystemNotInitialized)
    }

    fn lock(&self) -> FileResult<MutexGuard<'_, [Option<OpenFile>; MAX_OPEN_FILES]>> {
        self.open.try_lock_for(LOCK_TIMEOUT).ok_or(FileError::Locked)
    }

    fn is_open(table: &[Option<OpenFile>], file_type: u32, identifier: u32) -> bool {
        table
            .iter()
            .flatten()
            .any(|f| f.file_type == file_type && f.identifier == identifier)
    }

    fn claim_slot(
        table: &mut [Option<OpenFile>; MAX_OPEN_FILES],
        file: OpenFile,
    ) -> FileResult<FileHandle> {
        if Self::is_open(table, file.file_type, file.identifier) {
            return Err(FileError::FileAlreadyOpen);
        }
        let slot = table
            .iter()
            .position(Option::is_none)
            .ok_or(FileError::TooManyFilesOpen)?;
        table[slot] = Some(file);
        Ok(FileHandle {
            slot,
            file_type: file.file_type,
            identifier: file.identifier,
        })
    }

    fn check_open(
        table: &[Option<OpenFile>; MAX_OPEN_FILES],
        handle: FileHandle,
    ) -> FileResult<OpenFile> {
        match table.get(handle.slot).copied().flatten() {
            Some(f) if f.file_type == handle.file_type && f.identifier == handle.identifier => {
                Ok(f)
            }
            _ => Err(FileError::FileNotOpen),
        }
    }

    /// Create a file of `size` bytes, erase its run and open it.
    pub fn create_and_open_empty(
        &self,
        file_type: u32,
        identifier: u32,
        size: u32,
    ) -> FileResult<FileHandle> {
        let store = self.require_store()?;
        let mut table = self.lock()?;

        let handle = Self::claim_slot(
            &mut table,
            OpenFile {
                file_type,
                identifier,
                size,
            },
        )?;

        if let Err(err) = store
            .create(file_type, identifier, size)
            .and_then(|()| store.clear(file_type, identifier))
        {
            table[handle.slot] = None;
            return Err(err.into());
        }

        debug!(file_type, identifier, size, "File created and opened");
        Ok(handle)
    }

    /// Create a file holding `data` and open it.
    pub fn create_and_open(
        &self,
        file_type: u32,
        identifier: u32,
        data: &[u8],
    ) -> FileResult<FileHandle> {
        let size = u32::try_from(data.len()).map_err(|_| FileError::InvalidParameter)?;
        let handle = self.create_and_open_empty(file_type, identifier, size)?;
        self.write(handle, data, 0)?;
        Ok(handle)
    }

    /// Open an existing file.
    pub fn open(&self, file_type: u32, identifier: u32) -> FileResult<FileHandle> {
        let store = self.require_store()?;
        let mut table = self.lock()?;

        if Self::is_open(table.as_slice(), file_type, identifier) {
            return Err(FileError::FileAlreadyOpen);
        }
        let size = match store.size(file_type, identifier) {
            Ok(size) => size,
            Err(StoreError::FileNotFound { .. }) => return Err(FileError::FileNotFound),
            Err(err) => return Err(FileError::UnknownFailure(err)),
        };

        Self::claim_slot(
            &mut table,
            OpenFile {
                file_type,
                identifier,
                size,
            },
        )
    }

    /// Handle of an already open file.
    pub fn get_handle(&self, file_type: u32, identifier: u32) -> FileResult<FileHandle> {
        let table = self.lock()?;
        table
            .iter()
            .enumerate()
            .find_map(|(slot, f)| match f {
                Some(f) if f.file_type == file_type && f.identifier == identifier => {
                    Some(FileHandle {
                        slot,
                        file_type,
                        identifier,
                    })
                }
                _ => None,
            })
            .ok_or(FileError::FileNotOpen)
    }

    /// Size of an open file.
    pub fn handle_size(&self, handle: FileHandle) -> FileResult<u32> {
        let table = self.lock()?;
        Ok(Self::check_open(&table, handle)?.size)
    }

    /// Whole contents of an open file.
    pub fn read_buffer(&self, handle: FileHandle) -> FileResult<Vec<u8>> {
        let store = self.require_store()?;
        let table = self.lock()?;
        let file = Self::check_open(&table, handle)?;
        Ok(store.read(file.file_type, file.identifier, 0, file.size)?)
    }

    /// Erase an open file.
    pub fn clear(&self, handle: FileHandle) -> FileResult<()> {
        let store = self.require_store()?;
        let table = self.lock()?;
        let file = Self::check_open(&table, handle)?;
        store.clear(file.file_type, file.identifier)?;
        Ok(())
    }

    /// Write into an open file.
    pub fn write(&self, handle: FileHandle, data: &[u8], offset: u32) -> FileResult<()> {
        let store = self.require_store()?;
        let table = self.lock()?;
        let file = Self::check_open(&table, handle)?;
        store.write(file.file_type, file.identifier, data, offset)?;
        Ok(())
    }

    /// Close a file.
    ///
    /// With `commit` the file's table entry is persisted. Without it, a file
    /// that was never committed is discarded; committed files are kept.
    pub fn close(&self, handle: FileHandle, commit: bool) -> FileResult<()> {
        let store = self.require_store()?;
        let mut table = self.lock()?;
        let file = Self::check_open(&table, handle)?;

        if commit {
            store.sync(file.file_type, file.identifier)?;
        } else if !store.is_committed(file.file_type, file.identifier)? {
            store.delete(file.file_type, file.identifier)?;
            debug!(
                file_type = file.file_type,
                identifier = file.identifier,
                "Uncommitted file discarded"
            );
        }

        table[handle.slot] = None;
        Ok(())
    }

    /// Delete a closed file.
    pub fn delete(&self, file_type: u32, identifier: u32) -> FileResult<()> {
        let store = self.require_store()?;
        let table = self.lock()?;
        if Self::is_open(table.as_slice(), file_type, identifier) {
            return Err(FileError::FileAlreadyOpen);
        }
        store.delete(file_type, identifier)?;
        Ok(())
    }

    /// Close every file and format the store.
    pub fn format(&self, key: u32) -> FileResult<()> {
        if key != FORMAT_KEY {
            return Err(FileError::InvalidParameter);
        }
        let store = self.require_store()?;
        let mut table = self.lock()?;
        *table = [None; MAX_OPEN_FILES];
        store.format()?;
        Ok(())
    }

    /// `(type, identifier)` of every file.
    pub fn find_all_files(&self) -> FileResult<Vec<(u32, u32)>> {
        Ok(self.require_store()?.find_all_files()?)
    }

    /// Identifiers of every file of `file_type`.
    pub fn search_for_files_of_type(&self, file_type: u32) -> FileResult<Vec<u32>> {
        Ok(self.require_store()?.search_for_files_of_type(file_type)?)
    }

    /// Size of a file, open or not.
    pub fn size(&self, file_type: u32, identifier: u32) -> FileResult<u32> {
        Ok(self.require_store()?.size(file_type, identifier)?)
    }

    /// Largest contiguous free gap.
    pub fn largest_free_size(&self) -> FileResult<u32> {
        Ok(self.require_store()?.largest_free_size()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::MemFlash;

    const USER: u32 = file_type::USER_DEFINED;

    fn fs_on(flash: &MemFlash) -> FileSystem {
        FileSystem::new(FileStore::init(Box::new(flash.clone())).unwrap())
    }

    fn flash() -> MemFlash {
        MemFlash::new(32 * 512, 512, 4096)
    }

    #[test]
    fn test_create_write_close_commit() {
        let flash = flash();
        {
            let fs = fs_on(&flash);
            let h = fs.create_and_open_empty(USER, 1, 8).unwrap();
            fs.write(h, b"abcd", 0).unwrap();
            fs.write(h, b"efgh", 4).unwrap();
            fs.close(h, true).unwrap();
        }
        let fs = fs_on(&flash);
        let h = fs.open(USER, 1).unwrap();
        assert_eq!(fs.read_buffer(h).unwrap(), b"abcdefgh");
        assert_eq!(fs.handle_size(h).unwrap(), 8);
    }

    #[test]
    fn test_close_without_commit_discards_new_file() {
        let fs = fs_on(&flash());
        let h = fs.create_and_open(USER, 2, b"data").unwrap();
        fs.close(h, false).unwrap();
        assert!(matches!(fs.size(USER, 2), Err(FileError::FileNotFound)));

        let h = fs.create_and_open(USER, 3, b"keep").unwrap();
        fs.close(h, true).unwrap();
        let h = fs.open(USER, 3).unwrap();
        fs.close(h, false).unwrap();
        assert_eq!(fs.size(USER, 3).unwrap(), 4);
    }

    #[test]
    fn test_open_twice() {
        let fs = fs_on(&flash());
        let h = fs.create_and_open(USER, 1, b"x").unwrap();
        assert!(matches!(fs.open(USER, 1), Err(FileError::FileAlreadyOpen)));
        assert!(matches!(
            fs.create_and_open_empty(USER, 1, 1),
            Err(FileError::FileAlreadyOpen)
        ));
        assert_eq!(fs.get_handle(USER, 1).unwrap(), h);
    }

    #[test]
    fn test_delete_open_file_refused() {
        let fs = fs_on(&flash());
        let h = fs.create_and_open(USER, 1, b"x").unwrap();
        assert!(matches!(
            fs.delete(USER, 1),
            Err(FileError::FileAlreadyOpen)
        ));
        fs.close(h, true).unwrap();
        fs.delete(USER, 1).unwrap();
        assert!(matches!(fs.delete(USER, 1), Err(FileError::FileNotFound)));
    }

    #[test]
    fn test_too_many_open_files() {
        let fs = fs_on(&flash());
        for id in 0..MAX_OPEN_FILES as u32 {
            fs.create_and_open_empty(USER, id, 4).unwrap();
        }
        assert!(matches!(
            fs.create_and_open_empty(USER, 99, 4),
            Err(FileError::TooManyFilesOpen)
        ));
    }

    #[test]
    fn test_failed_create_releases_slot() {
        let fs = fs_on(&flash());
        assert!(matches!(
            fs.create_and_open_empty(USER, 1, 1 << 20),
            Err(FileError::SystemFull)
        ));
        assert!(matches!(fs.get_handle(USER, 1), Err(FileError::FileNotOpen)));
    }

    #[test]
    fn test_stale_handle() {
        let fs = fs_on(&flash());
        let h = fs.create_and_open(USER, 1, b"x").unwrap();
        fs.close(h, true).unwrap();
        assert!(matches!(fs.read_buffer(h), Err(FileError::FileNotOpen)));
        assert!(matches!(fs.close(h, true), Err(FileError::FileNotOpen)));
    }

    #[test]
    fn test_format_requires_key_and_closes_files() {
        let fs = fs_on(&flash());
        let h = fs.create_and_open(USER, 1, b"x").unwrap();
        fs.close(h, true).unwrap();
        fs.create_and_open(USER, 2, b"y").unwrap();

        assert!(matches!(fs.format(0), Err(FileError::InvalidParameter)));
        fs.format(FORMAT_KEY).unwrap();
        assert!(fs.find_all_files().unwrap().is_empty());
        assert!(matches!(fs.get_handle(USER, 2), Err(FileError::FileNotOpen)));
    }

    #[test]
    fn test_detached() {
        let fs = FileSystem::detached();
        assert!(matches!(
            fs.find_all_files(),
            Err(FileError::SystemNotInitialized)
        ));
        assert_eq!(fs.open(USER, 1).unwrap_err().code(), 8);
    }
}
