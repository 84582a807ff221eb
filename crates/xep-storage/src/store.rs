//! Allocation-table file store.

use crate::error::{StoreError, StoreResult};
use crate::flash::Flash;
use crate::table::{FileEntry, TableImage, MAX_FILES, TABLE_IMAGE_SIZE};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lock wait before an operation reports [`StoreError::Locked`].
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// Lock wait while [`FileStore::ignore_lock`] is set.
pub const IGNORED_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy)]
struct Slot {
    entry: FileEntry,
    /// Present in the persisted table
    durable: bool,
}

struct StoreState {
    flash: Box<dyn Flash>,
    page_size: u32,
    block_size: u32,
    /// Region size rounded down to whole blocks
    size: u32,
    /// Sorted by offset, disjoint
    slots: Vec<Slot>,
}

impl StoreState {
    fn data_size(&self) -> u32 {
        self.size - self.page_size
    }

    fn find(&self, file_type: u32, identifier: u32) -> StoreResult<usize> {
        self.slots
            .iter()
            .position(|s| s.entry.is(file_type, identifier))
            .ok_or(StoreError::FileNotFound {
                file_type,
                identifier,
            })
    }

    fn data_address(&self, entry: &FileEntry) -> usize {
        (self.page_size + entry.offset) as usize
    }

    /// First gap of at least `size` bytes, scanning from the start.
    fn first_fit(&self, size: u32) -> Option<u32> {
        let mut cursor = 0u32;
        for slot in &self.slots {
            if slot.entry.offset - cursor >= size {
                return Some(cursor);
            }
            cursor = slot.entry.end();
        }
        (self.data_size() - cursor >= size).then_some(cursor)
    }

    fn largest_gap(&self) -> u32 {
        let mut cursor = 0u32;
        let mut largest = 0u32;
        for slot in &self.slots {
            largest = largest.max(slot.entry.offset - cursor);
            cursor = slot.entry.end();
        }
        largest.max(self.data_size() - cursor)
    }

    /// Single page erase + write of the committed entries.
    fn persist(&mut self) -> StoreResult<()> {
        let image = TableImage {
            page_size: self.page_size,
            block_size: self.block_size,
            entries: self
                .slots
                .iter()
                .filter(|s| s.durable)
                .map(|s| s.entry)
                .collect(),
        }
        .encode();

        self.flash.erase(0, self.page_size as usize)?;
        self.flash.write(0, &image)?;
        self.flash.flush()?;
        Ok(())
    }

    fn format(&mut self) -> StoreResult<()> {
        self.slots.clear();
        self.persist()
    }
}

/// Flash file store with a single persisted allocation table.
///
/// All operations serialize on one lock, taken with a bounded wait
/// ([`LOCK_TIMEOUT`]). [`FileStore::ignore_lock`] stretches the wait to
/// [`IGNORED_LOCK_TIMEOUT`] for the crash-dump writer. A holder that never
/// lets go still yields [`StoreError::Locked`].
pub struct FileStore {
    state: Mutex<StoreState>,
    lock_ignored: AtomicBool,
    formatted_on_init: bool,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("lock_ignored", &self.lock_ignored.load(Ordering::Relaxed))
            .field("formatted_on_init", &self.formatted_on_init)
            .finish_non_exhaustive()
    }
}

impl FileStore {
    /// Load the table from `flash`, formatting the region if it fails the
    /// integrity check.
    pub fn init(flash: Box<dyn Flash>) -> StoreResult<Self> {
        let page_size = flash.page_size();
        let block_size = flash.block_size();
        if page_size < TABLE_IMAGE_SIZE || block_size == 0 || block_size % page_size != 0 {
            return Err(StoreError::InvalidParameter);
        }

        let size = flash.size() - flash.size() % block_size;
        if size < page_size * 2 {
            return Err(StoreError::NoFreeSpace {
                requested: (page_size * 2) as u32,
            });
        }
        let size = u32::try_from(size).map_err(|_| StoreError::InvalidParameter)?;

        let mut image = [0u8; TABLE_IMAGE_SIZE];
        flash.read(0, &mut image)?;

        let mut state = StoreState {
            flash,
            page_size: page_size as u32,
            block_size: block_size as u32,
            size,
            slots: Vec::new(),
        };

        let formatted_on_init = match TableImage::decode(
            &image,
            state.page_size,
            state.block_size,
            state.data_size(),
        ) {
            Ok(table) => {
                state.slots = table
                    .entries
                    .into_iter()
                    .map(|entry| Slot {
                        entry,
                        durable: true,
                    })
                    .collect();
                false
            }
            Err(fault) => {
                warn!(?fault, "File table failed integrity check, formatting");
                state.format()?;
                true
            }
        };

        info!(
            files = state.slots.len(),
            size = state.size,
            page_size = state.page_size,
            "File store initialized"
        );

        Ok(Self {
            state: Mutex::new(state),
            lock_ignored: AtomicBool::new(false),
            formatted_on_init,
        })
    }

    /// `true` if [`FileStore::init`] found a corrupt table and formatted.
    #[must_use]
    pub fn formatted_on_init(&self) -> bool {
        self.formatted_on_init
    }

    /// Wait up to [`IGNORED_LOCK_TIMEOUT`] instead of [`LOCK_TIMEOUT`].
    pub fn ignore_lock(&self, ignore: bool) {
        self.lock_ignored.store(ignore, Ordering::Release);
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, StoreState>> {
        let timeout = if self.lock_ignored.load(Ordering::Acquire) {
            IGNORED_LOCK_TIMEOUT
        } else {
            LOCK_TIMEOUT
        };
        self.state.try_lock_for(timeout).ok_or(StoreError::Locked)
    }

    /// Drop every file and persist an empty table.
    pub fn format(&self) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.format()?;
        info!("File store formatted");
        Ok(())
    }

    /// Always [`StoreError::NotImplemented`].
    pub fn defragment(&self) -> StoreResult<()> {
        Err(StoreError::NotImplemented)
    }

    /// Reserve a page-aligned run for a new file in the first large enough
    /// gap. The entry is not persisted until [`FileStore::commit`] or
    /// [`FileStore::sync`].
    pub fn create(&self, file_type: u32, identifier: u32, size: u32) -> StoreResult<()> {
        if size == 0 {
            return Err(StoreError::InvalidParameter);
        }
        let mut state = self.lock()?;

        if state.find(file_type, identifier).is_ok() {
            return Err(StoreError::FileAlreadyExists {
                file_type,
                identifier,
            });
        }
        if state.slots.len() >= MAX_FILES {
            return Err(StoreError::FileEntryFull);
        }

        let allocated_size = size
            .checked_next_multiple_of(state.page_size)
            .ok_or(StoreError::NoFreeSpace { requested: size })?;
        let offset = state.first_fit(allocated_size).ok_or(StoreError::NoFreeSpace {
            requested: allocated_size,
        })?;

        let index = state.slots.partition_point(|s| s.entry.offset < offset);
        state.slots.insert(
            index,
            Slot {
                entry: FileEntry {
                    offset,
                    allocated_size,
                    used_size: size,
                    file_type,
                    identifier,
                },
                durable: false,
            },
        );

        debug!(file_type, identifier, offset, allocated_size, "File created");
        Ok(())
    }

    /// `true` if an entry exists, committed or not.
    pub fn exists(&self, file_type: u32, identifier: u32) -> StoreResult<bool> {
        let state = self.lock()?;
        Ok(state.find(file_type, identifier).is_ok())
    }

    /// `true` if the entry is in the persisted table.
    pub fn is_committed(&self, file_type: u32, identifier: u32) -> StoreResult<bool> {
        let state = self.lock()?;
        let index = state.find(file_type, identifier)?;
        Ok(state.slots[index].durable)
    }

    /// Table entry for a file.
    pub fn entry(&self, file_type: u32, identifier: u32) -> StoreResult<FileEntry> {
        let state = self.lock()?;
        let index = state.find(file_type, identifier)?;
        Ok(state.slots[index].entry)
    }

    /// Erase the file's reserved run.
    pub fn clear(&self, file_type: u32, identifier: u32) -> StoreResult<()> {
        let mut state = self.lock()?;
        let index = state.find(file_type, identifier)?;
        let entry = state.slots[index].entry;
        let address = state.data_address(&entry);
        state.flash.erase(address, entry.allocated_size as usize)?;
        Ok(())
    }

    /// Write `data` at `offset` within the reserved run.
    pub fn write(
        &self,
        file_type: u32,
        identifier: u32,
        data: &[u8],
        offset: u32,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        let index = state.find(file_type, identifier)?;
        let entry = state.slots[index].entry;

        let end = (offset as usize).checked_add(data.len());
        if end.map_or(true, |end| end > entry.allocated_size as usize) {
            return Err(StoreError::InvalidParameter);
        }

        let address = state.data_address(&entry) + offset as usize;
        state.flash.write(address, data)?;
        Ok(())
    }

    /// Write the whole file and persist the table.
    ///
    /// `data` must be exactly the size given at creation.
    pub fn commit(&self, file_type: u32, identifier: u32, data: &[u8]) -> StoreResult<()> {
        let mut state = self.lock()?;
        let index = state.find(file_type, identifier)?;
        let entry = state.slots[index].entry;
        if entry.used_size as usize != data.len() {
            return Err(StoreError::InvalidParameter);
        }

        let address = state.data_address(&entry);
        state.flash.erase(address, entry.allocated_size as usize)?;
        state.flash.write(address, data)?;

        state.slots[index].durable = true;
        if let Err(err) = state.persist() {
            state.slots[index].durable = false;
            return Err(err);
        }

        debug!(file_type, identifier, size = data.len(), "File committed");
        Ok(())
    }

    /// Persist the table for a file whose data was written piecewise.
    pub fn sync(&self, file_type: u32, identifier: u32) -> StoreResult<()> {
        let mut state = self.lock()?;
        let index = state.find(file_type, identifier)?;
        if state.slots[index].durable {
            state.flash.flush()?;
            return Ok(());
        }

        state.slots[index].durable = true;
        if let Err(err) = state.persist() {
            state.slots[index].durable = false;
            return Err(err);
        }
        debug!(file_type, identifier, "File synced");
        Ok(())
    }

    /// Remove a file; the table is re-persisted if it was committed.
    pub fn delete(&self, file_type: u32, identifier: u32) -> StoreResult<()> {
        let mut state = self.lock()?;
        let index = state.find(file_type, identifier)?;
        let slot = state.slots.remove(index);
        if slot.durable {
            if let Err(err) = state.persist() {
                state.slots.insert(index, slot);
                return Err(err);
            }
        }
        debug!(file_type, identifier, "File deleted");
        Ok(())
    }

    /// Size given at creation.
    pub fn size(&self, file_type: u32, identifier: u32) -> StoreResult<u32> {
        Ok(self.entry(file_type, identifier)?.used_size)
    }

    /// Read up to `max_len` bytes from `offset`, clamped to the file size.
    ///
    /// `offset` must be 4-byte aligned.
    pub fn read(
        &self,
        file_type: u32,
        identifier: u32,
        offset: u32,
        max_len: u32,
    ) -> StoreResult<Vec<u8>> {
        if offset % 4 != 0 {
            return Err(StoreError::InvalidParameter);
        }
        let state = self.lock()?;
        let index = state.find(file_type, identifier)?;
        let entry = state.slots[index].entry;

        let len = entry.used_size.saturating_sub(offset).min(max_len) as usize;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| StoreError::OutOfMemory)?;
        buf.resize(len, 0);
        state
            .flash
            .read(state.data_address(&entry) + offset as usize, &mut buf)?;
        Ok(buf)
    }

    /// Overwrite part of a file. `offset` must be 4-byte aligned and the
    /// range must lie within the file size.
    pub fn set_file_data(
        &self,
        file_type: u32,
        identifier: u32,
        offset: u32,
        data: &[u8],
    ) -> StoreResult<()> {
        if offset % 4 != 0 {
            return Err(StoreError::InvalidParameter);
        }
        let size = self.size(file_type, identifier)?;
        if offset as usize + data.len() > size as usize {
            return Err(StoreError::InvalidParameter);
        }
        self.write(file_type, identifier, data, offset)
    }

    /// `(type, identifier)` of every entry, in table order.
    pub fn find_all_files(&self) -> StoreResult<Vec<(u32, u32)>> {
        let state = self.lock()?;
        Ok(state
            .slots
            .iter()
            .map(|s| (s.entry.file_type, s.entry.identifier))
            .collect())
    }

    /// Identifiers of every entry of `file_type`.
    pub fn search_for_files_of_type(&self, file_type: u32) -> StoreResult<Vec<u32>> {
        let state = self.lock()?;
        Ok(state
            .slots
            .iter()
            .filter(|s| s.entry.file_type == file_type)
            .map(|s| s.entry.identifier)
            .collect())
    }

    /// Largest contiguous free gap in the data area.
    pub fn largest_free_size(&self) -> StoreResult<u32> {
        let state = self.lock()?;
        Ok(state.largest_gap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::MemFlash;
    use std::sync::Arc;
    use tracing_test::traced_test;

    const PAGE: usize = 512;
    const USER: u32 = 0x8000_0000;

    fn flash() -> MemFlash {
        // 16 pages: 1 table page + 15 data pages
        MemFlash::new(16 * PAGE, PAGE, 4 * PAGE)
    }

    fn store(flash: &MemFlash) -> FileStore {
        FileStore::init(Box::new(flash.clone())).unwrap()
    }

    #[test]
    fn test_blank_flash_is_formatted() {
        let flash = flash();
        let store = store(&flash);
        assert!(store.formatted_on_init());
        assert_eq!(store.largest_free_size().unwrap(), 15 * PAGE as u32);

        let store = self::store(&flash);
        assert!(!store.formatted_on_init());
    }

    #[test]
    fn test_round_trip_survives_restart() {
        let flash = flash();
        let data: Vec<u8> = (0..700u32).map(|i| i as u8).collect();
        {
            let store = store(&flash);
            store.create(USER, 3, 700).unwrap();
            store.clear(USER, 3).unwrap();
            store.write(USER, 3, &data, 0).unwrap();
            store.commit(USER, 3, &data).unwrap();
        }

        let store = store(&flash);
        assert_eq!(store.read(USER, 3, 0, 700).unwrap(), data);
        assert_eq!(store.entry(USER, 3).unwrap().allocated_size, 1024);
    }

    #[test]
    fn test_uncommitted_create_is_lost_on_restart() {
        let flash = flash();
        {
            let store = store(&flash);
            store.create(USER, 1, 16).unwrap();
            store.clear(USER, 1).unwrap();
            store.write(USER, 1, &[1; 16], 0).unwrap();
            assert!(!store.is_committed(USER, 1).unwrap());
        }
        let store = store(&flash);
        assert!(!store.exists(USER, 1).unwrap());
        assert_eq!(store.largest_free_size().unwrap(), 15 * PAGE as u32);
    }

    #[test]
    fn test_power_loss_before_table_write_keeps_old_state() {
        let flash = flash();
        {
            let store = store(&flash);
            store.create(USER, 1, 4).unwrap();
            store.commit(USER, 1, &[1, 2, 3, 4]).unwrap();

            store.create(USER, 2, 4).unwrap();
            // Data erase + write succeed, table erase fails
            flash.cut_power_after(2);
            assert!(matches!(
                store.commit(USER, 2, &[5, 6, 7, 8]),
                Err(StoreError::Storage(_))
            ));
        }
        flash.restore_power();

        let store = store(&flash);
        assert!(!store.formatted_on_init());
        assert_eq!(store.find_all_files().unwrap(), vec![(USER, 1)]);
    }

    #[test]
    #[traced_test]
    fn test_power_loss_during_table_write_formats() {
        let flash = flash();
        {
            let store = store(&flash);
            store.create(USER, 1, 4).unwrap();
            // Data erase, data write and table erase succeed
            flash.cut_power_after(3);
            assert!(store.commit(USER, 1, &[1, 2, 3, 4]).is_err());
        }
        flash.restore_power();

        let store = store(&flash);
        assert!(store.formatted_on_init());
        assert!(store.find_all_files().unwrap().is_empty());
        assert!(logs_contain("integrity check"));
    }

    #[test]
    fn test_flipped_crc_forces_format() {
        let flash = flash();
        {
            let store = store(&flash);
            store.create(USER, 1, 4).unwrap();
            store.commit(USER, 1, &[1, 2, 3, 4]).unwrap();
        }
        flash.corrupt(8);

        let store = store(&flash);
        assert!(store.formatted_on_init());
        assert!(!store.exists(USER, 1).unwrap());
    }

    #[test]
    fn test_create_errors() {
        let store = store(&flash());
        assert!(matches!(
            store.create(USER, 0, 0),
            Err(StoreError::InvalidParameter)
        ));

        store.create(USER, 0, 1).unwrap();
        assert!(matches!(
            store.create(USER, 0, 1),
            Err(StoreError::FileAlreadyExists { .. })
        ));
        assert!(matches!(
            store.create(USER, 1, 15 * PAGE as u32),
            Err(StoreError::NoFreeSpace { requested }) if requested == 15 * PAGE as u32
        ));
    }

    #[test]
    fn test_table_full() {
        let flash = MemFlash::new(32 * PAGE, PAGE, PAGE);
        let store = FileStore::init(Box::new(flash)).unwrap();
        for id in 0..MAX_FILES as u32 {
            store.create(USER, id, 1).unwrap();
        }
        assert!(matches!(
            store.create(USER, 99, 1),
            Err(StoreError::FileEntryFull)
        ));
    }

    #[test]
    fn test_first_fit_reuses_leading_gap() {
        let store = store(&flash());
        store.create(USER, 0, PAGE as u32).unwrap();
        store.create(USER, 1, 2 * PAGE as u32).unwrap();
        store.create(USER, 2, PAGE as u32).unwrap();
        store.delete(USER, 1).unwrap();

        // Gap of two pages at offset 512 is taken before the tail
        store.create(USER, 3, 100).unwrap();
        assert_eq!(store.entry(USER, 3).unwrap().offset, PAGE as u32);
        assert_eq!(
            store.find_all_files().unwrap(),
            vec![(USER, 0), (USER, 3), (USER, 2)]
        );
        assert_eq!(store.largest_free_size().unwrap(), 11 * PAGE as u32);
    }

    #[test]
    fn test_read_alignment_and_clamp() {
        let store = store(&flash());
        store.create(USER, 0, 10).unwrap();
        store.commit(USER, 0, b"0123456789").unwrap();

        assert!(matches!(
            store.read(USER, 0, 2, 4),
            Err(StoreError::InvalidParameter)
        ));
        assert_eq!(store.read(USER, 0, 4, 100).unwrap(), b"456789");
        assert!(store.read(USER, 0, 12, 100).unwrap().is_empty());
    }

    #[test]
    fn test_set_file_data_then_sync() {
        let flash = flash();
        {
            let store = store(&flash);
            store.create(USER, 5, 8).unwrap();
            store.clear(USER, 5).unwrap();
            store.set_file_data(USER, 5, 0, b"abcd").unwrap();
            store.set_file_data(USER, 5, 4, b"efgh").unwrap();
            assert!(matches!(
                store.set_file_data(USER, 5, 8, b"x"),
                Err(StoreError::InvalidParameter)
            ));
            store.sync(USER, 5).unwrap();
        }
        let store = store(&flash);
        assert_eq!(store.read(USER, 5, 0, 8).unwrap(), b"abcdefgh");
    }

    #[test]
    fn test_commit_size_must_match() {
        let store = store(&flash());
        store.create(USER, 0, 4).unwrap();
        assert!(matches!(
            store.commit(USER, 0, &[1, 2]),
            Err(StoreError::InvalidParameter)
        ));
    }

    #[test]
    fn test_search_for_files_of_type() {
        let store = store(&flash());
        store.create(1, 10, 1).unwrap();
        store.create(2, 20, 1).unwrap();
        store.create(1, 11, 1).unwrap();
        assert_eq!(store.search_for_files_of_type(1).unwrap(), vec![10, 11]);
        assert!(store.search_for_files_of_type(3).unwrap().is_empty());
    }

    #[test]
    fn test_lock_timeout() {
        let store = Arc::new(store(&flash()));
        let guard = store.state.lock();

        let other = Arc::clone(&store);
        let result = std::thread::spawn(move || other.exists(USER, 0))
            .join()
            .unwrap();
        assert!(matches!(result, Err(StoreError::Locked)));
        drop(guard);

        assert!(!store.exists(USER, 0).unwrap());
    }

    #[test]
    fn test_ignored_lock_wait_is_bounded() {
        let store = Arc::new(store(&flash()));
        store.ignore_lock(true);
        let guard = store.state.lock();

        let other = Arc::clone(&store);
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(other.largest_free_size());
        });
        let result = rx.recv_timeout(IGNORED_LOCK_TIMEOUT * 3).unwrap();
        assert!(matches!(result, Err(StoreError::Locked)));
        drop(guard);

        assert_eq!(store.largest_free_size().unwrap(), 15 * PAGE as u32);
        store.ignore_lock(false);
    }

    #[test]
    fn test_region_too_small() {
        let flash = MemFlash::new(PAGE, PAGE, PAGE);
        assert!(matches!(
            FileStore::init(Box::new(flash)),
            Err(StoreError::NoFreeSpace { .. })
        ));
    }

    #[test]
    fn test_defragment_not_implemented() {
        let store = store(&flash());
        assert_eq!(store.defragment().unwrap_err().code(), 8);
    }
}
