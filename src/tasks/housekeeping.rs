//! Crash dumps.
//!
//! A crash dump is a single `CRASHDUMP` file (identifier 0) holding a small
//! binary record of the system state at the time of the failure:
//!
//! ```text
//! 0x10 0x02 reset_reason opmode
//! app_info[100] info[100]
//! crash_reason:u32 reset_count:u32 uptime_us:u64
//! -- full dumps only --
//! pool_count:u32 min_free:u32 * pool_count
//! task_count:u32 { name[16] ticks_left:i32 timeout_ms:u32 } * task_count
//! ```
//!
//! All integers are little-endian. Strings are zero padded and truncated.

use crate::error::{XepError, XepResult};
use crate::system::{ResetReason, SystemControl};
use crate::tasks::monitor::{Monitor, TaskStatus};
use bytes::BufMut;
use std::sync::Arc;
use tracing::{debug, info, warn};
use xep_dispatch::Dispatcher;
use xep_storage::{file_type, FileError, FileSystem, StoreError};

/// Upper bound on a crash dump, further capped by the store's free space.
pub const MAX_CRASH_DUMP_SIZE: usize = 16 * 1024;

/// Identifier of the crash dump file.
pub const CRASH_DUMP_ID: u32 = 0;

const DUMP_MAGIC: [u8; 2] = [0x10, 0x02];
const INFO_LEN: usize = 100;
const TASK_NAME_LEN: usize = 16;

/// Inputs of one crash dump.
#[derive(Debug, Clone)]
pub struct CrashRecord<'a> {
    /// Reason the previous run ended
    pub reset_reason: ResetReason,
    /// Operating mode code
    pub operation_mode: u8,
    /// Firmware identification
    pub app_info: &'a str,
    /// Free text describing the crash
    pub info: &'a str,
    /// Reason code of this crash
    pub crash_reason: ResetReason,
    /// Resets since power-on
    pub reset_count: u32,
    /// Microseconds since boot
    pub uptime_us: u64,
}

fn put_padded(buf: &mut Vec<u8>, text: &str, len: usize) {
    let raw = text.as_bytes();
    let n = raw.len().min(len);
    buf.put_slice(&raw[..n]);
    buf.put_bytes(0, len - n);
}

/// Serialize a crash dump.
///
/// Fails with [`StoreError::NoFreeSpace`] if the record is larger than
/// `max_size`; a dump is stored whole or not at all.
pub fn build_crash_dump(
    record: &CrashRecord<'_>,
    full: Option<(&[u32], &[TaskStatus])>,
    max_size: usize,
) -> XepResult<Vec<u8>> {
    let size = crash_dump_size(full.map(|(pools, tasks)| (pools.len(), tasks.len())));
    if size > max_size {
        return Err(StoreError::NoFreeSpace {
            requested: size as u32,
        }
        .into());
    }

    let mut buf = Vec::with_capacity(size);
    buf.put_slice(&DUMP_MAGIC);
    buf.put_u8(record.reset_reason as u8);
    buf.put_u8(record.operation_mode);
    put_padded(&mut buf, record.app_info, INFO_LEN);
    put_padded(&mut buf, record.info, INFO_LEN);
    buf.put_u32_le(u32::from(record.crash_reason as u8));
    buf.put_u32_le(record.reset_count);
    buf.put_u64_le(record.uptime_us);

    if let Some((min_free, tasks)) = full {
        buf.put_u32_le(min_free.len() as u32);
        for free in min_free {
            buf.put_u32_le(*free);
        }
        buf.put_u32_le(tasks.len() as u32);
        for task in tasks {
            put_padded(&mut buf, &task.name, TASK_NAME_LEN);
            buf.put_i32_le(task.ticks_left);
            buf.put_u32_le(task.timeout_ms);
        }
    }

    Ok(buf)
}

fn crash_dump_size(full: Option<(usize, usize)>) -> usize {
    let header = 4 + 2 * INFO_LEN + 4 + 4 + 8;
    match full {
        Some((pools, tasks)) => header + 4 + pools * 4 + 4 + tasks * (TASK_NAME_LEN + 8),
        None => header,
    }
}

/// Writes and serves crash dumps.
pub struct Housekeeping {
    files: Arc<FileSystem>,
    dispatcher: Arc<Dispatcher>,
    monitor: Arc<Monitor>,
    system: Arc<SystemControl>,
    app_info: String,
}

impl Housekeeping {
    /// Create the housekeeping service.
    #[must_use]
    pub fn new(
        files: Arc<FileSystem>,
        dispatcher: Arc<Dispatcher>,
        monitor: Arc<Monitor>,
        system: Arc<SystemControl>,
        app_info: String,
    ) -> Self {
        Self {
            files,
            dispatcher,
            monitor,
            system,
            app_info,
        }
    }

    /// Replace the crash dump with the current system state.
    ///
    /// Runs with the store's longer lock wait, since the caller is about to
    /// reset and the task holding the lock may have stopped. A lock that is
    /// never released fails the dump with [`StoreError::Locked`] so the reset
    /// still goes ahead. Returns the number of bytes written.
    pub fn trigger_crash_dump(
        &self,
        crash_reason: ResetReason,
        info: &str,
        full: bool,
    ) -> XepResult<usize> {
        let store = self
            .files
            .store()
            .ok_or(XepError::File(FileError::SystemNotInitialized))?;

        store.ignore_lock(true);
        let result = self.write_dump(store, crash_reason, info, full);
        store.ignore_lock(false);
        result
    }

    fn write_dump(
        &self,
        store: &xep_storage::FileStore,
        crash_reason: ResetReason,
        info: &str,
        full: bool,
    ) -> XepResult<usize> {
        match store.delete(file_type::CRASHDUMP, CRASH_DUMP_ID) {
            Ok(()) | Err(StoreError::FileNotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let max_size = MAX_CRASH_DUMP_SIZE.min(store.largest_free_size()? as usize);
        let retained = self.system.retained();
        let record = CrashRecord {
            reset_reason: retained.reset_reason,
            operation_mode: self.system.operation_mode().code(),
            app_info: &self.app_info,
            info,
            crash_reason,
            reset_count: retained.reset_count,
            uptime_us: self.system.uptime_us(),
        };

        let built = if full {
            let min_free: Vec<u32> = self
                .dispatcher
                .pools()
                .stats()
                .iter()
                .map(|s| s.min_free as u32)
                .collect();
            let tasks = self.monitor.snapshot();
            build_crash_dump(&record, Some((&min_free, &tasks)), max_size)
        } else {
            build_crash_dump(&record, None, max_size)
        };
        let dump = match built {
            Ok(dump) => dump,
            Err(e) => {
                warn!(error = %e, max_size, "No room for a crash dump");
                return Err(e);
            }
        };

        store.create(file_type::CRASHDUMP, CRASH_DUMP_ID, dump.len() as u32)?;
        store.commit(file_type::CRASHDUMP, CRASH_DUMP_ID, &dump)?;
        info!(size = dump.len(), full, ?crash_reason, "Crash dump stored");
        Ok(dump.len())
    }

    /// Size of the stored crash dump, 0 if there is none.
    #[must_use]
    pub fn crash_dump_len(&self) -> u32 {
        self.files
            .size(file_type::CRASHDUMP, CRASH_DUMP_ID)
            .unwrap_or(0)
    }

    /// The whole stored crash dump.
    pub fn read_crash_dump(&self) -> XepResult<Vec<u8>> {
        let handle = self.files.open(file_type::CRASHDUMP, CRASH_DUMP_ID)?;
        let data = self.files.read_buffer(handle);
        if let Err(e) = self.files.close(handle, false) {
            debug!(error = %e, "Crash dump close failed");
        }
        Ok(data?)
    }

    /// Delete the stored crash dump. A missing dump counts as cleared.
    pub fn clear_crash_dump(&self) -> XepResult<()> {
        match self.files.delete(file_type::CRASHDUMP, CRASH_DUMP_ID) {
            Ok(()) | Err(FileError::FileNotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
