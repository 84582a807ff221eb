use thiserror::Error;

/// Result alias for [`FileStore`](crate::FileStore) operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result alias for [`FileSystem`](crate::FileSystem) operations.
pub type FileResult<T> = Result<T, FileError>;

/// Low-level flash access failures.
#[derive(Debug, Error)]
pub enum FlashError {
    /// Access outside the flash region.
    #[error("flash access {offset}+{len} outside region of {size} bytes")]
    OutOfRange {
        /// Start of the access
        offset: usize,
        /// Length of the access
        len: usize,
        /// Region size
        size: usize,
    },

    /// Power was cut (simulated) before the operation ran.
    #[error("power lost")]
    PowerLost,

    /// Backing file failure.
    #[error("flash io: {0}")]
    Io(#[from] std::io::Error),
}

/// Allocation-table store failures. Codes are reported to the host.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store has no backing region.
    #[error("file store not initialized")]
    NotInitialized,

    /// Bad size, offset or length.
    #[error("invalid parameter")]
    InvalidParameter,

    /// A buffer could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// The allocation table failed its integrity check.
    #[error("allocation table corrupted")]
    Corrupted,

    /// No entry with that type and identifier.
    #[error("file {file_type:#010x}/{identifier} not found")]
    FileNotFound {
        /// File type
        file_type: u32,
        /// File identifier
        identifier: u32,
    },

    /// An entry with that type and identifier already exists.
    #[error("file {file_type:#010x}/{identifier} already exists")]
    FileAlreadyExists {
        /// File type
        file_type: u32,
        /// File identifier
        identifier: u32,
    },

    /// No contiguous gap is large enough.
    #[error("no free space for {requested} bytes")]
    NoFreeSpace {
        /// Page-aligned size that was requested
        requested: u32,
    },

    /// Operation not implemented.
    #[error("not implemented")]
    NotImplemented,

    /// The allocation table has no free entry.
    #[error("allocation table full")]
    FileEntryFull,

    /// Flash erase or write failed.
    #[error("storage error: {0}")]
    Storage(#[from] FlashError),

    /// The store lock could not be taken in time.
    #[error("file store locked")]
    Locked,
}

impl StoreError {
    /// Numeric code reported to the host.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::NotInitialized => 1,
            Self::InvalidParameter => 2,
            Self::OutOfMemory => 3,
            Self::Corrupted => 4,
            Self::FileNotFound { .. } => 5,
            Self::FileAlreadyExists { .. } => 6,
            Self::NoFreeSpace { .. } => 7,
            Self::NotImplemented => 8,
            Self::FileEntryFull => 9,
            Self::Storage(_) => 10,
            Self::Locked => 11,
        }
    }
}

/// Open-file layer failures. Codes are reported to the host.
#[derive(Debug, Error)]
pub enum FileError {
    /// Bad argument or format key.
    #[error("invalid parameter")]
    InvalidParameter,

    /// The file is already open.
    #[error("file already open")]
    FileAlreadyOpen,

    /// A file with that type and identifier exists.
    #[error("file already exists")]
    FileAlreadyExists,

    /// The file is in use.
    #[error("file busy")]
    FileBusy,

    /// No such file.
    #[error("file not found")]
    FileNotFound,

    /// The handle or file is not open.
    #[error("file not open")]
    FileNotOpen,

    /// A buffer could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// No store behind the file system.
    #[error("file system not initialized")]
    SystemNotInitialized,

    /// No table entry or flash space left.
    #[error("file system full")]
    SystemFull,

    /// The store was locked by another task.
    #[error("file system busy")]
    SystemBusy,

    /// All open-file slots are taken.
    #[error("too many files open")]
    TooManyFilesOpen,

    /// Any other store failure.
    #[error("unknown failure: {0}")]
    UnknownFailure(#[source] StoreError),

    /// The open-file table lock could not be taken in time.
    #[error("file table locked")]
    Locked,

    /// Operation not supported.
    #[error("not supported")]
    NotSupported,
}

impl FileError {
    /// Numeric code reported to the host.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidParameter => 1,
            Self::FileAlreadyOpen => 2,
            Self::FileAlreadyExists => 3,
            Self::FileBusy => 4,
            Self::FileNotFound => 5,
            Self::FileNotOpen => 6,
            Self::OutOfMemory => 7,
            Self::SystemNotInitialized => 8,
            Self::SystemFull => 9,
            Self::SystemBusy => 10,
            Self::TooManyFilesOpen => 11,
            Self::UnknownFailure(_) => 12,
            Self::Locked => 13,
            Self::NotSupported => 14,
        }
    }
}

impl From<StoreError> for FileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Locked => Self::SystemBusy,
            StoreError::FileEntryFull | StoreError::NoFreeSpace { .. } => Self::SystemFull,
            StoreError::NotInitialized => Self::SystemNotInitialized,
            StoreError::FileNotFound { .. } => Self::FileNotFound,
            StoreError::FileAlreadyExists { .. } => Self::FileAlreadyExists,
            StoreError::InvalidParameter => Self::InvalidParameter,
            other => Self::UnknownFailure(other),
        }
    }
}
