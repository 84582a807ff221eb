//! Firmware-wide error type.
//!
//! `XepError` gathers the failures of every layer so task code can use `?`
//! across crate boundaries:
//!
//! - **`Pool`**, **`Dispatch`**: resource exhaustion and bus timeouts. Never
//!   fatal; the operation is dropped and counted.
//! - **`Protocol`**: malformed host packets.
//! - **`Store`**, **`File`**, **`Flash`**: flash storage failures.
//! - **`Driver`**: radar chip failures.
//! - **`Config`**, **`Io`**, **`Transport`**: boot and link problems.
//!
//! [`XepError::code`] maps each failure to the status word sent to the host
//! in an error reply.

use thiserror::Error;
use xep_dispatch::DispatchError;
use xep_hardware::X4Error;
use xep_pool::PoolError;
use xep_proto::McpError;
use xep_storage::{FileError, FlashError, StoreError};

/// Convenience alias for results using the firmware error type.
pub type XepResult<T> = std::result::Result<T, XepError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum XepError {
    #[error("Memory pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] McpError),

    #[error("File store error: {0}")]
    Store(#[from] StoreError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Flash error: {0}")]
    Flash(#[from] FlashError),

    #[error("Radar driver error: {0}")]
    Driver(#[from] X4Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl XepError {
    /// Status word reported to the host.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Pool(e) => DispatchError::OutOfMemory(e.clone()).code(),
            Self::Dispatch(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::File(e) => e.code(),
            Self::Driver(e) => e.code(),
            Self::Protocol(_)
            | Self::Flash(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Transport(_) => xep_proto::mcp::ERROR_COMMAND_FAILED,
        }
    }
}

impl From<figment::Error> for XepError {
    fn from(e: figment::Error) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_pass_through() {
        assert_eq!(XepError::from(DispatchError::Timeout).code(), 2);
        assert_eq!(XepError::from(X4Error::Busy).code(), 3);
        assert_eq!(XepError::from(FileError::FileNotOpen).code(), FileError::FileNotOpen.code());
        assert_eq!(
            XepError::Transport("closed".into()).code(),
            xep_proto::mcp::ERROR_COMMAND_FAILED
        );
    }

    #[test]
    fn test_display() {
        let err = XepError::Config("pools empty".into());
        assert_eq!(err.to_string(), "Configuration error: pools empty");
    }
}
