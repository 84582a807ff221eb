use crate::topic::Topic;
use thiserror::Error;
use xep_pool::PoolError;

/// Result alias for bus operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Failures of the message bus.
///
/// [`DispatchError::code`] gives the status value reported to the host.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// A subscriber queue had no room for the envelope.
    #[error("dispatch queue full")]
    Full,

    /// Nobody subscribes to the topic.
    #[error("no subscriber for topic {0:?}")]
    UnknownTopic(Topic),

    /// A queue lock could not be taken in time.
    #[error("dispatch lock timeout")]
    Timeout,

    /// The addressed queue does not exist.
    #[error("queue not found")]
    NotFound,

    /// No pool block fits the request.
    #[error(transparent)]
    OutOfMemory(#[from] PoolError),

    /// The payload does not decode as the content kind it claims.
    #[error("malformed content: {0}")]
    Malformed(String),
}

impl DispatchError {
    /// Numeric status code.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Full | Self::OutOfMemory(_) => 11,
            Self::UnknownTopic(_) => 10,
            Self::Timeout => 2,
            Self::NotFound => 3,
            Self::Malformed(_) => 1,
        }
    }
}
