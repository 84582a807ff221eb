use thiserror::Error;

/// Result alias for codec operations.
pub type McpResult<T> = Result<T, McpError>;

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum McpError {
    /// A field ran past the end of the packet.
    #[error("packet truncated: needed {needed} bytes at offset {offset}")]
    Truncated {
        /// Offset of the field
        offset: usize,
        /// Bytes the field needs
        needed: usize,
    },

    /// The packet has no command byte.
    #[error("empty packet")]
    Empty,

    /// Not enough spare bytes in front of bulk data for the wire header.
    #[error("header room too small: need {needed}, have {available}")]
    HeaderRoom {
        /// Header length
        needed: usize,
        /// Bytes available in front of the data
        available: usize,
    },

    /// Data range lies outside the buffer.
    #[error("data range {start}..{end} outside buffer of {len} bytes")]
    OutOfBounds {
        /// Range start
        start: usize,
        /// Range end
        end: usize,
        /// Buffer length
        len: usize,
    },
}
