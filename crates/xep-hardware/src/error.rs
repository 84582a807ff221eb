use thiserror::Error;

/// Result alias for driver calls.
pub type X4Result<T> = Result<T, X4Error>;

/// Radar front-end driver failures.
///
/// [`X4Error::code`] is the status reported to the host in an MCP error
/// reply, so the numbering must not change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum X4Error {
    /// The chip has not been enabled and initialized.
    #[error("x4 driver not initialized")]
    NotInitialized,

    /// Generic failure, including out-of-range register values.
    #[error("x4 driver operation failed")]
    Nok,

    /// Operation not supported in the current configuration.
    #[error("not supported")]
    NotSupported,

    /// The driver lock is held elsewhere.
    #[error("x4 driver busy")]
    Busy,

    /// No frame was ready to read.
    #[error("frame ready timeout")]
    FrameReadyTimeout,

    /// Caller buffer cannot hold a frame.
    #[error("buffer too small: need {needed} samples, have {available}")]
    BufferTooSmall {
        /// Samples in one frame
        needed: usize,
        /// Samples in the caller buffer
        available: usize,
    },

    /// DAC step outside `0..=3`.
    #[error("invalid dac step {0}")]
    InvalidDacStep(u32),

    /// Frame area start lies beyond its end.
    #[error("frame area end out of scope")]
    FrameAreaEndOutOfScope,

    /// PRF divider below the minimum of 4.
    #[error("prf divider {0} too small")]
    PrfDivTooSmall(u8),

    /// Unknown tx center frequency band.
    #[error("invalid tx center frequency {0}")]
    InvalidTxCenterFrequency(u8),

    /// Tx power outside `OFF..=HIGH`.
    #[error("invalid tx power {0}")]
    InvalidTxPower(u8),

    /// Simulated or reported hardware fault with a raw status code.
    #[error("hardware fault {0}")]
    Hardware(u32),
}

impl X4Error {
    /// Numeric status reported to the host.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::NotInitialized => u32::MAX,
            Self::Nok => 1,
            Self::NotSupported => 2,
            Self::Busy => 3,
            Self::FrameReadyTimeout => 9,
            Self::BufferTooSmall { .. } => 11,
            Self::InvalidDacStep(_) => 12,
            Self::FrameAreaEndOutOfScope => 17,
            Self::PrfDivTooSmall(_) => 18,
            Self::InvalidTxCenterFrequency(_) => 20,
            Self::InvalidTxPower(_) => 21,
            Self::Hardware(code) => *code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_driver_status() {
        assert_eq!(X4Error::NotInitialized.code(), 0xFFFF_FFFF);
        assert_eq!(X4Error::PrfDivTooSmall(2).code(), 18);
        assert_eq!(X4Error::InvalidTxPower(9).code(), 21);
        assert_eq!(X4Error::Hardware(27).code(), 27);
    }
}
