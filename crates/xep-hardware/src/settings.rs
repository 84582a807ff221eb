//! Front-end settings types and chip constants.

use crate::error::{X4Error, X4Result};

/// Range covered by one RF sample.
pub const METERS_PER_BIN: f64 = 1.5e8 / 23.328e9;

/// Range covered by one down-converted (decimated by 8) sample.
pub const METERS_PER_BIN_DOWNCONVERSION: f64 = 8.0 * 1.5e8 / 23.328e9;

/// Longest frame area in RF mode.
pub const MAX_RANGE_RF: f32 = 9.876_543;

/// Longest frame area with down-conversion.
pub const MAX_RANGE_DOWNCONVERSION: f32 = 9.670_782;

/// Raw samples captured per frame before decimation.
pub const SAMPLES_PER_FRAME: u32 = 1536;

/// Largest DAC value.
pub const DAC_MAX_VALUE: u32 = 0x07FF;

/// Smallest PRF divider the chip accepts.
pub const PRF_DIV_MIN: u8 = 4;

/// Who paces sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepTriggerMode {
    /// Sweeps only on explicit request; data-ready is ignored.
    #[default]
    Manual,
    /// The chip runs its own frame timer.
    X4,
    /// The MCU fires a periodic sweep timer.
    Mcu,
}

/// Transmitter output level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum TxPower {
    /// Transmitter off.
    Off = 0,
    /// Low.
    Low = 1,
    /// Medium.
    Medium = 2,
    /// High.
    #[default]
    High = 3,
}

impl TryFrom<u8> for TxPower {
    type Error = X4Error;

    fn try_from(value: u8) -> X4Result<Self> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            other => Err(X4Error::InvalidTxPower(other)),
        }
    }
}

/// Regulatory transmit band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TxCenterFrequency {
    /// 7.290 GHz (EU).
    #[default]
    Eu7290 = 3,
    /// 8.748 GHz (KCC).
    Kcc8748 = 4,
}

impl TryFrom<u8> for TxCenterFrequency {
    type Error = X4Error;

    fn try_from(value: u8) -> X4Result<Self> {
        match value {
            3 => Ok(Self::Eu7290),
            4 => Ok(Self::Kcc8748),
            other => Err(X4Error::InvalidTxCenterFrequency(other)),
        }
    }
}

/// Requested range window in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameArea {
    /// Start of the window
    pub start: f32,
    /// End of the window
    pub end: f32,
}

impl FrameArea {
    /// Validate and clamp a requested window.
    ///
    /// `start > end` is rejected; a window longer than the maximum range is
    /// shortened from the end.
    pub fn clamped(start: f32, end: f32, downconversion: bool) -> X4Result<Self> {
        if start > end {
            return Err(X4Error::FrameAreaEndOutOfScope);
        }
        let max = if downconversion {
            MAX_RANGE_DOWNCONVERSION
        } else {
            MAX_RANGE_RF
        };
        let end = if end - start > max { start + max } else { end };
        Ok(Self { start, end })
    }

    /// Number of range bins covering the window.
    #[must_use]
    pub fn bin_count(&self, downconversion: bool) -> u32 {
        let (bin, limit) = if downconversion {
            // The first four decimated bins prime the filter.
            (METERS_PER_BIN_DOWNCONVERSION, SAMPLES_PER_FRAME / 8 - 4)
        } else {
            (METERS_PER_BIN, SAMPLES_PER_FRAME)
        };
        let span = f64::from(self.end - self.start);
        let bins = (span / bin).round() as u32 + 1;
        bins.min(limit)
    }
}

/// Register addresses used outside the driver.
pub mod registers {
    /// PIF register bank.
    pub mod pif {
        /// Transceiver control mode.
        pub const TRX_CTRL_MODE: u8 = 59;
        /// Pulses per step, high byte.
        pub const TRX_PULSES_PER_STEP_MSB: u8 = 46;
        /// Pulses per step, low byte.
        pub const TRX_PULSES_PER_STEP_LSB: u8 = 47;
        /// DAC max, high byte.
        pub const TRX_DAC_MAX_H: u8 = 48;
        /// DAC max, low byte.
        pub const TRX_DAC_MAX_L: u8 = 49;
        /// DAC min, high byte.
        pub const TRX_DAC_MIN_H: u8 = 50;
        /// DAC min, low byte.
        pub const TRX_DAC_MIN_L: u8 = 51;
        /// DAC step exponent.
        pub const TRX_DAC_STEP: u8 = 52;
        /// Sweep iterations.
        pub const TRX_ITERATIONS: u8 = 53;
        /// Receiver wait.
        pub const RX_WAIT: u8 = 66;
        /// Transmitter wait.
        pub const TX_WAIT: u8 = 67;
    }

    /// XIF register bank.
    pub mod xif {
        /// Sampler preset, high byte.
        pub const SAMPLER_PRESET_MSB: u8 = 1;
        /// Sampler preset, low byte.
        pub const SAMPLER_PRESET_LSB: u8 = 2;
        /// Receiver DAC trim.
        pub const DAC_TRIM: u8 = 3;
        /// Preamp trim.
        pub const PREAMP_TRIM: u8 = 4;
    }

    /// Bit 3 of TRX_CTRL_MODE: continuous transmit.
    pub const TRX_CTRL_TX_ONLY: u8 = 1 << 3;
    /// Bit 6 of TRX_CTRL_MODE: receiver enable.
    pub const TRX_CTRL_RX_ENABLE: u8 = 1 << 6;
}
