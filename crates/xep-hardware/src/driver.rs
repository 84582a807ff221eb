//! The front-end driver seam.

use crate::error::X4Result;
use crate::settings::{FrameArea, SweepTriggerMode, TxCenterFrequency, TxPower};
use std::sync::Arc;

/// Called from "interrupt context" when the chip has a frame ready.
///
/// Must not block; the radar task installs a handler that only sets a
/// notification bit.
pub type DataReadyHandler = Arc<dyn Fn() + Send + Sync>;

/// Register-level control of an X4 front end.
///
/// Calls are synchronous and short. Callers serialize access through one
/// lock; the driver itself is not re-entrant.
pub trait X4Driver: Send {
    /// Power the chip on (`1`) or off (`0`).
    fn set_enable(&mut self, enable: u8) -> X4Result<()>;

    /// Upload firmware and bring the chip to a known state.
    fn init(&mut self) -> X4Result<()>;

    /// Check that the current register set is a valid combination.
    fn check_configuration(&mut self) -> X4Result<()>;

    /// Trim and PLL defaults used by the certification modes.
    fn setup_default(&mut self) -> X4Result<()>;

    /// Factory test of the chip's IO lines.
    fn test_io_connectivity(&mut self) -> X4Result<()>;

    /// Put the chip in deep sleep; sweeps stop until re-initialized.
    fn enter_deep_sleep(&mut self) -> X4Result<()>;

    /// Install the data-ready handler.
    fn set_data_ready_handler(&mut self, handler: DataReadyHandler);

    /// Sweep pacing mode.
    fn sweep_trigger_mode(&self) -> SweepTriggerMode;

    /// Switch the sweep pacing mode.
    fn set_sweep_trigger_mode(&mut self, mode: SweepTriggerMode) -> X4Result<()>;

    /// Program the chip frame rate. Only the X4 mode paces itself; the value
    /// is stored in every mode.
    fn set_fps(&mut self, fps: f32) -> X4Result<()>;

    /// Configured frame rate.
    fn fps(&self) -> f32;

    /// Run one sweep now. Raises data-ready when the frame is captured.
    fn start_sweep(&mut self) -> X4Result<()>;

    /// Set sweep iterations.
    fn set_iterations(&mut self, iterations: u32) -> X4Result<()>;
    /// Sweep iterations.
    fn iterations(&self) -> X4Result<u32>;

    /// Set pulses per DAC step.
    fn set_pulses_per_step(&mut self, pulses: u32) -> X4Result<()>;
    /// Pulses per DAC step.
    fn pulses_per_step(&self) -> X4Result<u32>;

    /// Enable (`1`) or disable (`0`) baseband down-conversion.
    fn set_downconversion(&mut self, enable: u8) -> X4Result<()>;
    /// Down-conversion enable.
    fn downconversion(&self) -> X4Result<u8>;

    /// Set the range window in meters.
    fn set_frame_area(&mut self, start: f32, end: f32) -> X4Result<()>;
    /// Active range window.
    fn frame_area(&self) -> X4Result<FrameArea>;

    /// Set the range offset and re-apply the frame area.
    fn set_frame_area_offset(&mut self, offset: f32) -> X4Result<()>;
    /// Range offset in meters.
    fn frame_area_offset(&self) -> X4Result<f32>;

    /// Set the DAC step exponent (`0..=3`).
    fn set_dac_step(&mut self, step: u32) -> X4Result<()>;
    /// DAC step exponent.
    fn dac_step(&self) -> X4Result<u32>;

    /// Set the lowest DAC value swept.
    fn set_dac_min(&mut self, value: u32) -> X4Result<()>;
    /// Lowest DAC value swept.
    fn dac_min(&self) -> X4Result<u32>;

    /// Set the highest DAC value swept.
    fn set_dac_max(&mut self, value: u32) -> X4Result<()>;
    /// Highest DAC value swept.
    fn dac_max(&self) -> X4Result<u32>;

    /// Select the transmit band.
    fn set_tx_center_frequency(&mut self, band: TxCenterFrequency) -> X4Result<()>;
    /// Transmit band.
    fn tx_center_frequency(&self) -> X4Result<TxCenterFrequency>;

    /// Set the transmit power.
    fn set_tx_power(&mut self, power: TxPower) -> X4Result<()>;
    /// Transmit power.
    fn tx_power(&self) -> X4Result<TxPower>;

    /// Set the pulse repetition divider.
    fn set_prf_div(&mut self, div: u8) -> X4Result<()>;
    /// Pulse repetition divider.
    fn prf_div(&self) -> X4Result<u8>;

    /// Range bins in one frame for the current window.
    fn frame_bin_count(&self) -> X4Result<u32>;

    /// Write an SPI register.
    fn set_spi_register(&mut self, address: u8, value: u8) -> X4Result<()>;
    /// Read an SPI register.
    fn spi_register(&self, address: u8) -> X4Result<u8>;

    /// Write a PIF register.
    fn set_pif_register(&mut self, address: u8, value: u8) -> X4Result<()>;
    /// Read a PIF register.
    fn pif_register(&self, address: u8) -> X4Result<u8>;

    /// Write an XIF register.
    fn set_xif_register(&mut self, address: u8, value: u8) -> X4Result<()>;
    /// Read an XIF register.
    fn xif_register(&self, address: u8) -> X4Result<u8>;

    /// Read the pending frame as normalized floats into `out`.
    ///
    /// Writes `frame_bin_count()` samples, or twice that (interleaved I/Q)
    /// with down-conversion enabled, and returns the chip frame counter.
    fn read_frame_normalized(&mut self, out: &mut [f32]) -> X4Result<u32>;
}
