//! Regulatory test modes.
//!
//! In the certification operating mode the radar task polls a sub-mode
//! selector every loop iteration and reconfigures the chip when the value
//! changes. Asking for the active mode again does nothing.

use tracing::{info, warn};
use xep_hardware::settings::registers::{pif, xif, TRX_CTRL_RX_ENABLE, TRX_CTRL_TX_ONLY};
use xep_hardware::{TxPower, X4Driver, X4Result};

/// Frame rate used by the streaming test modes.
pub const CERTIFICATION_FPS: f32 = 20.0;

/// Certification sub-mode selector values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CertificationMode {
    /// Normal radar operation
    #[default]
    Idle = 0,
    /// Continuous transmit at default power, receiver off
    TxOnly = 1,
    /// Transmit chain running with power off
    TxOnlyTxOff = 2,
    /// Stream frames with the transmitter off
    StreamTxOff = 3,
    /// Transmit with an external clock
    TxOnlyExtClk = 4,
    /// Stream frames at default power
    Stream = 5,
    /// Transmit with the clock routed out
    TxOnlyClkOut = 6,
    /// Stream with a forced sampler preset
    RxFailureEmulation = 7,
}

impl CertificationMode {
    /// Decode a selector value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Idle,
            1 => Self::TxOnly,
            2 => Self::TxOnlyTxOff,
            3 => Self::StreamTxOff,
            4 => Self::TxOnlyExtClk,
            5 => Self::Stream,
            6 => Self::TxOnlyClkOut,
            7 => Self::RxFailureEmulation,
            _ => return None,
        })
    }

    /// Modes in which frames are read but never published.
    #[must_use]
    pub fn discards_frames(self) -> bool {
        matches!(
            self,
            Self::Stream | Self::StreamTxOff | Self::RxFailureEmulation
        )
    }
}

/// Transmit-only setup: transmitter on every pulse, receiver strobe off,
/// then deep sleep to stop the clocks.
pub fn enter_tx_only(driver: &mut dyn X4Driver, power: TxPower) -> X4Result<()> {
    driver.setup_default()?;
    driver.set_tx_power(power)?;
    let mode = driver.pif_register(pif::TRX_CTRL_MODE)?;
    driver.set_pif_register(
        pif::TRX_CTRL_MODE,
        (mode | TRX_CTRL_TX_ONLY) & !TRX_CTRL_RX_ENABLE,
    )?;
    driver.enter_deep_sleep()
}

/// Level-triggered sub-mode state machine.
#[derive(Debug, Default)]
pub struct CertificationFsm {
    /// Last selector value seen, known or not
    previous: u8,
    mode: CertificationMode,
}

impl CertificationFsm {
    /// Mode most recently entered.
    #[must_use]
    pub fn mode(&self) -> CertificationMode {
        self.mode
    }

    /// Apply `selector` if it differs from the previous selector.
    ///
    /// Returns the newly entered mode, or `None` when nothing changed. An
    /// unknown selector is remembered but leaves the chip alone, so returning
    /// to the earlier mode enters it again. The mode counts as entered even
    /// if the chip rejected part of the setup; the failure is logged and the
    /// same selector is not retried.
    pub fn step(
        &mut self,
        selector: u8,
        driver: &mut dyn X4Driver,
        default_power: TxPower,
    ) -> Option<CertificationMode> {
        if selector == self.previous {
            return None;
        }
        self.previous = selector;
        let Some(mode) = CertificationMode::from_u8(selector) else {
            warn!(selector, "Unknown certification mode");
            return None;
        };
        self.mode = mode;

        info!(?mode, "Entering certification mode");
        if let Err(e) = Self::enter(mode, driver, default_power) {
            warn!(?mode, error = %e, "Certification setup failed");
        }
        Some(mode)
    }

    fn enter(
        mode: CertificationMode,
        driver: &mut dyn X4Driver,
        default_power: TxPower,
    ) -> X4Result<()> {
        match mode {
            CertificationMode::TxOnly => enter_tx_only(driver, default_power),
            CertificationMode::TxOnlyTxOff => enter_tx_only(driver, TxPower::Off),
            CertificationMode::StreamTxOff => {
                driver.setup_default()?;
                driver.set_tx_power(TxPower::Off)?;
                driver.set_fps(CERTIFICATION_FPS)
            }
            CertificationMode::Stream => {
                driver.setup_default()?;
                driver.set_tx_power(default_power)?;
                driver.set_fps(CERTIFICATION_FPS)
            }
            CertificationMode::RxFailureEmulation => {
                driver.setup_default()?;
                driver.set_tx_power(default_power)?;
                driver.set_frame_area_offset(0.0)?;
                driver.set_fps(CERTIFICATION_FPS)?;
                driver.set_xif_register(xif::SAMPLER_PRESET_LSB, 0)?;
                driver.set_xif_register(xif::SAMPLER_PRESET_MSB, 1 << 7)
            }
            CertificationMode::TxOnlyExtClk
            | CertificationMode::TxOnlyClkOut
            | CertificationMode::Idle => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xep_hardware::{FramePattern, MockX4};

    fn chip() -> MockX4 {
        let mut chip = MockX4::manual(7, FramePattern::Zeros);
        chip.set_enable(1).unwrap();
        chip.init().unwrap();
        chip
    }

    #[test]
    fn test_level_triggered() {
        let mock = chip();
        let mut driver = mock.clone();
        let mut fsm = CertificationFsm::default();

        assert_eq!(fsm.step(0, &mut driver, TxPower::Medium), None);
        assert_eq!(
            fsm.step(5, &mut driver, TxPower::Medium),
            Some(CertificationMode::Stream)
        );
        assert_eq!(mock.call_count("setup_default"), 1);

        for _ in 0..5 {
            assert_eq!(fsm.step(5, &mut driver, TxPower::Medium), None);
        }
        assert_eq!(mock.call_count("setup_default"), 1);
        assert_eq!(driver.fps(), CERTIFICATION_FPS);
        assert_eq!(driver.tx_power().unwrap(), TxPower::Medium);
    }

    #[test]
    fn test_tx_only_sleeps() {
        let mock = chip();
        let mut driver = mock.clone();
        let mut fsm = CertificationFsm::default();

        fsm.step(2, &mut driver, TxPower::Medium);
        assert!(mock.is_sleeping());
        assert_eq!(driver.tx_power().unwrap(), TxPower::Off);
        let mode = driver.pif_register(pif::TRX_CTRL_MODE).unwrap();
        assert_eq!(mode & TRX_CTRL_TX_ONLY, TRX_CTRL_TX_ONLY);
        assert_eq!(mode & TRX_CTRL_RX_ENABLE, 0);
    }

    #[test]
    fn test_unknown_selector_rearms_previous_mode() {
        let mock = chip();
        let mut driver = mock.clone();
        let mut fsm = CertificationFsm::default();

        fsm.step(5, &mut driver, TxPower::Medium);
        assert_eq!(fsm.step(42, &mut driver, TxPower::Medium), None);
        assert_eq!(fsm.step(42, &mut driver, TxPower::Medium), None);
        assert_eq!(fsm.mode(), CertificationMode::Stream);
        assert_eq!(mock.call_count("setup_default"), 1);

        assert_eq!(
            fsm.step(5, &mut driver, TxPower::Medium),
            Some(CertificationMode::Stream)
        );
        assert_eq!(mock.call_count("setup_default"), 2);
    }

    #[test]
    fn test_rx_failure_emulation() {
        let mock = chip();
        let mut driver = mock.clone();
        let mut fsm = CertificationFsm::default();

        fsm.step(7, &mut driver, TxPower::Medium);
        assert_eq!(driver.xif_register(xif::SAMPLER_PRESET_MSB).unwrap(), 0x80);
        assert_eq!(driver.xif_register(xif::SAMPLER_PRESET_LSB).unwrap(), 0);
        assert_eq!(driver.frame_area_offset().unwrap(), 0.0);
        assert!(fsm.mode().discards_frames());
    }
}
