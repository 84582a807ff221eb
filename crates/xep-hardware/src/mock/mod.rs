//! Simulated X4 front end.
//!
//! `MockX4` keeps a register image and the cached settings a real driver
//! would keep, produces frames from a [`FramePattern`], and raises the
//! data-ready handler when a sweep completes. In X4 trigger mode with a
//! non-zero frame rate a pacing thread runs sweeps on its own, like the
//! chip's internal frame timer.
//!
//! Clones share one chip, so a test can hand one clone to the radar task and
//! keep another to change the pattern or inspect call counts.

mod faults;
mod pattern;
mod rng;

pub use faults::FaultScenario;
pub use pattern::FramePattern;
pub use rng::MockRng;

use crate::driver::{DataReadyHandler, X4Driver};
use crate::error::{X4Error, X4Result};
use crate::settings::{
    registers::{pif, xif},
    FrameArea, SweepTriggerMode, TxCenterFrequency, TxPower, DAC_MAX_VALUE, MAX_RANGE_RF,
    PRF_DIV_MIN,
};
use faults::FaultInjector;
use parking_lot::{Mutex, MutexGuard};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

/// Construction options for [`MockX4`].
#[derive(Debug, Clone)]
pub struct MockX4Config {
    /// RNG seed; `None` seeds from the OS
    pub seed: Option<u64>,
    /// Initial frame contents
    pub pattern: FramePattern,
    /// Run the pacing thread in X4 trigger mode
    pub self_paced: bool,
}

impl Default for MockX4Config {
    fn default() -> Self {
        Self {
            seed: None,
            pattern: FramePattern::default(),
            self_paced: true,
        }
    }
}

#[derive(Debug)]
struct ChipState {
    enabled: bool,
    initialized: bool,
    sleeping: bool,
    mode: SweepTriggerMode,
    fps: f32,
    iterations: u32,
    pulses_per_step: u32,
    downconversion: u8,
    requested_area: FrameArea,
    area: FrameArea,
    area_offset: f32,
    dac_step: u32,
    dac_min: u32,
    dac_max: u32,
    tx_center_frequency: TxCenterFrequency,
    tx_power: TxPower,
    prf_div: u8,
    spi: [u8; 256],
    pif: [u8; 256],
    xif: [u8; 256],
    pattern: FramePattern,
    frame_counter: u32,
    pending: Option<u32>,
    pacer_generation: u64,
}

impl ChipState {
    fn new(pattern: FramePattern) -> Self {
        Self {
            enabled: false,
            initialized: false,
            sleeping: false,
            mode: SweepTriggerMode::Manual,
            fps: 0.0,
            iterations: 16,
            pulses_per_step: 300,
            downconversion: 0,
            requested_area: FrameArea {
                start: 0.0,
                end: MAX_RANGE_RF,
            },
            area: FrameArea {
                start: 0.0,
                end: MAX_RANGE_RF,
            },
            area_offset: 0.0,
            dac_step: 0,
            dac_min: 949,
            dac_max: 1100,
            tx_center_frequency: TxCenterFrequency::default(),
            tx_power: TxPower::default(),
            prf_div: 16,
            spi: [0; 256],
            pif: [0; 256],
            xif: [0; 256],
            pattern,
            frame_counter: 0,
            pending: None,
            pacer_generation: 0,
        }
    }

    fn ready(&self) -> X4Result<()> {
        if self.enabled && self.initialized {
            Ok(())
        } else {
            Err(X4Error::NotInitialized)
        }
    }

    fn apply_frame_area(&mut self) -> X4Result<()> {
        let dc = self.downconversion == 1;
        let FrameArea { start, end } = self.requested_area;
        self.requested_area = FrameArea::clamped(start, end, dc)?;
        let FrameArea { start, end } = self.requested_area;
        self.area = FrameArea {
            start: start + self.area_offset,
            end: end + self.area_offset,
        };
        Ok(())
    }

    fn bin_count(&self) -> u32 {
        self.requested_area.bin_count(self.downconversion == 1)
    }

    fn samples_per_frame(&self) -> usize {
        let bins = self.bin_count() as usize;
        if self.downconversion == 1 {
            bins * 2
        } else {
            bins
        }
    }

    /// Capture a frame; returns `false` if the chip cannot sweep.
    fn sweep(&mut self) -> bool {
        if !self.enabled || !self.initialized || self.sleeping {
            return false;
        }
        self.frame_counter = self.frame_counter.wrapping_add(1);
        self.pending = Some(self.frame_counter);
        true
    }
}

struct Shared {
    state: Mutex<ChipState>,
    handler: Mutex<Option<DataReadyHandler>>,
    rng: MockRng,
    faults: FaultInjector,
    self_paced: bool,
}

impl Shared {
    fn raise_data_ready(&self) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

/// Simulated X4 chip.
#[derive(Clone)]
pub struct MockX4 {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MockX4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("MockX4")
            .field("mode", &state.mode)
            .field("fps", &state.fps)
            .field("tx_power", &state.tx_power)
            .field("frame_counter", &state.frame_counter)
            .finish_non_exhaustive()
    }
}

impl Default for MockX4 {
    fn default() -> Self {
        Self::new(MockX4Config::default())
    }
}

impl MockX4 {
    /// Create a powered-off chip.
    #[must_use]
    pub fn new(config: MockX4Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ChipState::new(config.pattern)),
                handler: Mutex::new(None),
                rng: MockRng::new(config.seed),
                faults: FaultInjector::default(),
                self_paced: config.self_paced,
            }),
        }
    }

    /// Seeded chip without the pacing thread, for deterministic tests.
    #[must_use]
    pub fn manual(seed: u64, pattern: FramePattern) -> Self {
        Self::new(MockX4Config {
            seed: Some(seed),
            pattern,
            self_paced: false,
        })
    }

    /// Change what later frames contain.
    pub fn set_pattern(&self, pattern: FramePattern) {
        self.shared.state.lock().pattern = pattern;
    }

    /// Replace the active fault scenarios.
    pub fn inject(&self, scenarios: Vec<FaultScenario>) {
        self.shared.faults.set(scenarios);
    }

    /// Remove every fault scenario.
    pub fn clear_faults(&self) {
        self.shared.faults.clear();
    }

    /// How often a driver method has been called.
    #[must_use]
    pub fn call_count(&self, operation: &str) -> u32 {
        self.shared.faults.calls(operation)
    }

    /// Complete a sweep now, regardless of trigger mode, and raise
    /// data-ready. Returns `false` if the chip is off or asleep.
    pub fn trigger_frame(&self) -> bool {
        let swept = self.shared.state.lock().sweep();
        if swept {
            self.shared.raise_data_ready();
        }
        swept
    }

    /// Counter of the last captured frame.
    #[must_use]
    pub fn frame_counter(&self) -> u32 {
        self.shared.state.lock().frame_counter
    }

    /// `true` after [`X4Driver::enter_deep_sleep`] until the next default
    /// setup.
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.shared.state.lock().sleeping
    }

    fn op(&self, operation: &'static str) -> X4Result<MutexGuard<'_, ChipState>> {
        self.shared.faults.check(operation, &self.shared.rng)?;
        Ok(self.shared.state.lock())
    }

    fn ready_op(&self, operation: &'static str) -> X4Result<MutexGuard<'_, ChipState>> {
        let state = self.op(operation)?;
        state.ready()?;
        Ok(state)
    }

    /// Restart the pacing thread for the current mode and rate.
    fn repace(&self, state: &mut ChipState) {
        state.pacer_generation += 1;
        let paced = self.shared.self_paced
            && state.mode == SweepTriggerMode::X4
            && state.fps > 0.0
            && state.initialized
            && !state.sleeping;
        if !paced {
            return;
        }

        let generation = state.pacer_generation;
        let period = Duration::from_secs_f32(1.0 / state.fps);
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        debug!(fps = state.fps, "X4 frame timer started");
        std::thread::spawn(move || loop {
            std::thread::sleep(period);
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let swept = {
                let mut state = shared.state.lock();
                if state.pacer_generation != generation {
                    return;
                }
                state.sweep()
            };
            if swept {
                shared.raise_data_ready();
            }
        });
    }
}

impl X4Driver for MockX4 {
    fn set_enable(&mut self, enable: u8) -> X4Result<()> {
        let mut state = self.op("set_enable")?;
        state.enabled = enable != 0;
        if !state.enabled {
            state.initialized = false;
            state.pending = None;
        }
        self.repace(&mut state);
        Ok(())
    }

    fn init(&mut self) -> X4Result<()> {
        let mut state = self.op("init")?;
        if !state.enabled {
            return Err(X4Error::NotInitialized);
        }
        state.initialized = true;
        state.sleeping = false;
        state.pif[pif::TRX_CTRL_MODE as usize] = 0;
        debug!("X4 initialized");
        Ok(())
    }

    fn check_configuration(&mut self) -> X4Result<()> {
        let state = self.ready_op("check_configuration")?;
        if state.dac_min > state.dac_max {
            return Err(X4Error::Nok);
        }
        Ok(())
    }

    fn setup_default(&mut self) -> X4Result<()> {
        let mut state = self.ready_op("setup_default")?;
        state.xif[xif::DAC_TRIM as usize] = 63;
        state.xif[xif::PREAMP_TRIM as usize] = 15;
        state.sleeping = false;
        self.repace(&mut state);
        Ok(())
    }

    fn test_io_connectivity(&mut self) -> X4Result<()> {
        self.ready_op("test_io_connectivity").map(|_| ())
    }

    fn enter_deep_sleep(&mut self) -> X4Result<()> {
        let mut state = self.ready_op("enter_deep_sleep")?;
        state.sleeping = true;
        state.pending = None;
        self.repace(&mut state);
        Ok(())
    }

    fn set_data_ready_handler(&mut self, handler: DataReadyHandler) {
        *self.shared.handler.lock() = Some(handler);
    }

    fn sweep_trigger_mode(&self) -> SweepTriggerMode {
        self.shared.state.lock().mode
    }

    fn set_sweep_trigger_mode(&mut self, mode: SweepTriggerMode) -> X4Result<()> {
        let mut state = self.op("set_sweep_trigger_mode")?;
        state.mode = mode;
        self.repace(&mut state);
        Ok(())
    }

    fn set_fps(&mut self, fps: f32) -> X4Result<()> {
        let mut state = self.op("set_fps")?;
        if !fps.is_finite() || fps < 0.0 {
            return Err(X4Error::Nok);
        }
        state.fps = if state.mode == SweepTriggerMode::X4 && fps > 0.0 && fps < 1.0 {
            1.0
        } else {
            fps
        };
        trace!(fps = state.fps, mode = ?state.mode, "Frame rate set");
        self.repace(&mut state);
        Ok(())
    }

    fn fps(&self) -> f32 {
        self.shared.state.lock().fps
    }

    fn start_sweep(&mut self) -> X4Result<()> {
        let swept = {
            let mut state = self.ready_op("start_sweep")?;
            state.sweep()
        };
        if swept {
            self.shared.raise_data_ready();
        }
        Ok(())
    }

    fn set_iterations(&mut self, iterations: u32) -> X4Result<()> {
        let mut state = self.ready_op("set_iterations")?;
        let value = u8::try_from(iterations).map_err(|_| X4Error::Nok)?;
        state.iterations = iterations;
        state.pif[pif::TRX_ITERATIONS as usize] = value;
        Ok(())
    }

    fn iterations(&self) -> X4Result<u32> {
        Ok(self.op("iterations")?.iterations)
    }

    fn set_pulses_per_step(&mut self, pulses: u32) -> X4Result<()> {
        let mut state = self.ready_op("set_pulses_per_step")?;
        let value = u16::try_from(pulses).map_err(|_| X4Error::Nok)?;
        let [msb, lsb] = value.to_be_bytes();
        state.pulses_per_step = pulses;
        state.pif[pif::TRX_PULSES_PER_STEP_MSB as usize] = msb;
        state.pif[pif::TRX_PULSES_PER_STEP_LSB as usize] = lsb;
        Ok(())
    }

    fn pulses_per_step(&self) -> X4Result<u32> {
        Ok(self.op("pulses_per_step")?.pulses_per_step)
    }

    fn set_downconversion(&mut self, enable: u8) -> X4Result<()> {
        let mut state = self.ready_op("set_downconversion")?;
        if enable > 1 {
            return Err(X4Error::Nok);
        }
        state.downconversion = enable;
        state.apply_frame_area()
    }

    fn downconversion(&self) -> X4Result<u8> {
        Ok(self.op("downconversion")?.downconversion)
    }

    fn set_frame_area(&mut self, start: f32, end: f32) -> X4Result<()> {
        let mut state = self.ready_op("set_frame_area")?;
        state.requested_area = FrameArea::clamped(start, end, state.downconversion == 1)?;
        state.apply_frame_area()
    }

    fn frame_area(&self) -> X4Result<FrameArea> {
        Ok(self.op("frame_area")?.area)
    }

    fn set_frame_area_offset(&mut self, offset: f32) -> X4Result<()> {
        let mut state = self.ready_op("set_frame_area_offset")?;
        if !offset.is_finite() {
            return Err(X4Error::Nok);
        }
        state.area_offset = offset;
        state.apply_frame_area()
    }

    fn frame_area_offset(&self) -> X4Result<f32> {
        Ok(self.op("frame_area_offset")?.area_offset)
    }

    fn set_dac_step(&mut self, step: u32) -> X4Result<()> {
        let mut state = self.ready_op("set_dac_step")?;
        if step > 3 {
            return Err(X4Error::InvalidDacStep(step));
        }
        state.dac_step = step;
        state.pif[pif::TRX_DAC_STEP as usize] = step as u8;
        Ok(())
    }

    fn dac_step(&self) -> X4Result<u32> {
        Ok(self.op("dac_step")?.dac_step)
    }

    fn set_dac_min(&mut self, value: u32) -> X4Result<()> {
        let mut state = self.ready_op("set_dac_min")?;
        if value > DAC_MAX_VALUE {
            return Err(X4Error::Nok);
        }
        state.dac_min = value;
        state.pif[pif::TRX_DAC_MIN_H as usize] = (value >> 3) as u8;
        state.pif[pif::TRX_DAC_MIN_L as usize] = (value & 0x07) as u8;
        Ok(())
    }

    fn dac_min(&self) -> X4Result<u32> {
        Ok(self.op("dac_min")?.dac_min)
    }

    fn set_dac_max(&mut self, value: u32) -> X4Result<()> {
        let mut state = self.ready_op("set_dac_max")?;
        if value > DAC_MAX_VALUE {
            return Err(X4Error::Nok);
        }
        state.dac_max = value;
        state.pif[pif::TRX_DAC_MAX_H as usize] = (value >> 3) as u8;
        state.pif[pif::TRX_DAC_MAX_L as usize] = (value & 0x07) as u8;
        Ok(())
    }

    fn dac_max(&self) -> X4Result<u32> {
        Ok(self.op("dac_max")?.dac_max)
    }

    fn set_tx_center_frequency(&mut self, band: TxCenterFrequency) -> X4Result<()> {
        self.ready_op("set_tx_center_frequency")?.tx_center_frequency = band;
        Ok(())
    }

    fn tx_center_frequency(&self) -> X4Result<TxCenterFrequency> {
        Ok(self.op("tx_center_frequency")?.tx_center_frequency)
    }

    fn set_tx_power(&mut self, power: TxPower) -> X4Result<()> {
        self.ready_op("set_tx_power")?.tx_power = power;
        Ok(())
    }

    fn tx_power(&self) -> X4Result<TxPower> {
        Ok(self.op("tx_power")?.tx_power)
    }

    fn set_prf_div(&mut self, div: u8) -> X4Result<()> {
        let mut state = self.ready_op("set_prf_div")?;
        if div < PRF_DIV_MIN {
            return Err(X4Error::PrfDivTooSmall(div));
        }
        state.prf_div = div;
        Ok(())
    }

    fn prf_div(&self) -> X4Result<u8> {
        Ok(self.op("prf_div")?.prf_div)
    }

    fn frame_bin_count(&self) -> X4Result<u32> {
        Ok(self.op("frame_bin_count")?.bin_count())
    }

    fn set_spi_register(&mut self, address: u8, value: u8) -> X4Result<()> {
        self.ready_op("set_spi_register")?.spi[address as usize] = value;
        Ok(())
    }

    fn spi_register(&self, address: u8) -> X4Result<u8> {
        Ok(self.ready_op("spi_register")?.spi[address as usize])
    }

    fn set_pif_register(&mut self, address: u8, value: u8) -> X4Result<()> {
        self.ready_op("set_pif_register")?.pif[address as usize] = value;
        Ok(())
    }

    fn pif_register(&self, address: u8) -> X4Result<u8> {
        Ok(self.ready_op("pif_register")?.pif[address as usize])
    }

    fn set_xif_register(&mut self, address: u8, value: u8) -> X4Result<()> {
        self.ready_op("set_xif_register")?.xif[address as usize] = value;
        Ok(())
    }

    fn xif_register(&self, address: u8) -> X4Result<u8> {
        Ok(self.ready_op("xif_register")?.xif[address as usize])
    }

    fn read_frame_normalized(&mut self, out: &mut [f32]) -> X4Result<u32> {
        let mut state = self.ready_op("read_frame_normalized")?;
        let needed = state.samples_per_frame();
        if out.len() < needed {
            return Err(X4Error::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }
        let counter = state.pending.take().ok_or(X4Error::FrameReadyTimeout)?;
        state
            .pattern
            .fill(&mut out[..needed], counter, &self.shared.rng);
        Ok(counter)
    }
}
