//! Radar acquisition.
//!
//! The chip raises data-ready from interrupt context; the handler installed
//! here only sets [`DATA_READY`] on the task's [`TaskNotifier`]. The task
//! drains the chip on every data-ready, whatever happens downstream: when the
//! dispatcher has no block the frame is read into a scratch buffer and
//! dropped.
//!
//! A run of all-zero frames means a broken front end. After
//! `zero_frame_threshold` of them in a row the transmitter is switched off
//! and sweeping stops.

use crate::config::{OperationMode, RadarConfig};
use crate::error::{XepError, XepResult};
use crate::system::SystemControl;
use crate::tasks::certification::CertificationFsm;
use crate::tasks::monitor::MonitorHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use xep_dispatch::{Dispatcher, TaskNotifier, Topic};
use xep_hardware::{
    SweepTriggerMode, TxCenterFrequency, TxPower, X4Driver, X4Error, X4Result,
};

/// A frame is waiting in the chip.
pub const DATA_READY: u32 = 0x1;
/// The MCU sweep timer fired.
pub const TRIGGER_SWEEP: u32 = 0x2;
/// The driver's action timer fired.
pub const DRIVER_ACTION: u32 = 0x4;

/// Monitor timeout of the radar task.
pub const RADAR_MONITOR_TIMEOUT_MS: u32 = 1000;

const DRIVER_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Acquisition state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadarState {
    /// Chip not brought up yet
    Uninitialized,
    /// Chip initialized, no pacing selected
    Idle,
    /// Sweeps only on explicit request
    Manual,
    /// The chip paces sweeps
    SweepTriggerX4,
    /// The MCU timer paces sweeps
    SweepTriggerMcu,
}

impl From<SweepTriggerMode> for RadarState {
    fn from(mode: SweepTriggerMode) -> Self {
        match mode {
            SweepTriggerMode::Manual => Self::Manual,
            SweepTriggerMode::X4 => Self::SweepTriggerX4,
            SweepTriggerMode::Mcu => Self::SweepTriggerMcu,
        }
    }
}

/// Counts consecutive all-zero frames.
#[derive(Debug, Clone)]
pub struct ZeroFrameGuard {
    threshold: u32,
    count: u32,
}

impl ZeroFrameGuard {
    /// Guard tripping after `threshold` zero frames in a row.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            count: 0,
        }
    }

    /// Feed one frame. Returns `true` when the guard trips; the count then
    /// starts over.
    pub fn observe(&mut self, samples: &[f32]) -> bool {
        if samples.iter().any(|s| *s != 0.0) {
            self.count = 0;
            return false;
        }
        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            return true;
        }
        false
    }

    /// Zero frames seen since the last valid frame.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Snapshot of the acquisition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadarStats {
    /// Frames published on the radar-data topic
    pub frames_published: u64,
    /// Frames read and dropped for lack of memory or queue space
    pub frames_dropped: u64,
    /// Frames read and released by a certification streaming mode
    pub frames_discarded: u64,
    /// Times the zero-frame guard shut the transmitter off
    pub zero_frame_shutdowns: u64,
}

#[derive(Debug, Default)]
struct RadarCounters {
    published: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
    zero_frame_shutdowns: AtomicU64,
}

/// Power-on defaults applied at startup and by an X4 init command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarDefaults {
    /// Antenna range offset
    pub frame_area_offset: f32,
    /// Transmit power
    pub tx_power: TxPower,
    /// Pulse repetition divider
    pub prf_div: u8,
    /// Transmit band
    pub tx_center_frequency: TxCenterFrequency,
}

impl RadarDefaults {
    /// Validate the configured defaults.
    pub fn from_config(config: &RadarConfig) -> X4Result<Self> {
        Ok(Self {
            frame_area_offset: config.frame_area_offset,
            tx_power: TxPower::try_from(config.tx_power)?,
            prf_div: config.prf_div,
            tx_center_frequency: TxCenterFrequency::try_from(config.tx_center_frequency)?,
        })
    }
}

struct RadarShared {
    driver: Mutex<Box<dyn X4Driver>>,
    notifier: Arc<TaskNotifier>,
    sweep_timer: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<RadarState>,
    defaults: RadarDefaults,
    counters: RadarCounters,
}

impl Drop for RadarShared {
    fn drop(&mut self) {
        if let Some(timer) = self.sweep_timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Configuration surface of the radar, shared by the radar and application
/// tasks.
#[derive(Clone)]
pub struct RadarControl {
    inner: Arc<RadarShared>,
}

impl std::fmt::Debug for RadarControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadarControl")
            .field("state", &self.state())
            .field("defaults", &self.inner.defaults)
            .finish_non_exhaustive()
    }
}

impl RadarControl {
    /// Take over `driver` and route its data-ready signal to `notifier`.
    pub fn new(
        mut driver: Box<dyn X4Driver>,
        notifier: Arc<TaskNotifier>,
        config: &RadarConfig,
    ) -> XepResult<Self> {
        let defaults = RadarDefaults::from_config(config)?;
        let isr_notifier = notifier.clone();
        driver.set_data_ready_handler(Arc::new(move || isr_notifier.notify(DATA_READY)));
        Ok(Self {
            inner: Arc::new(RadarShared {
                driver: Mutex::new(driver),
                notifier,
                sweep_timer: Mutex::new(None),
                state: Mutex::new(RadarState::Uninitialized),
                defaults,
                counters: RadarCounters::default(),
            }),
        })
    }

    /// Run `f` with exclusive access to the driver.
    ///
    /// The driver raises data-ready synchronously from some calls, so the
    /// handler must never take this lock.
    pub fn with_driver<R>(
        &self,
        f: impl FnOnce(&mut dyn X4Driver) -> X4Result<R>,
    ) -> X4Result<R> {
        let mut driver = self
            .inner
            .driver
            .try_lock_for(DRIVER_LOCK_TIMEOUT)
            .ok_or(X4Error::Busy)?;
        f(driver.as_mut())
    }

    /// Notifier the radar task waits on.
    #[must_use]
    pub fn notifier(&self) -> &Arc<TaskNotifier> {
        &self.inner.notifier
    }

    /// Current acquisition state.
    #[must_use]
    pub fn state(&self) -> RadarState {
        *self.inner.state.lock()
    }

    /// Configured power-on defaults.
    #[must_use]
    pub fn defaults(&self) -> RadarDefaults {
        self.inner.defaults
    }

    /// Acquisition counters.
    #[must_use]
    pub fn stats(&self) -> RadarStats {
        let c = &self.inner.counters;
        RadarStats {
            frames_published: c.published.load(Ordering::Relaxed),
            frames_dropped: c.dropped.load(Ordering::Relaxed),
            frames_discarded: c.discarded.load(Ordering::Relaxed),
            zero_frame_shutdowns: c.zero_frame_shutdowns.load(Ordering::Relaxed),
        }
    }

    /// Bring the chip up.
    ///
    /// Enables and initializes the chip, runs the IO connectivity test in
    /// factory mode, hands pacing to the chip and applies the defaults. The
    /// first failure is returned after every step has been attempted.
    pub fn startup(&self, operation_mode: OperationMode) -> X4Result<()> {
        let status = self.with_driver(|d| {
            d.set_enable(1)?;
            let mut status = d.init();
            if operation_mode == OperationMode::Factory {
                if let Err(e) = d.test_io_connectivity() {
                    warn!(error = %e, "X4 IO connectivity test failed");
                    status = Err(e);
                }
                d.init()?;
            }
            if let Err(e) = d.check_configuration() {
                warn!(error = %e, "X4 configuration check failed");
            }
            status
        });
        *self.inner.state.lock() = RadarState::Idle;

        let mode = self.set_sweep_trigger_mode(SweepTriggerMode::X4);
        let defaults = self.apply_defaults();
        info!(state = ?self.state(), "Radar started");
        status.and(mode).and(defaults)
    }

    /// Re-initialize the chip on host request.
    pub fn x4_init(&self) -> X4Result<()> {
        self.with_driver(|d| {
            d.init()?;
            d.check_configuration()
        })?;
        self.set_sweep_trigger_mode(SweepTriggerMode::X4)?;
        self.apply_defaults()
    }

    /// Apply the configured offset, power, PRF divider and band.
    pub fn apply_defaults(&self) -> X4Result<()> {
        let defaults = self.inner.defaults;
        self.with_driver(|d| {
            d.set_frame_area_offset(defaults.frame_area_offset)?;
            d.set_tx_power(defaults.tx_power)?;
            d.set_prf_div(defaults.prf_div)?;
            d.set_tx_center_frequency(defaults.tx_center_frequency)
        })
    }

    /// Set the frame rate and re-program the MCU sweep timer.
    pub fn set_fps(&self, fps: f32) -> X4Result<()> {
        let mode = self.with_driver(|d| {
            d.set_fps(fps)?;
            Ok(d.sweep_trigger_mode())
        })?;
        self.reprogram_sweep_timer(mode, fps);
        Ok(())
    }

    /// Change who paces sweeps.
    pub fn set_sweep_trigger_mode(&self, mode: SweepTriggerMode) -> X4Result<()> {
        let fps = self.with_driver(|d| {
            d.set_sweep_trigger_mode(mode)?;
            Ok(d.fps())
        })?;
        self.reprogram_sweep_timer(mode, fps);
        *self.inner.state.lock() = mode.into();
        debug!(?mode, "Sweep trigger mode set");
        Ok(())
    }

    /// Current sweep pacing.
    pub fn sweep_trigger_mode(&self) -> X4Result<SweepTriggerMode> {
        self.with_driver(|d| Ok(d.sweep_trigger_mode()))
    }

    /// Switch the transmitter off and stop sweeping.
    pub fn shut_down_transmitter(&self) -> X4Result<()> {
        self.inner
            .counters
            .zero_frame_shutdowns
            .fetch_add(1, Ordering::Relaxed);
        self.with_driver(|d| d.set_tx_power(TxPower::Off))?;
        self.set_fps(0.0)
    }

    /// Stop the sweep timer and power the chip down.
    pub fn stop(&self) {
        self.reprogram_sweep_timer(SweepTriggerMode::Manual, 0.0);
        if let Err(e) = self.with_driver(|d| d.set_enable(0)) {
            debug!(error = %e, "X4 disable failed");
        }
        *self.inner.state.lock() = RadarState::Uninitialized;
    }

    fn reprogram_sweep_timer(&self, mode: SweepTriggerMode, fps: f32) {
        let mut timer = self.inner.sweep_timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        if mode != SweepTriggerMode::Mcu || !fps.is_finite() || fps <= 0.0 {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime for the sweep timer");
            return;
        };

        let period = Duration::from_secs_f32(1.0 / fps);
        let notifier = self.inner.notifier.clone();
        debug!(fps, ?period, "MCU sweep timer started");
        *timer = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                notifier.notify(TRIGGER_SWEEP);
            }
        }));
    }

    fn counters(&self) -> &RadarCounters {
        &self.inner.counters
    }
}

/// The radar acquisition task.
pub struct RadarTask {
    control: RadarControl,
    dispatcher: Arc<Dispatcher>,
    system: Arc<SystemControl>,
    monitor: Option<MonitorHandle>,
    loop_wait: Duration,
    guard: ZeroFrameGuard,
    certification: CertificationFsm,
    scratch: Vec<f32>,
}

impl RadarTask {
    /// Create the task.
    #[must_use]
    pub fn new(
        control: RadarControl,
        dispatcher: Arc<Dispatcher>,
        system: Arc<SystemControl>,
        monitor: Option<MonitorHandle>,
        config: &RadarConfig,
    ) -> Self {
        Self {
            control,
            dispatcher,
            system,
            monitor,
            loop_wait: Duration::from_millis(config.loop_wait_ms),
            guard: ZeroFrameGuard::new(config.zero_frame_threshold),
            certification: CertificationFsm::default(),
            scratch: Vec::new(),
        }
    }

    /// Bring the chip up and service it forever.
    pub async fn run(mut self) {
        if let Err(e) = self.control.startup(self.system.operation_mode()) {
            error!(error = %e, "Radar initialization failed");
        }
        let notifier = self.control.notifier().clone();

        loop {
            if let Some(monitor) = &self.monitor {
                monitor.alive();
            }
            if self.system.operation_mode() == OperationMode::Certification {
                self.poll_certification();
            }

            let bits = notifier.wait(self.loop_wait).await;
            if bits == 0 {
                continue;
            }

            if bits & DATA_READY != 0 {
                self.on_data_ready();
            }
            if bits & TRIGGER_SWEEP != 0 {
                if let Err(e) = self.control.with_driver(|d| d.start_sweep()) {
                    debug!(error = %e, "Sweep trigger failed");
                }
            }
            if bits & DRIVER_ACTION != 0 {
                trace!("Driver action event");
            }
        }
    }

    fn poll_certification(&mut self) {
        let selector = self.system.certification_mode();
        let power = self.control.defaults().tx_power;
        let fsm = &mut self.certification;
        if let Err(e) = self
            .control
            .with_driver(|d| Ok(fsm.step(selector, d, power)))
        {
            debug!(error = %e, selector, "Certification poll skipped");
        }
    }

    fn on_data_ready(&mut self) {
        match self.control.sweep_trigger_mode() {
            Ok(SweepTriggerMode::Manual) => {}
            Ok(_) => {
                if let Err(e) = self.read_and_send() {
                    debug!(error = %e, "Frame not published");
                }
            }
            Err(e) => debug!(error = %e, "Driver busy"),
        }
    }

    /// Read one frame and publish it on the radar-data topic.
    pub fn read_and_send(&mut self) -> XepResult<()> {
        let (bins, downconversion) = self
            .control
            .with_driver(|d| Ok((d.frame_bin_count()?, d.downconversion()?)))?;
        let samples = if downconversion == 1 {
            bins as usize * 2
        } else {
            bins as usize
        };
        if self.scratch.len() < samples {
            self.scratch.resize(samples, 0.0);
        }

        let block = self.dispatcher.get_block(Dispatcher::radar_frame_size(samples));
        let frame = &mut self.scratch[..samples];
        let counter = self
            .control
            .with_driver(|d| d.read_frame_normalized(frame))?;

        if self.guard.observe(frame) {
            error!(
                threshold = self.guard.threshold,
                "Zero frames from radar, shutting transmitter off"
            );
            self.control.shut_down_transmitter()?;
        }

        let block = match block {
            Ok(block) => block,
            Err(e) => {
                self.control.counters().dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    frame_counter = counter,
                    dropped = self.control.stats().frames_dropped,
                    statistics = %self.dispatcher.pools().statistics(),
                    "No memory for radar frame, dropped"
                );
                return Err(e.into());
            }
        };

        if self.certification.mode().discards_frames() {
            self.control.counters().discarded.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        match self
            .dispatcher
            .send_radar_frame(Topic::RadarData, block, counter, frame, None)
        {
            Ok(_) => {
                self.control.counters().published.fetch_add(1, Ordering::Relaxed);
                trace!(frame_counter = counter, bins, "Radar frame published");
                Ok(())
            }
            Err(e) => {
                self.control.counters().dropped.fetch_add(1, Ordering::Relaxed);
                warn!(frame_counter = counter, error = %e, "Radar frame not delivered");
                Err(XepError::from(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::RetainedState;
    use tracing_test::traced_test;
    use xep_dispatch::{Content, DispatcherConfig};
    use xep_hardware::{FramePattern, MockX4};
    use xep_pool::MemoryPoolSet;

    fn setup(
        pools: &[(usize, usize)],
        pattern: FramePattern,
        threshold: u32,
    ) -> (RadarTask, MockX4, Arc<Dispatcher>) {
        let mock = MockX4::manual(11, pattern);
        let config = RadarConfig {
            zero_frame_threshold: threshold,
            ..RadarConfig::default()
        };
        let control = RadarControl::new(
            Box::new(mock.clone()),
            Arc::new(TaskNotifier::new()),
            &config,
        )
        .unwrap();
        control.startup(OperationMode::Normal).unwrap();
        control.set_fps(0.0).unwrap();

        let pools = MemoryPoolSet::with_pools(pools).unwrap();
        let dispatcher = Arc::new(Dispatcher::new(pools, DispatcherConfig::default()));
        let system = Arc::new(SystemControl::new(
            RetainedState::default(),
            OperationMode::Normal,
            false,
        ));
        let task = RadarTask::new(control, dispatcher.clone(), system, None, &config);
        (task, mock, dispatcher)
    }

    #[test]
    fn test_guard_trips_once_per_run() {
        let mut guard = ZeroFrameGuard::new(3);
        let zeros = [0.0f32; 8];
        let valid = [0.0, 0.5, 0.0];

        assert!(!guard.observe(&zeros));
        assert!(!guard.observe(&zeros));
        assert!(!guard.observe(&valid));
        assert_eq!(guard.count(), 0);

        assert!(!guard.observe(&zeros));
        assert!(!guard.observe(&zeros));
        assert!(guard.observe(&zeros));
        assert_eq!(guard.count(), 0);
        assert!(!guard.observe(&zeros));
    }

    #[test]
    fn test_startup_applies_defaults() {
        let (task, mock, _) = setup(&[(7000, 1)], FramePattern::Ramp, 100);
        let control = task.control.clone();
        assert_eq!(control.state(), RadarState::SweepTriggerX4);

        let (power, prf, offset) = control
            .with_driver(|d| Ok((d.tx_power()?, d.prf_div()?, d.frame_area_offset()?)))
            .unwrap();
        assert_eq!(power, TxPower::Medium);
        assert_eq!(prf, 16);
        assert!((offset - 0.18).abs() < 1e-6);
        assert_eq!(mock.call_count("test_io_connectivity"), 0);
    }

    #[test]
    fn test_frame_published() {
        let (mut task, mock, dispatcher) = setup(&[(7000, 1)], FramePattern::Ramp, 100);
        let queue = dispatcher.register("sink", 4);
        dispatcher.subscribe(Topic::RadarData, &queue).unwrap();

        assert!(mock.trigger_frame());
        task.read_and_send().unwrap();

        let message = queue.try_recv().unwrap();
        match message.decode().unwrap() {
            Content::Bulk { header, data } => {
                assert_eq!(
                    header,
                    xep_dispatch::BulkHeader::RadarFrame { frame_counter: 1 }
                );
                assert_eq!(data.len(), 1536 * 4);
            }
            other => panic!("unexpected content {other:?}"),
        }
        assert_eq!(task.control.stats().frames_published, 1);
    }

    #[test]
    fn test_frame_drained_without_memory() {
        let (mut task, mock, dispatcher) = setup(&[(100, 1)], FramePattern::Ramp, 100);
        let queue = dispatcher.register("sink", 4);
        dispatcher.subscribe(Topic::RadarData, &queue).unwrap();

        assert!(mock.trigger_frame());
        assert!(task.read_and_send().is_err());
        assert!(queue.is_empty());
        assert_eq!(task.control.stats().frames_dropped, 1);

        // The frame was consumed from the chip
        assert!(task.read_and_send().is_err());
        assert_eq!(task.control.stats().frames_dropped, 1);
    }

    #[test]
    #[traced_test]
    fn test_certification_poll_retries_when_driver_busy() {
        use crate::tasks::certification::CertificationMode;

        let (mut task, mock, _dispatcher) = setup(&[(7000, 1)], FramePattern::Ramp, 100);
        task.system.set_certification_mode(5);

        let control = task.control.clone();
        control
            .with_driver(|_| {
                task.poll_certification();
                Ok(())
            })
            .unwrap();
        assert!(logs_contain("Certification poll skipped"));
        assert_eq!(task.certification.mode(), CertificationMode::Idle);

        task.poll_certification();
        assert_eq!(task.certification.mode(), CertificationMode::Stream);
        assert_eq!(mock.fps(), 20.0);
    }

    #[test]
    #[traced_test]
    fn test_zero_frames_shut_transmitter_off() {
        let (mut task, mock, _dispatcher) = setup(&[(7000, 2)], FramePattern::Zeros, 5);
        task.control.set_fps(10.0).unwrap();

        for _ in 0..4 {
            mock.trigger_frame();
            let _ = task.read_and_send();
        }
        assert_eq!(task.control.stats().zero_frame_shutdowns, 0);

        mock.trigger_frame();
        let _ = task.read_and_send();
        let stats = task.control.stats();
        assert_eq!(stats.zero_frame_shutdowns, 1);

        let (power, fps) = task
            .control
            .with_driver(|d| Ok((d.tx_power()?, d.fps())))
            .unwrap();
        assert_eq!(power, TxPower::Off);
        assert_eq!(fps, 0.0);
        assert!(logs_contain("Zero frames from radar"));
    }

    #[tokio::test]
    async fn test_mcu_timer_paces_sweeps() {
        let (task, mock, dispatcher) = setup(&[(7000, 4)], FramePattern::Ramp, 100);
        let queue = dispatcher.register("sink", 16);
        dispatcher.subscribe(Topic::RadarData, &queue).unwrap();
        let control = task.control.clone();
        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        control.set_sweep_trigger_mode(SweepTriggerMode::Mcu).unwrap();
        control.set_fps(100.0).unwrap();
        assert_eq!(control.state(), RadarState::SweepTriggerMcu);

        let frame = queue.recv_timeout(Duration::from_secs(2)).await;
        assert!(frame.is_some());
        assert!(mock.frame_counter() >= 1);

        control.set_fps(0.0).unwrap();
        handle.abort();
    }
}
