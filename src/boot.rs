//! System boot.
//!
//! [`Firmware::boot`] brings one firmware run up on a [`Board`]: retained
//! counters, safe-mode decision, file store, message bus, services and
//! tasks. The run ends when a task requests a reset; [`Firmware::shutdown`]
//! stops everything and hands back the state the next boot starts from.
//!
//! ```no_run
//! # use xep::boot::{BootState, Board, Firmware};
//! # use xep::config::XepConfig;
//! # async fn reboot_loop(config: XepConfig, make_board: impl Fn() -> Board) -> xep::error::XepResult<()> {
//! let mut state = BootState::power_on(&config);
//! loop {
//!     let firmware = Firmware::boot(&config, state, make_board())?;
//!     let reason = firmware.wait_reset().await;
//!     state = firmware.shutdown(reason);
//! }
//! # }
//! ```

use crate::config::{OperationMode, XepConfig};
use crate::error::XepResult;
use crate::system::{safe_mode_decision, BootDecision, ResetReason, RetainedState, SystemControl};
use crate::tasks::app::{AppTask, SystemInfo, APP_MONITOR_TIMEOUT_MS};
use crate::tasks::hostcom::{HostComCounters, HostComTask, LinkRole, HOSTCOM_MONITOR_TIMEOUT_MS};
use crate::tasks::housekeeping::Housekeeping;
use crate::tasks::monitor::{Monitor, MonitorTask};
use crate::tasks::radar::{RadarControl, RadarTask, RADAR_MONITOR_TIMEOUT_MS};
use crate::transport::Link;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use xep_dispatch::{Dispatcher, TaskNotifier};
use xep_hardware::X4Driver;
use xep_pool::MemoryPoolSet;
use xep_storage::{FileStore, FileSystem, Flash};

/// Hardware one firmware run talks to.
pub struct Board {
    /// Radar chip
    pub driver: Box<dyn X4Driver>,
    /// Flash region of the file store, none to run without storage
    pub flash: Option<Box<dyn Flash>>,
    /// Primary host link
    pub primary: Link,
    /// Debug host link
    pub debug: Option<Link>,
}

impl std::fmt::Debug for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Board")
            .field("flash", &self.flash.is_some())
            .field("primary", &self.primary)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

/// What survives a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootState {
    /// Retained reset counters
    pub retained: RetainedState,
    /// Operating mode of the next run
    pub operation_mode: OperationMode,
}

impl BootState {
    /// State after power-on.
    #[must_use]
    pub fn power_on(config: &XepConfig) -> Self {
        Self {
            retained: RetainedState::default(),
            operation_mode: config.radar.operation_mode,
        }
    }
}

/// One running firmware instance.
pub struct Firmware {
    system: Arc<SystemControl>,
    dispatcher: Arc<Dispatcher>,
    files: Arc<FileSystem>,
    housekeeping: Arc<Housekeeping>,
    control: RadarControl,
    hostcom: Vec<Arc<HostComCounters>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl std::fmt::Debug for Firmware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firmware")
            .field("system", &self.system)
            .field("tasks", &self.tasks.iter().map(|(n, _)| *n).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Firmware {
    /// Boot the firmware on `board`. Must be called inside a Tokio runtime.
    pub fn boot(config: &XepConfig, state: BootState, board: Board) -> XepResult<Self> {
        let mut retained = state.retained;
        retained.on_boot();
        let decision = safe_mode_decision(&retained);
        let safe_mode = decision != BootDecision::Normal;
        info!(
            reset_reason = ?retained.reset_reason,
            reset_count = retained.reset_count,
            crash_count = retained.crash_count,
            operation_mode = ?state.operation_mode,
            safe_mode,
            "Booting"
        );

        let system = Arc::new(SystemControl::new(
            retained,
            state.operation_mode,
            safe_mode,
        ));
        system.set_certification_mode(config.radar.certification_mode);

        let files = Arc::new(Self::mount(board.flash));

        let pools = MemoryPoolSet::with_pools(&config.pool_specs())?;
        let dispatcher = Arc::new(Dispatcher::new(
            pools,
            config.dispatch.dispatcher_config(),
        ));

        let monitor = Arc::new(Monitor::new(Duration::from_millis(config.monitor.cycle_ms)));
        let housekeeping = Arc::new(Housekeeping::new(
            files.clone(),
            dispatcher.clone(),
            monitor.clone(),
            system.clone(),
            format!(
                "{} {} {}",
                config.application.firmware_id, config.application.version, config.application.build
            ),
        ));
        let control = RadarControl::new(
            board.driver,
            Arc::new(TaskNotifier::new()),
            &config.radar,
        )?;

        let mut hostcom_tasks = vec![HostComTask::new(
            LinkRole::Primary,
            dispatcher.clone(),
            board.primary,
            &config.hostcom,
            config.dispatch.hostcom_queue_capacity,
            monitor.register(LinkRole::Primary.name(), HOSTCOM_MONITOR_TIMEOUT_MS),
        )?];
        if let Some(link) = board.debug {
            hostcom_tasks.push(HostComTask::new(
                LinkRole::Debug,
                dispatcher.clone(),
                link,
                &config.hostcom,
                config.dispatch.hostcom_queue_capacity,
                monitor.register(LinkRole::Debug.name(), HOSTCOM_MONITOR_TIMEOUT_MS),
            )?);
        }
        let hostcom: Vec<_> = hostcom_tasks.iter().map(HostComTask::counters).collect();

        let app = AppTask::new(
            dispatcher.clone(),
            config.dispatch.application_queue_capacity,
            control.clone(),
            housekeeping.clone(),
            files.clone(),
            system.clone(),
            SystemInfo::from(&config.application),
            monitor.register("app", APP_MONITOR_TIMEOUT_MS),
        )?;

        let radar = (!safe_mode).then(|| {
            RadarTask::new(
                control.clone(),
                dispatcher.clone(),
                system.clone(),
                monitor.register("radar", RADAR_MONITOR_TIMEOUT_MS),
                &config.radar,
            )
        });

        let mut tasks = Vec::new();
        for (task, role) in hostcom_tasks.into_iter().zip([LinkRole::Primary, LinkRole::Debug]) {
            tasks.push((role.name(), tokio::spawn(task.run())));
        }
        tasks.push(("app", tokio::spawn(app.run())));
        match radar {
            Some(radar) => tasks.push(("radar", tokio::spawn(radar.run()))),
            None => warn!("Safe mode: radar task not started"),
        }
        tasks.push((
            "monitor",
            tokio::spawn(
                MonitorTask::new(monitor, housekeeping.clone(), system.clone(), &config.monitor)
                    .run(),
            ),
        ));

        if decision == BootDecision::EnterBootloader {
            error!(crash_count = retained.crash_count, "Too many crashes, entering bootloader");
            system.request_reset(ResetReason::Bootloader);
        }

        info!(tasks = tasks.len(), "Firmware started");
        Ok(Self {
            system,
            dispatcher,
            files,
            housekeeping,
            control,
            hostcom,
            tasks,
        })
    }

    fn mount(flash: Option<Box<dyn Flash>>) -> FileSystem {
        let Some(flash) = flash else {
            warn!("No flash, running without file store");
            return FileSystem::detached();
        };
        match FileStore::init(flash) {
            Ok(store) => {
                if store.formatted_on_init() {
                    warn!("File store was corrupt and has been formatted");
                }
                FileSystem::new(store)
            }
            Err(e) => {
                error!(error = %e, "File store unavailable");
                FileSystem::detached()
            }
        }
    }

    /// System controller of this run.
    #[must_use]
    pub fn system(&self) -> &Arc<SystemControl> {
        &self.system
    }

    /// Message bus of this run.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// File layer of this run.
    #[must_use]
    pub fn files(&self) -> &Arc<FileSystem> {
        &self.files
    }

    /// Crash dump service of this run.
    #[must_use]
    pub fn housekeeping(&self) -> &Arc<Housekeeping> {
        &self.housekeeping
    }

    /// Radar control surface.
    #[must_use]
    pub fn radar(&self) -> &RadarControl {
        &self.control
    }

    /// Counters of each host link, primary first.
    #[must_use]
    pub fn hostcom_counters(&self) -> &[Arc<HostComCounters>] {
        &self.hostcom
    }

    /// Names of the running tasks.
    #[must_use]
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// Wait for a reset request.
    pub async fn wait_reset(&self) -> ResetReason {
        self.system.reset_requested().await
    }

    /// Stop every task and the chip, returning the next boot's state.
    ///
    /// A run that armed the certification mode boots the next one into it;
    /// disarming it falls back to normal operation.
    #[must_use]
    pub fn shutdown(self, reason: ResetReason) -> BootState {
        for (name, task) in &self.tasks {
            task.abort();
            tracing::debug!(task = name, "Task stopped");
        }
        self.control.stop();

        let operation_mode = match (
            self.system.certification_armed(),
            self.system.operation_mode(),
        ) {
            (true, _) => OperationMode::Certification,
            (false, OperationMode::Certification) => OperationMode::Normal,
            (false, mode) => mode,
        };
        info!(?reason, ?operation_mode, "Reset");
        BootState {
            retained: self.system.retained().after_reset(reason),
            operation_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use xep_hardware::{FramePattern, MockX4};
    use xep_storage::MemFlash;

    fn board(flash: &MemFlash) -> (Arc<LoopbackTransport>, Board) {
        let (host, link) = LoopbackTransport::new("host");
        let board = Board {
            driver: Box::new(MockX4::manual(1, FramePattern::Ramp)),
            flash: Some(Box::new(flash.clone())),
            primary: link,
            debug: None,
        };
        (host, board)
    }

    #[tokio::test]
    async fn test_boot_announces_ready() {
        let config = XepConfig::default();
        let flash = MemFlash::new(64 * 1024, 512, 4096);
        let (host, board) = board(&flash);

        let firmware = Firmware::boot(&config, BootState::power_on(&config), board).unwrap();
        assert_eq!(firmware.task_names(), vec!["hostcom", "app", "radar", "monitor"]);
        assert!(host.wait_for_frames(2, Duration::from_secs(2)).await);
        assert!(firmware.files().store().is_some());

        let next = firmware.shutdown(ResetReason::HostCommand);
        assert_eq!(next.retained.reset_reason, ResetReason::HostCommand);
        assert_eq!(next.retained.reset_count, 1);
        assert_eq!(next.operation_mode, OperationMode::Normal);
    }

    #[tokio::test]
    async fn test_safe_mode_skips_radar() {
        let config = XepConfig::default();
        let flash = MemFlash::new(64 * 1024, 512, 4096);
        let (_host, board) = board(&flash);
        let state = BootState {
            retained: RetainedState {
                reset_reason: ResetReason::HardFault,
                reset_count: 20,
                crash_count: 10,
            },
            operation_mode: OperationMode::Normal,
        };

        let firmware = Firmware::boot(&config, state, board).unwrap();
        assert!(firmware.system().is_safe_mode());
        assert!(!firmware.task_names().contains(&"radar"));
        let _ = firmware.shutdown(ResetReason::Intended);
    }

    #[tokio::test]
    async fn test_crash_loop_requests_bootloader() {
        let config = XepConfig::default();
        let flash = MemFlash::new(64 * 1024, 512, 4096);
        let (_host, board) = board(&flash);
        let state = BootState {
            retained: RetainedState {
                reset_reason: ResetReason::Wdt,
                reset_count: 30,
                crash_count: 16,
            },
            operation_mode: OperationMode::Normal,
        };

        let firmware = Firmware::boot(&config, state, board).unwrap();
        let reason = firmware.wait_reset().await;
        assert_eq!(reason, ResetReason::Bootloader);
        let next = firmware.shutdown(reason);
        assert_eq!(next.retained.reset_reason, ResetReason::Bootloader);
    }

    #[tokio::test]
    async fn test_armed_certification_survives_reset() {
        let config = XepConfig::default();
        let flash = MemFlash::new(64 * 1024, 512, 4096);
        let (_host, board) = board(&flash);

        let firmware = Firmware::boot(&config, BootState::power_on(&config), board).unwrap();
        firmware.system().arm_certification(true);
        let next = firmware.shutdown(ResetReason::HostCommand);
        assert_eq!(next.operation_mode, OperationMode::Certification);
    }

    #[tokio::test]
    async fn test_boot_without_flash() {
        let config = XepConfig::default();
        let (_host, link) = LoopbackTransport::new("host");
        let board = Board {
            driver: Box::new(MockX4::manual(1, FramePattern::Ramp)),
            flash: None,
            primary: link,
            debug: None,
        };
        let firmware = Firmware::boot(&config, BootState::power_on(&config), board).unwrap();
        assert!(firmware.files().store().is_none());
        assert_eq!(firmware.housekeeping().crash_dump_len(), 0);
        let _ = firmware.shutdown(ResetReason::Intended);
    }
}
