//! Task watchdog.
//!
//! Every long-running task registers a slot with its own timeout and calls
//! [`MonitorHandle::alive`] from its main loop. The monitor task counts every
//! slot down once per cycle; a slot that runs out means the task is wedged,
//! which is answered with a full crash dump and a reset.

use crate::config::MonitorConfig;
use crate::system::{ResetReason, SystemControl};
use crate::tasks::housekeeping::Housekeeping;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Size of the task table.
pub const MAX_TASKS: usize = 10;

#[derive(Debug)]
struct Slot {
    name: String,
    timeout_ms: u32,
    reload: i32,
    ticks: AtomicI32,
}

/// Check-in handle held by a monitored task.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    slot: Arc<Slot>,
}

impl MonitorHandle {
    /// Reload the task's countdown.
    pub fn alive(&self) {
        self.slot.ticks.store(self.slot.reload, Ordering::Release);
    }

    /// Name the task registered with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.slot.name
    }
}

/// One row of the task table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    /// Task name
    pub name: String,
    /// Cycles left before the task is declared hung
    pub ticks_left: i32,
    /// Declared timeout
    pub timeout_ms: u32,
}

/// Fixed table of monitored tasks.
#[derive(Debug)]
pub struct Monitor {
    cycle: Duration,
    slots: Mutex<Vec<Arc<Slot>>>,
}

impl Monitor {
    /// Empty table checked every `cycle`.
    #[must_use]
    pub fn new(cycle: Duration) -> Self {
        Self {
            cycle,
            slots: Mutex::new(Vec::with_capacity(MAX_TASKS)),
        }
    }

    /// Check cycle.
    #[must_use]
    pub fn cycle(&self) -> Duration {
        self.cycle
    }

    /// Add a task. Returns `None` when the table is full.
    pub fn register(&self, name: &str, timeout_ms: u32) -> Option<MonitorHandle> {
        let mut slots = self.slots.lock();
        if slots.len() >= MAX_TASKS {
            warn!(task = name, "Task table full, not monitored");
            return None;
        }
        let cycle_ms = u32::try_from(self.cycle.as_millis()).unwrap_or(u32::MAX).max(1);
        let reload = i32::try_from(timeout_ms / cycle_ms).unwrap_or(i32::MAX);
        let slot = Arc::new(Slot {
            name: name.to_string(),
            timeout_ms,
            reload,
            ticks: AtomicI32::new(reload),
        });
        slots.push(slot.clone());
        debug!(task = name, timeout_ms, "Task monitored");
        Some(MonitorHandle { slot })
    }

    /// Count every slot down by one. Returns the first task that timed out.
    pub fn tick(&self) -> Option<String> {
        let slots = self.slots.lock();
        let mut expired = None;
        for slot in slots.iter() {
            let left = slot.ticks.fetch_sub(1, Ordering::AcqRel) - 1;
            if left < 0 && expired.is_none() {
                expired = Some(slot.name.clone());
            }
        }
        expired
    }

    /// Current table contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskStatus> {
        self.slots
            .lock()
            .iter()
            .map(|slot| TaskStatus {
                name: slot.name.clone(),
                ticks_left: slot.ticks.load(Ordering::Acquire),
                timeout_ms: slot.timeout_ms,
            })
            .collect()
    }
}

/// The watchdog loop.
pub struct MonitorTask {
    monitor: Arc<Monitor>,
    housekeeping: Arc<Housekeeping>,
    system: Arc<SystemControl>,
    crash_count_reset: Duration,
}

impl MonitorTask {
    /// Create the task.
    #[must_use]
    pub fn new(
        monitor: Arc<Monitor>,
        housekeeping: Arc<Housekeeping>,
        system: Arc<SystemControl>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            monitor,
            housekeeping,
            system,
            crash_count_reset: Duration::from_secs(config.crash_count_reset_secs),
        }
    }

    /// Run until a reset is requested.
    pub async fn run(self) {
        if self.system.retained().reset_reason == ResetReason::HardWdt {
            error!("Booted after hard watchdog timeout");
            if let Err(e) =
                self.housekeeping
                    .trigger_crash_dump(ResetReason::HardWdt, "Hard watchdog timeout", false)
            {
                warn!(error = %e, "Crash dump not written");
            }
            self.system.request_reset(ResetReason::SystemMonitor);
            return;
        }

        let mut interval = tokio::time::interval(self.monitor.cycle());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        let mut crash_count_cleared = false;

        loop {
            interval.tick().await;

            if !crash_count_cleared
                && Duration::from_micros(self.system.uptime_us()) >= self.crash_count_reset
            {
                self.system.reset_crash_count();
                crash_count_cleared = true;
            }

            if let Some(task) = self.monitor.tick() {
                error!(task = %task, "Task timeout");
                let info = format!("Task timeout: {task}");
                match self
                    .housekeeping
                    .trigger_crash_dump(ResetReason::SystemMonitor, &info, true)
                {
                    Ok(size) => info!(size, "Crash dump written"),
                    Err(e) => warn!(error = %e, "Crash dump not written"),
                }
                self.system.request_reset(ResetReason::SystemMonitor);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_expires_silent_task() {
        let monitor = Monitor::new(Duration::from_millis(100));
        let radar = monitor.register("radar", 300).unwrap();
        let _app = monitor.register("app", 1000).unwrap();

        for _ in 0..3 {
            assert_eq!(monitor.tick(), None);
        }
        assert_eq!(monitor.tick(), Some("radar".to_string()));

        radar.alive();
        let status = monitor.snapshot();
        assert_eq!(status[0].ticks_left, 3);
        assert_eq!(status[1].ticks_left, 6);
    }

    #[test]
    fn test_alive_keeps_task_running() {
        let monitor = Monitor::new(Duration::from_millis(100));
        let handle = monitor.register("hostcom", 200).unwrap();
        for _ in 0..20 {
            handle.alive();
            assert_eq!(monitor.tick(), None);
        }
    }

    #[test]
    fn test_table_is_bounded() {
        let monitor = Monitor::new(Duration::from_millis(100));
        for i in 0..MAX_TASKS {
            assert!(monitor.register(&format!("task{i}"), 1000).is_some());
        }
        assert!(monitor.register("extra", 1000).is_none());
    }
}
