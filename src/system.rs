//! Reset bookkeeping, safe mode and boot-time link selection.
//!
//! [`RetainedState`] models the few words that survive a reset in retained
//! RAM: the reason for the last reset, how many resets happened, and how many
//! of those were crashes. [`SystemControl`] is the running firmware's handle
//! on that state; tasks use it to request a reset, which the boot loop in
//! `main` turns into an in-process reboot.

use crate::config::OperationMode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Crash count at which the firmware boots into safe mode.
pub const SAFE_MODE_CRASH_COUNT: u32 = 10;

/// Crash count above which the firmware gives up and enters the bootloader.
pub const BOOTLOADER_CRASH_COUNT: u32 = 15;

/// Why the previous run ended. Values are stored in crash dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ResetReason {
    #[default]
    None = 0x00,
    Intended = 0x01,
    Bootloader = 0x02,
    SystemMonitor = 0x10,
    MallocFailed = 0x11,
    StackOverflow = 0x12,
    HardFault = 0x13,
    MemManage = 0x14,
    BusFault = 0x15,
    UsageFault = 0x16,
    DebugMon = 0x17,
    Nmi = 0x18,
    Wdt = 0x19,
    HwPin = 0x1A,
    HardWdt = 0x1B,
    Assert = 0x1C,
    HostCommand = 0x30,
    AppUnload = 0x40,
    Undefined = 0x50,
}

impl ResetReason {
    /// `true` for resets counted as crashes.
    #[must_use]
    pub fn is_crash(self) -> bool {
        !matches!(
            self,
            Self::HwPin | Self::Intended | Self::HostCommand | Self::Bootloader | Self::None
        )
    }

    /// Resets that can lead to safe mode.
    #[must_use]
    fn counts_toward_safe_mode(self) -> bool {
        !matches!(
            self,
            Self::HwPin | Self::Intended | Self::HostCommand | Self::None
        )
    }
}

/// State kept across resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetainedState {
    /// Reason for the last reset
    pub reset_reason: ResetReason,
    /// Resets since power-on
    pub reset_count: u32,
    /// Consecutive crash resets
    pub crash_count: u32,
}

impl RetainedState {
    /// State after a reset for `reason`.
    #[must_use]
    pub fn after_reset(self, reason: ResetReason) -> Self {
        Self {
            reset_reason: reason,
            ..self
        }
    }

    /// Update the counters at boot.
    ///
    /// Crashes increment the crash count, any other reason clears it. A
    /// return from the bootloader restarts the reset count at 1.
    pub fn on_boot(&mut self) {
        if self.reset_reason.is_crash() {
            self.crash_count = self.crash_count.saturating_add(1);
        } else {
            self.crash_count = 0;
        }
        self.reset_count = if self.reset_reason == ResetReason::Bootloader {
            1
        } else {
            self.reset_count.saturating_add(1)
        };
    }
}

/// What the boot sequence does with the retained counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecision {
    /// Start normally
    Normal,
    /// Start with the radar and profiles disabled
    SafeMode,
    /// Reset into the bootloader
    EnterBootloader,
}

/// Decide how to boot after repeated crashes.
#[must_use]
pub fn safe_mode_decision(state: &RetainedState) -> BootDecision {
    if !state.reset_reason.counts_toward_safe_mode() || state.crash_count < SAFE_MODE_CRASH_COUNT
    {
        return BootDecision::Normal;
    }
    if state.crash_count > BOOTLOADER_CRASH_COUNT && state.reset_reason != ResetReason::Bootloader
    {
        return BootDecision::EnterBootloader;
    }
    BootDecision::SafeMode
}

/// The running firmware's view of the system.
#[derive(Debug)]
pub struct SystemControl {
    retained: Mutex<RetainedState>,
    operation_mode: OperationMode,
    safe_mode: AtomicBool,
    boot: Instant,
    baudrate: AtomicU32,
    certification_mode: AtomicU8,
    certification_armed: AtomicBool,
    pending_reset: Mutex<Option<ResetReason>>,
    reset_signal: Notify,
}

impl SystemControl {
    /// Handle for a boot with the given retained state.
    #[must_use]
    pub fn new(retained: RetainedState, operation_mode: OperationMode, safe_mode: bool) -> Self {
        Self {
            retained: Mutex::new(retained),
            operation_mode,
            safe_mode: AtomicBool::new(safe_mode),
            boot: Instant::now(),
            baudrate: AtomicU32::new(115_200),
            certification_mode: AtomicU8::new(0),
            certification_armed: AtomicBool::new(operation_mode == OperationMode::Certification),
            pending_reset: Mutex::new(None),
            reset_signal: Notify::new(),
        }
    }

    /// Retained counters.
    #[must_use]
    pub fn retained(&self) -> RetainedState {
        *self.retained.lock()
    }

    /// Operating mode selected at boot.
    #[must_use]
    pub fn operation_mode(&self) -> OperationMode {
        self.operation_mode
    }

    /// `true` when booted into safe mode.
    #[must_use]
    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::Acquire)
    }

    /// Microseconds since boot.
    #[must_use]
    pub fn uptime_us(&self) -> u64 {
        u64::try_from(self.boot.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Forget earlier crashes once the firmware has stayed up.
    pub fn reset_crash_count(&self) {
        let mut retained = self.retained.lock();
        if retained.crash_count != 0 {
            info!(crash_count = retained.crash_count, "Crash count cleared");
            retained.crash_count = 0;
        }
    }

    /// Record a new link baudrate.
    pub fn set_baudrate(&self, baudrate: u32) {
        info!(baudrate, "Baudrate changed");
        self.baudrate.store(baudrate, Ordering::Relaxed);
    }

    /// Current link baudrate.
    #[must_use]
    pub fn baudrate(&self) -> u32 {
        self.baudrate.load(Ordering::Relaxed)
    }

    /// Certification sub-mode selector.
    #[must_use]
    pub fn certification_mode(&self) -> u8 {
        self.certification_mode.load(Ordering::Acquire)
    }

    /// Change the certification sub-mode selector.
    pub fn set_certification_mode(&self, mode: u8) {
        self.certification_mode.store(mode, Ordering::Release);
    }

    /// Select (`true`) or leave the certification operating mode from the
    /// next boot on.
    pub fn arm_certification(&self, armed: bool) {
        info!(armed, "Certification mode flag changed");
        self.certification_armed.store(armed, Ordering::Release);
    }

    /// `true` when the next boot enters the certification operating mode.
    #[must_use]
    pub fn certification_armed(&self) -> bool {
        self.certification_armed.load(Ordering::Acquire)
    }

    /// Ask the boot loop to reset. The first request wins.
    pub fn request_reset(&self, reason: ResetReason) {
        let mut pending = self.pending_reset.lock();
        if pending.is_none() {
            warn!(?reason, "Reset requested");
            *pending = Some(reason);
        }
        drop(pending);
        self.reset_signal.notify_one();
    }

    /// Pending reset request, if any.
    #[must_use]
    pub fn pending_reset(&self) -> Option<ResetReason> {
        *self.pending_reset.lock()
    }

    /// Wait for a reset request.
    pub async fn reset_requested(&self) -> ResetReason {
        loop {
            let notified = self.reset_signal.notified();
            if let Some(reason) = self.pending_reset() {
                return reason;
            }
            notified.await;
        }
    }
}

/// Level of the operating-mode pin sampled at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModePin {
    /// Asynchronous serial
    Uart,
    /// SPI slave
    Spi,
    /// Synchronous serial
    SyncSerial,
}

/// Board signals that pick the host link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSignals {
    /// USB VBUS detected
    pub vbus_present: bool,
    /// Booted in factory mode
    pub factory_mode: bool,
    /// I2C link configured in the board settings
    pub i2c_configured: bool,
    /// An I2C master answered
    pub i2c_present: bool,
    /// Operating-mode pin
    pub mode_pin: ModePin,
}

/// Primary host link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// USB CDC
    UsbCdc,
    /// I2C slave
    I2c,
    /// UART
    Uart,
    /// Synchronous serial
    SyncSerial,
    /// SPI slave
    Spi,
}

/// Choose the primary link.
///
/// USB wins when VBUS is present outside factory mode, then a configured and
/// present I2C master, then whatever the mode pin selects.
#[must_use]
pub fn select_link(signals: &BootSignals) -> LinkKind {
    if signals.vbus_present && !signals.factory_mode {
        return LinkKind::UsbCdc;
    }
    if signals.i2c_configured && signals.i2c_present {
        return LinkKind::I2c;
    }
    match signals.mode_pin {
        ModePin::Uart => LinkKind::Uart,
        ModePin::Spi => LinkKind::Spi,
        ModePin::SyncSerial => LinkKind::SyncSerial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn booted(reason: ResetReason, crash_count: u32) -> RetainedState {
        let mut state = RetainedState {
            reset_reason: reason,
            reset_count: 4,
            crash_count,
        };
        state.on_boot();
        state
    }

    #[test]
    fn test_crash_counting() {
        let state = booted(ResetReason::HardFault, 2);
        assert_eq!(state.crash_count, 3);
        assert_eq!(state.reset_count, 5);

        assert_eq!(booted(ResetReason::HostCommand, 7).crash_count, 0);
        assert_eq!(booted(ResetReason::Bootloader, 7).reset_count, 1);
    }

    #[test]
    fn test_safe_mode_thresholds() {
        let state = booted(ResetReason::SystemMonitor, 8);
        assert_eq!(safe_mode_decision(&state), BootDecision::Normal);

        let state = booted(ResetReason::SystemMonitor, 9);
        assert_eq!(state.crash_count, 10);
        assert_eq!(safe_mode_decision(&state), BootDecision::SafeMode);

        let state = booted(ResetReason::Wdt, 15);
        assert_eq!(safe_mode_decision(&state), BootDecision::EnterBootloader);
    }

    #[test]
    fn test_benign_reset_never_enters_safe_mode() {
        let state = RetainedState {
            reset_reason: ResetReason::HwPin,
            reset_count: 1,
            crash_count: 20,
        };
        assert_eq!(safe_mode_decision(&state), BootDecision::Normal);
    }

    #[test]
    fn test_link_selection() {
        let mut signals = BootSignals {
            vbus_present: true,
            factory_mode: false,
            i2c_configured: true,
            i2c_present: true,
            mode_pin: ModePin::Spi,
        };
        assert_eq!(select_link(&signals), LinkKind::UsbCdc);

        signals.factory_mode = true;
        assert_eq!(select_link(&signals), LinkKind::I2c);

        signals.i2c_present = false;
        assert_eq!(select_link(&signals), LinkKind::Spi);
    }

    #[tokio::test]
    async fn test_first_reset_request_wins() {
        let system = Arc::new(SystemControl::new(
            RetainedState::default(),
            OperationMode::Normal,
            false,
        ));
        let waiter = {
            let system = system.clone();
            tokio::spawn(async move { system.reset_requested().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        system.request_reset(ResetReason::HostCommand);
        system.request_reset(ResetReason::SystemMonitor);
        assert_eq!(waiter.await.unwrap(), ResetReason::HostCommand);
    }
}
