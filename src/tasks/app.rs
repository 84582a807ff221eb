//! Host command routing.
//!
//! The application task owns the command surface of the module. Packets the
//! host links publish on their receive topics are decoded with
//! [`Request::parse`] and answered on the matching send topic, so a command
//! from the debug link is answered on the debug link. Every command gets
//! exactly one answer: an ack, a typed reply or an error code.
//!
//! Radar frames are forwarded unchanged to the primary link.

use crate::config::ApplicationConfig;
use crate::error::XepResult;
use crate::system::{ResetReason, SystemControl};
use crate::tasks::certification::enter_tx_only;
use crate::tasks::housekeeping::Housekeeping;
use crate::tasks::monitor::MonitorHandle;
use crate::tasks::radar::RadarControl;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use xep_dispatch::{Content, DispatchMessage, Dispatcher, MessageQueue, Topic};
use xep_hardware::TxPower;
use xep_proto::mcp::{
    ERROR_BUSY, ERROR_COMMAND_FAILED, ERROR_NOT_RECOGNIZED, ERROR_USER, PONG_READY,
    PONG_SAFE_MODE, SYSTEM_BOOTING, SYSTEM_READY,
};
use xep_proto::{direct, DirectCommand, Request, X4Parameter, X4Setting};
use xep_storage::FileSystem;

/// Monitor timeout of the application task.
pub const APP_MONITOR_TIMEOUT_MS: u32 = 5000;

/// Key that must accompany a bootloader request.
pub const BOOTLOADER_KEY: u32 = 0xa2b9_6ef1;

/// Time given to an ack to reach the host before a reset or baudrate change.
pub const DEFAULT_ACK_DELAY: Duration = Duration::from_millis(500);

const IDLE_WAIT: Duration = Duration::from_millis(500);

/// System test codes.
pub mod system_test {
    /// Chip IO connectivity
    pub const X4_CONNECTIVITY: u8 = 0x19;
    /// Boot into the certification operating mode from now on
    pub const CERTIFICATION_ENABLE: u8 = 0x1a;
    /// Boot into the configured operating mode from now on
    pub const CERTIFICATION_DISABLE: u8 = 0x1b;
    /// Continuous transmit at default power
    pub const TX_ONLY: u8 = 0x1d;
    /// Continuous transmit chain with power off
    pub const TX_ONLY_TX_OFF: u8 = 0x1e;
    /// Transmitter off, streaming continues
    pub const STREAM_TX_OFF: u8 = 0x1f;
}

/// System info codes.
pub mod info_code {
    /// Firmware id string
    pub const FIRMWARE_ID: u8 = 0x02;
    /// Version string
    pub const VERSION: u8 = 0x03;
    /// Build string
    pub const BUILD: u8 = 0x04;
}

/// Length of the data field of a self-test reply.
pub const SELFTEST_DATA_LENGTH: usize = 256;

const SELFTEST_CONTENT_ID: u32 = 0x90 | ((direct::SYSTEM_TEST as u32) << 8);

/// Strings reported by the system info command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    /// Firmware id
    pub firmware_id: String,
    /// Version
    pub version: String,
    /// Build
    pub build: String,
}

impl From<&ApplicationConfig> for SystemInfo {
    fn from(config: &ApplicationConfig) -> Self {
        Self {
            firmware_id: config.firmware_id.clone(),
            version: config.version.clone(),
            build: config.build.clone(),
        }
    }
}

/// Work done after an ack has had time to reach the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    Reset(ResetReason),
    Baudrate(u32),
    TxOnly(TxPower),
}

enum Outcome {
    Reply(Content),
    AckThen(Deferred),
}

impl Outcome {
    fn ack() -> Self {
        Self::Reply(Content::Ack)
    }

    fn error(code: u32) -> Self {
        Self::Reply(Content::Error { code })
    }
}

/// Snapshot of the application counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppStats {
    /// Commands answered
    pub commands: u64,
    /// Commands answered with an error
    pub command_errors: u64,
    /// Radar frames forwarded to the host
    pub frames_forwarded: u64,
    /// Radar frames the host link refused
    pub frames_refused: u64,
}

#[derive(Debug, Default)]
struct AppCounters {
    commands: AtomicU64,
    command_errors: AtomicU64,
    frames_forwarded: AtomicU64,
    frames_refused: AtomicU64,
}

/// The application task.
pub struct AppTask {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<MessageQueue>,
    control: RadarControl,
    housekeeping: Arc<Housekeeping>,
    files: Arc<FileSystem>,
    system: Arc<SystemControl>,
    info: SystemInfo,
    monitor: Option<MonitorHandle>,
    ack_delay: Duration,
    counters: AppCounters,
}

impl AppTask {
    /// Register the application queue on both receive topics and on radar data.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        queue_capacity: usize,
        control: RadarControl,
        housekeeping: Arc<Housekeeping>,
        files: Arc<FileSystem>,
        system: Arc<SystemControl>,
        info: SystemInfo,
        monitor: Option<MonitorHandle>,
    ) -> XepResult<Self> {
        let queue = dispatcher.register("app", queue_capacity);
        for topic in [Topic::HostComRx, Topic::HostComRxDebug, Topic::RadarData] {
            dispatcher.subscribe(topic, &queue)?;
        }
        Ok(Self {
            dispatcher,
            queue,
            control,
            housekeeping,
            files,
            system,
            info,
            monitor,
            ack_delay: DEFAULT_ACK_DELAY,
            counters: AppCounters::default(),
        })
    }

    /// Override the pause between an ack and the action it announces.
    #[must_use]
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    /// The application queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> AppStats {
        let c = &self.counters;
        AppStats {
            commands: c.commands.load(Ordering::Relaxed),
            command_errors: c.command_errors.load(Ordering::Relaxed),
            frames_forwarded: c.frames_forwarded.load(Ordering::Relaxed),
            frames_refused: c.frames_refused.load(Ordering::Relaxed),
        }
    }

    /// Announce the boot to the host and serve commands forever.
    pub async fn run(self) {
        for code in [SYSTEM_BOOTING, SYSTEM_READY] {
            if let Err(e) = self.dispatcher.send_system(Topic::HostComSend, code) {
                debug!(code, error = %e, "System status not sent");
            }
        }
        info!(safe_mode = self.system.is_safe_mode(), "Application ready");

        loop {
            if let Some(monitor) = &self.monitor {
                monitor.alive();
            }
            if let Some(message) = self.queue.recv_timeout(IDLE_WAIT).await {
                self.handle(message).await;
            }
        }
    }

    /// Process one message from the application queue.
    pub async fn handle(&self, message: DispatchMessage) {
        match message.topic {
            Topic::RadarData => self.forward_frame(message),
            Topic::HostComRx | Topic::HostComRxDebug => self.on_command(&message).await,
            other => trace!(topic = ?other, "Ignoring message"),
        }
    }

    fn forward_frame(&self, message: DispatchMessage) {
        match self.dispatcher.forward(Topic::HostComSend, message) {
            Ok(_) => {
                self.counters.frames_forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.frames_refused.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "Radar frame not forwarded");
            }
        }
    }

    async fn on_command(&self, message: &DispatchMessage) {
        let route = message.topic.reply_route();
        self.counters.commands.fetch_add(1, Ordering::Relaxed);

        let outcome = match Request::parse(message.payload()) {
            Ok(request) => {
                trace!(?request, "Host command");
                self.execute(route, request).unwrap_or_else(|e| {
                    debug!(error = %e, "Command failed");
                    Outcome::error(e.code())
                })
            }
            Err(e) => {
                debug!(error = %e, "Malformed command");
                Outcome::error(ERROR_NOT_RECOGNIZED)
            }
        };

        match outcome {
            Outcome::Reply(content) => self.respond(route, &content),
            Outcome::AckThen(deferred) => {
                self.respond(route, &Content::Ack);
                tokio::time::sleep(self.ack_delay).await;
                self.run_deferred(deferred);
            }
        }
    }

    fn respond(&self, route: Topic, content: &Content) {
        if matches!(content, Content::Error { .. }) {
            self.counters.command_errors.fetch_add(1, Ordering::Relaxed);
        }
        if let Err(e) = self.dispatcher.publish(route, content, None) {
            warn!(topic = ?route, error = %e, "Reply not sent");
            if !matches!(content, Content::Error { .. }) {
                let _ = self.dispatcher.send_error(route, e.code());
            }
        }
    }

    fn run_deferred(&self, deferred: Deferred) {
        match deferred {
            Deferred::Reset(reason) => self.system.request_reset(reason),
            Deferred::Baudrate(baudrate) => self.system.set_baudrate(baudrate),
            Deferred::TxOnly(power) => {
                info!(?power, "Entering transmit-only test");
                if let Err(e) = self.control.with_driver(|d| enter_tx_only(d, power)) {
                    warn!(error = %e, "Transmit-only setup failed");
                }
            }
        }
    }

    fn execute(&self, route: Topic, request: Request) -> XepResult<Outcome> {
        Ok(match request {
            Request::Ping { .. } => Outcome::Reply(Content::Pong {
                value: if self.system.is_safe_mode() {
                    PONG_SAFE_MODE
                } else {
                    PONG_READY
                },
            }),
            Request::StartBootloader { key } if key == BOOTLOADER_KEY => {
                Outcome::AckThen(Deferred::Reset(ResetReason::Bootloader))
            }
            Request::StartBootloader { .. } => {
                let _ = self.dispatcher.send_data_string(
                    route,
                    0,
                    0,
                    "Unknown start_bootloader key.",
                );
                Outcome::error(ERROR_NOT_RECOGNIZED)
            }
            Request::ModuleReset => Outcome::AckThen(Deferred::Reset(ResetReason::HostCommand)),
            Request::Direct(command) => self.direct(command)?,
            Request::X4Init => {
                self.control.x4_init()?;
                Outcome::ack()
            }
            Request::X4Set(setting) => {
                self.x4_set(setting)?;
                Outcome::ack()
            }
            Request::X4Get(parameter) => Outcome::Reply(self.x4_get(parameter)?),
            Request::Unknown { command } => {
                debug!(command, "Unknown command");
                Outcome::error(ERROR_NOT_RECOGNIZED)
            }
        })
    }

    fn direct(&self, command: DirectCommand) -> XepResult<Outcome> {
        use DirectCommand::*;
        Ok(match command {
            SetBaudrate { baudrate } => Outcome::AckThen(Deferred::Baudrate(baudrate)),
            SystemTest { code } => self.system_test(code)?,
            GetSystemInfo { code } => {
                let text = match code {
                    info_code::FIRMWARE_ID => &self.info.firmware_id,
                    info_code::VERSION => &self.info.version,
                    info_code::BUILD => &self.info.build,
                    _ => return Ok(Outcome::error(ERROR_NOT_RECOGNIZED)),
                };
                Outcome::Reply(Content::ReplyString {
                    content_id: 0,
                    info: u32::from(code),
                    text: text.clone(),
                })
            }
            GetCrashDumpLength => Outcome::Reply(Content::ReplyInt {
                content_id: u32::from(direct::GET_CRASH_DUMP_LENGTH),
                info: 0,
                data: vec![self.housekeeping.crash_dump_len()],
            }),
            GetCrashDump { offset, length } => {
                let Ok(dump) = self.housekeeping.read_crash_dump() else {
                    return Ok(Outcome::error(ERROR_NOT_RECOGNIZED));
                };
                match slice(&dump, offset, length) {
                    Some(data) => Outcome::Reply(Content::ReplyByte {
                        content_id: u32::from(direct::GET_CRASH_DUMP),
                        info: 0,
                        data: data.to_vec(),
                    }),
                    None => Outcome::error(ERROR_USER),
                }
            }
            ClearCrashDump => match self.housekeeping.clear_crash_dump() {
                Ok(()) => Outcome::ack(),
                Err(e) => {
                    debug!(error = %e, "Crash dump not cleared");
                    Outcome::error(ERROR_BUSY)
                }
            },
            SearchFileType { file_type } => int_reply(self.files.search_for_files_of_type(file_type)?),
            FindAllFiles => {
                let (types, identifiers): (Vec<u32>, Vec<u32>) =
                    self.files.find_all_files()?.into_iter().unzip();
                int_reply(types.into_iter().chain(identifiers).collect())
            }
            CreateNewFile {
                file_type,
                identifier,
                length,
            } => {
                self.files
                    .create_and_open_empty(file_type, identifier, length)?;
                Outcome::ack()
            }
            SetFileData {
                file_type,
                identifier,
                offset,
                data,
            } => {
                let handle = self.files.get_handle(file_type, identifier)?;
                let size = self.files.handle_size(handle)?;
                let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
                if offset.checked_add(len).map_or(true, |end| end > size) {
                    return Ok(Outcome::error(ERROR_COMMAND_FAILED));
                }
                self.files.write(handle, &data, offset)?;
                Outcome::ack()
            }
            CloseFile {
                file_type,
                identifier,
                commit,
            } => {
                let handle = self.files.get_handle(file_type, identifier)?;
                self.files.close(handle, commit)?;
                Outcome::ack()
            }
            GetFileLength {
                file_type,
                identifier,
            } => int_reply(vec![self.files.size(file_type, identifier)?]),
            DeleteFile {
                file_type,
                identifier,
            } => {
                self.files.delete(file_type, identifier)?;
                Outcome::ack()
            }
            GetFileData {
                file_type,
                identifier,
                offset,
                length,
            } => {
                let handle = self.files.get_handle(file_type, identifier)?;
                let contents = self.files.read_buffer(handle)?;
                match slice(&contents, offset, length) {
                    Some(data) => Outcome::Reply(Content::ReplyByte {
                        content_id: 0,
                        info: 0,
                        data: data.to_vec(),
                    }),
                    None => Outcome::error(ERROR_COMMAND_FAILED),
                }
            }
            OpenFile {
                file_type,
                identifier,
            } => {
                self.files.open(file_type, identifier)?;
                Outcome::ack()
            }
            FormatFilesystem { key } => {
                self.files.format(key)?;
                info!("File system formatted by host");
                Outcome::ack()
            }
        })
    }

    fn system_test(&self, code: u8) -> XepResult<Outcome> {
        let default_power = self.control.defaults().tx_power;
        Ok(match code {
            system_test::TX_ONLY => Outcome::AckThen(Deferred::TxOnly(default_power)),
            system_test::TX_ONLY_TX_OFF => Outcome::AckThen(Deferred::TxOnly(TxPower::Off)),
            system_test::STREAM_TX_OFF => {
                self.control.with_driver(|d| d.set_tx_power(TxPower::Off))?;
                Outcome::ack()
            }
            system_test::X4_CONNECTIVITY => {
                let passed = self
                    .control
                    .with_driver(|d| d.test_io_connectivity())
                    .is_ok();
                selftest_reply(code, passed)
            }
            system_test::CERTIFICATION_ENABLE | system_test::CERTIFICATION_DISABLE => {
                self.system
                    .arm_certification(code == system_test::CERTIFICATION_ENABLE);
                selftest_reply(code, true)
            }
            _ => Outcome::error(ERROR_NOT_RECOGNIZED),
        })
    }

    fn x4_set(&self, setting: X4Setting) -> XepResult<()> {
        use X4Setting as S;
        if let S::Fps(fps) = setting {
            return Ok(self.control.set_fps(fps)?);
        }
        Ok(self.control.with_driver(|d| match setting {
            S::Fps(_) => Ok(()),
            S::PulsesPerStep(v) => d.set_pulses_per_step(v),
            S::Iterations(v) => d.set_iterations(v),
            S::Downconversion(v) => d.set_downconversion(v),
            S::FrameArea { start, end } => d.set_frame_area(start, end),
            S::DacStep(v) => d.set_dac_step(v),
            S::DacMin(v) => d.set_dac_min(v),
            S::DacMax(v) => d.set_dac_max(v),
            S::FrameAreaOffset(v) => d.set_frame_area_offset(v),
            S::Enable(v) => d.set_enable(v),
            S::TxCenterFrequency(v) => d.set_tx_center_frequency(v.try_into()?),
            S::TxPower(v) => d.set_tx_power(v.try_into()?),
            S::SpiRegister { address, value } => d.set_spi_register(address, value),
            S::PifRegister { address, value } => d.set_pif_register(address, value),
            S::XifRegister { address, value } => d.set_xif_register(address, value),
            S::PrfDiv(v) => d.set_prf_div(v),
        })?)
    }

    fn x4_get(&self, parameter: X4Parameter) -> XepResult<Content> {
        use X4Parameter as P;
        let content_id = parameter.id();
        let int = |value: u32| Content::ReplyInt {
            content_id,
            info: 0,
            data: vec![value],
        };
        let byte = |value: u8| Content::ReplyByte {
            content_id,
            info: 0,
            data: vec![value],
        };
        let float = |data: Vec<f32>| Content::ReplyFloat {
            content_id,
            info: 0,
            data,
        };

        Ok(self.control.with_driver(|d| {
            Ok(match parameter {
                P::Fps => float(vec![d.fps()]),
                P::PulsesPerStep => int(d.pulses_per_step()?),
                P::Iterations => int(d.iterations()?),
                P::Downconversion => byte(d.downconversion()?),
                P::FrameArea => {
                    let area = d.frame_area()?;
                    float(vec![area.start, area.end])
                }
                P::DacStep => byte(u8::try_from(d.dac_step()?).unwrap_or(u8::MAX)),
                P::DacMin => int(d.dac_min()?),
                P::DacMax => int(d.dac_max()?),
                P::FrameAreaOffset => float(vec![d.frame_area_offset()?]),
                P::TxCenterFrequency => byte(d.tx_center_frequency()? as u8),
                P::TxPower => byte(d.tx_power()? as u8),
                P::SpiRegister { address } => byte(d.spi_register(address)?),
                P::PifRegister { address } => byte(d.pif_register(address)?),
                P::XifRegister { address } => byte(d.xif_register(address)?),
                P::PrfDiv => byte(d.prf_div()?),
                P::FrameBinCount => int(d.frame_bin_count()?),
            })
        })?)
    }
}

fn int_reply(data: Vec<u32>) -> Outcome {
    Outcome::Reply(Content::ReplyInt {
        content_id: 0,
        info: 0,
        data,
    })
}

fn selftest_reply(code: u8, passed: bool) -> Outcome {
    Outcome::Reply(Content::ReplyByte {
        content_id: SELFTEST_CONTENT_ID,
        info: u32::from(code) | (u32::from(passed) << 8),
        data: vec![0; SELFTEST_DATA_LENGTH],
    })
}

/// `data[offset..offset + length]`, or `None` if that runs past the end.
fn slice(data: &[u8], offset: u32, length: u32) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(length).ok()?)?;
    data.get(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OperationMode, RadarConfig};
    use crate::system::RetainedState;
    use crate::tasks::monitor::Monitor;
    use xep_dispatch::{DispatcherConfig, TaskNotifier};
    use xep_hardware::{FramePattern, MockX4};
    use xep_pool::MemoryPoolSet;
    use xep_proto::x4id;
    use xep_storage::{file_type, FileStore, MemFlash};

    struct Rig {
        app: AppTask,
        dispatcher: Arc<Dispatcher>,
        host: Arc<MessageQueue>,
        system: Arc<SystemControl>,
        housekeeping: Arc<Housekeeping>,
        mock: MockX4,
    }

    fn rig(safe_mode: bool) -> Rig {
        let pools = MemoryPoolSet::with_pools(&[(100, 32), (7000, 4)]).unwrap();
        let dispatcher = Arc::new(Dispatcher::new(pools, DispatcherConfig::default()));
        let host = dispatcher.register("host", 32);
        dispatcher.subscribe(Topic::HostComSend, &host).unwrap();

        let mock = MockX4::manual(3, FramePattern::Ramp);
        let control = RadarControl::new(
            Box::new(mock.clone()),
            Arc::new(TaskNotifier::new()),
            &RadarConfig::default(),
        )
        .unwrap();
        control.startup(OperationMode::Normal).unwrap();

        let flash = MemFlash::new(64 * 1024, 512, 4096);
        let files = Arc::new(FileSystem::new(FileStore::init(Box::new(flash)).unwrap()));
        let system = Arc::new(SystemControl::new(
            RetainedState::default(),
            OperationMode::Normal,
            safe_mode,
        ));
        let housekeeping = Arc::new(Housekeeping::new(
            files.clone(),
            dispatcher.clone(),
            Arc::new(Monitor::new(Duration::from_millis(100))),
            system.clone(),
            "XEP test".to_string(),
        ));
        let app = AppTask::new(
            dispatcher.clone(),
            200,
            control,
            housekeeping.clone(),
            files,
            system.clone(),
            SystemInfo::from(&ApplicationConfig::default()),
            None,
        )
        .unwrap()
        .with_ack_delay(Duration::ZERO);

        Rig {
            app,
            dispatcher,
            host,
            system,
            housekeeping,
            mock,
        }
    }

    impl Rig {
        async fn command(&self, payload: &[u8]) -> Vec<Content> {
            let mut block = self.dispatcher.get_block(payload.len()).unwrap();
            block[..payload.len()].copy_from_slice(payload);
            self.dispatcher
                .send(Topic::HostComRx, block, payload.len(), None)
                .unwrap();
            let message = self.app.queue().try_recv().unwrap();
            self.app.handle(message).await;

            let mut replies = Vec::new();
            while let Some(reply) = self.host.try_recv() {
                replies.push(reply.decode().unwrap());
            }
            replies
        }
    }

    fn x4_set(id: u32, value: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x50, 0x10];
        payload.extend_from_slice(&id.to_le_bytes());
        payload.extend_from_slice(value);
        payload
    }

    fn x4_get(id: u32) -> Vec<u8> {
        let mut payload = vec![0x50, 0x11];
        payload.extend_from_slice(&id.to_le_bytes());
        payload
    }

    fn direct_cmd(code: u8, words: &[u32]) -> Vec<u8> {
        let mut payload = vec![0x90, code];
        for w in words {
            payload.extend_from_slice(&w.to_le_bytes());
        }
        payload
    }

    #[tokio::test]
    async fn test_ping_and_unknown() {
        let rig = rig(false);
        let replies = rig.command(&[0x01, 0xee, 0xaa, 0xea, 0xae]).await;
        assert_eq!(replies, vec![Content::Pong { value: PONG_READY }]);

        let replies = rig.command(&[0xee]).await;
        assert_eq!(
            replies,
            vec![Content::Error {
                code: ERROR_NOT_RECOGNIZED
            }]
        );
        assert_eq!(rig.app.stats().command_errors, 1);

        let safe = rig_safe_pong().await;
        assert_eq!(safe, vec![Content::Pong { value: PONG_SAFE_MODE }]);
    }

    async fn rig_safe_pong() -> Vec<Content> {
        rig(true).command(&[0x01, 0, 0, 0, 0]).await
    }

    #[tokio::test]
    async fn test_x4_set_and_get() {
        let rig = rig(false);
        assert_eq!(
            rig.command(&x4_set(x4id::FPS, &10.0f32.to_le_bytes())).await,
            vec![Content::Ack]
        );
        assert_eq!(
            rig.command(&x4_get(x4id::FPS)).await,
            vec![Content::ReplyFloat {
                content_id: x4id::FPS,
                info: 0,
                data: vec![10.0]
            }]
        );

        assert_eq!(
            rig.command(&x4_get(x4id::TX_POWER)).await,
            vec![Content::ReplyByte {
                content_id: x4id::TX_POWER,
                info: 0,
                data: vec![2]
            }]
        );

        // Invalid power level carries the driver status code
        let replies = rig.command(&x4_set(x4id::TX_POWER, &[9])).await;
        assert_eq!(replies, vec![Content::Error { code: 21 }]);
    }

    #[tokio::test]
    async fn test_system_info() {
        let rig = rig(false);
        let replies = rig.command(&[0x90, 0x58, info_code::VERSION]).await;
        assert_eq!(
            replies,
            vec![Content::ReplyString {
                content_id: 0,
                info: 3,
                text: env!("CARGO_PKG_VERSION").to_string()
            }]
        );
        let replies = rig.command(&[0x90, 0x58, 0x77]).await;
        assert_eq!(
            replies,
            vec![Content::Error {
                code: ERROR_NOT_RECOGNIZED
            }]
        );
    }

    #[tokio::test]
    async fn test_file_commands() {
        let rig = rig(false);
        let t = file_type::USER_DEFINED;

        assert_eq!(
            rig.command(&direct_cmd(direct::CREATE_NEW_FILE, &[t, 5, 8])).await,
            vec![Content::Ack]
        );

        let mut set = direct_cmd(direct::SET_FILE_DATA, &[t, 5, 0, 8]);
        set.extend_from_slice(b"abcdefgh");
        assert_eq!(rig.command(&set).await, vec![Content::Ack]);

        let mut overflow = direct_cmd(direct::SET_FILE_DATA, &[t, 5, 4, 8]);
        overflow.extend_from_slice(b"abcdefgh");
        assert_eq!(
            rig.command(&overflow).await,
            vec![Content::Error {
                code: ERROR_COMMAND_FAILED
            }]
        );

        assert_eq!(
            rig.command(&direct_cmd(direct::GET_FILE_DATA, &[t, 5, 2, 3])).await,
            vec![Content::ReplyByte {
                content_id: 0,
                info: 0,
                data: b"cde".to_vec()
            }]
        );
        assert_eq!(
            rig.command(&direct_cmd(direct::CLOSE_FILE, &[t, 5, 1])).await,
            vec![Content::Ack]
        );
        assert_eq!(
            rig.command(&direct_cmd(direct::GET_FILE_LENGTH, &[t, 5])).await,
            vec![Content::ReplyInt {
                content_id: 0,
                info: 0,
                data: vec![8]
            }]
        );
        assert_eq!(
            rig.command(&direct_cmd(direct::FIND_ALL_FILES, &[])).await,
            vec![Content::ReplyInt {
                content_id: 0,
                info: 0,
                data: vec![t, 5]
            }]
        );
        assert_eq!(
            rig.command(&direct_cmd(direct::DELETE_FILE, &[t, 5])).await,
            vec![Content::Ack]
        );

        // Not open any more: the file layer's code goes back to the host
        let replies = rig.command(&direct_cmd(direct::CLOSE_FILE, &[t, 5, 1])).await;
        assert!(matches!(replies[..], [Content::Error { code }] if code != 0));
    }

    #[tokio::test]
    async fn test_crash_dump_commands() {
        let rig = rig(false);
        assert_eq!(
            rig.command(&direct_cmd(direct::GET_CRASH_DUMP_LENGTH, &[])).await,
            vec![Content::ReplyInt {
                content_id: 0x61,
                info: 0,
                data: vec![0]
            }]
        );
        assert_eq!(
            rig.command(&direct_cmd(direct::GET_CRASH_DUMP, &[0, 4])).await,
            vec![Content::Error {
                code: ERROR_NOT_RECOGNIZED
            }]
        );

        let size = rig
            .housekeeping
            .trigger_crash_dump(ResetReason::Assert, "assert", false)
            .unwrap() as u32;
        assert_eq!(
            rig.command(&direct_cmd(direct::GET_CRASH_DUMP, &[0, 2])).await,
            vec![Content::ReplyByte {
                content_id: 0x63,
                info: 0,
                data: vec![0x10, 0x02]
            }]
        );
        assert_eq!(
            rig.command(&direct_cmd(direct::GET_CRASH_DUMP, &[size - 1, 2])).await,
            vec![Content::Error { code: ERROR_USER }]
        );
        assert_eq!(
            rig.command(&direct_cmd(direct::CLEAR_CRASH_DUMP, &[])).await,
            vec![Content::Ack]
        );
        assert_eq!(rig.housekeeping.crash_dump_len(), 0);
    }

    #[tokio::test]
    async fn test_reset_is_acked_first() {
        let rig = rig(false);
        assert_eq!(rig.command(&[0x22]).await, vec![Content::Ack]);
        assert_eq!(rig.system.pending_reset(), Some(ResetReason::HostCommand));
    }

    #[tokio::test]
    async fn test_bootloader_key() {
        let rig = rig(false);
        let replies = rig.command(&[0x02, 0, 0, 0, 0]).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(
            replies[1],
            Content::Error {
                code: ERROR_NOT_RECOGNIZED
            }
        );
        assert_eq!(rig.system.pending_reset(), None);

        let mut payload = vec![0x02];
        payload.extend_from_slice(&BOOTLOADER_KEY.to_le_bytes());
        assert_eq!(rig.command(&payload).await, vec![Content::Ack]);
        assert_eq!(rig.system.pending_reset(), Some(ResetReason::Bootloader));
    }

    #[tokio::test]
    async fn test_certification_system_tests() {
        let rig = rig(false);
        let replies = rig
            .command(&[0x90, direct::SYSTEM_TEST, system_test::CERTIFICATION_ENABLE])
            .await;
        assert!(matches!(
            &replies[..],
            [Content::ReplyByte { content_id, info, .. }]
                if *content_id == SELFTEST_CONTENT_ID && *info == 0x11a
        ));
        assert!(rig.system.certification_armed());

        let replies = rig
            .command(&[0x90, direct::SYSTEM_TEST, system_test::TX_ONLY_TX_OFF])
            .await;
        assert_eq!(replies, vec![Content::Ack]);
        assert!(rig.mock.is_sleeping());

        let replies = rig.command(&[0x90, direct::SYSTEM_TEST, 0x42]).await;
        assert_eq!(
            replies,
            vec![Content::Error {
                code: ERROR_NOT_RECOGNIZED
            }]
        );
    }

    #[tokio::test]
    async fn test_radar_frames_forwarded() {
        let rig = rig(false);
        let block = rig
            .dispatcher
            .get_block(Dispatcher::radar_frame_size(4))
            .unwrap();
        let id = rig
            .dispatcher
            .send_radar_frame(Topic::RadarData, block, 7, &[0.5; 4], None)
            .unwrap();

        let message = rig.app.queue().try_recv().unwrap();
        rig.app.handle(message).await;
        let forwarded = rig.host.try_recv().unwrap();
        assert_eq!(forwarded.id, id);
        assert_eq!(forwarded.topic, Topic::HostComSend);
        assert_eq!(rig.app.stats().frames_forwarded, 1);
    }
}
