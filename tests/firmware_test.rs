//! End-to-end tests: a booted firmware on the simulated chip, driven through
//! the loopback host link.

use std::sync::Arc;
use std::time::Duration;
use xep::boot::{Board, BootState, Firmware};
use xep::config::{PoolSpec, XepConfig};
use xep::system::ResetReason;
use xep::transport::{Link, LoopbackTransport};
use xep_hardware::{FramePattern, MockX4, TxPower, X4Driver};
use xep_proto::mcp::{
    PONG_READY, RESP_ACK, RESP_DATA, RESP_PONG, RESP_REPLY, RESP_SYSTEM, SYSTEM_BOOTING,
    SYSTEM_READY,
};
use xep_proto::{direct, McpParser, PacketBuilder, ParserEvent};
use xep_storage::{file_type, MemFlash};

const WAIT: Duration = Duration::from_secs(5);

/// Host side of the loopback link.
struct Host {
    transport: Arc<LoopbackTransport>,
    link: Link,
    parser: McpParser,
    seen: usize,
}

impl Host {
    fn new() -> Self {
        let (transport, link) = LoopbackTransport::new("host");
        Self {
            transport,
            link,
            parser: McpParser::new(16 * 1024),
            seen: 0,
        }
    }

    async fn send(&self, payload: &[u8]) {
        let packet = PacketBuilder::default().start().bytes(payload).finish();
        self.transport.inject(&packet).await.unwrap();
    }

    /// Wait for `count` more frames and return their payloads.
    async fn receive(&mut self, count: usize) -> Vec<Vec<u8>> {
        assert!(
            self.transport.wait_for_frames(self.seen + count, WAIT).await,
            "host received {} of {} frames",
            self.transport.frames().len() - self.seen,
            count
        );
        let frames = self.transport.frames();
        let mut packets = Vec::new();
        for frame in &frames[self.seen..] {
            for event in self.parser.feed(frame) {
                match event {
                    ParserEvent::Packet(payload) => packets.push(payload),
                    other => panic!("unexpected parser event {other:?}"),
                }
            }
        }
        self.seen = frames.len();
        packets
    }

    /// Skip frames until one starts with `kind`.
    async fn receive_kind(&mut self, kind: u8) -> Vec<u8> {
        for _ in 0..50 {
            if let Some(packet) = self.receive(1).await.into_iter().find(|p| p[0] == kind) {
                return packet;
            }
        }
        panic!("no packet of kind {kind:#x}");
    }
}

fn word(payload: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap())
}

fn board(host: &Host, chip: &MockX4, flash: &MemFlash) -> Board {
    Board {
        driver: Box::new(chip.clone()),
        flash: Some(Box::new(flash.clone())),
        primary: host.link.clone(),
        debug: None,
    }
}

fn flash() -> MemFlash {
    MemFlash::new(64 * 1024, 512, 4096)
}

async fn boot(config: &XepConfig, state: BootState, host: &mut Host, board: Board) -> Firmware {
    let firmware = Firmware::boot(config, state, board).unwrap();
    let status = host.receive(2).await;
    assert_eq!(status[0], [&[RESP_SYSTEM][..], &SYSTEM_BOOTING.to_le_bytes()].concat());
    assert_eq!(status[1], [&[RESP_SYSTEM][..], &SYSTEM_READY.to_le_bytes()].concat());
    firmware
}

/// Trigger one frame once the radar task has brought the chip up.
async fn trigger(chip: &MockX4) {
    for _ in 0..100 {
        if chip.trigger_frame() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("chip never came up");
}

#[tokio::test]
async fn test_boot_and_ping() {
    let config = XepConfig::default();
    let mut host = Host::new();
    let chip = MockX4::manual(1, FramePattern::Ramp);
    let hw = board(&host, &chip, &flash());
    let firmware = boot(
        &config,
        BootState::power_on(&config),
        &mut host,
        hw,
    )
    .await;

    host.send(&[0x01, 0x11, 0x22, 0x33, 0x44]).await;
    let pong = host.receive_kind(RESP_PONG).await;
    assert_eq!(word(&pong, 1), PONG_READY);

    let stats = firmware.hostcom_counters()[0].snapshot();
    assert_eq!(stats.packets_received, 1);
    let _ = firmware.shutdown(ResetReason::Intended);
}

#[tokio::test]
async fn test_radar_frames_reach_host_in_place() {
    let config = XepConfig::default();
    let mut host = Host::new();
    let chip = MockX4::manual(2, FramePattern::Ramp);
    let hw = board(&host, &chip, &flash());
    let firmware = boot(
        &config,
        BootState::power_on(&config),
        &mut host,
        hw,
    )
    .await;

    trigger(&chip).await;
    let frame = host.receive_kind(RESP_DATA).await;
    let count = word(&frame, 10) as usize;
    assert!(count > 0);
    assert_eq!(frame.len(), 14 + count * 4);
    assert_eq!(word(&frame, 6), chip.frame_counter());
    assert!(host.transport.zero_copy_frames() >= 1);

    // The pool block came back once the link was done with it
    tokio::time::sleep(Duration::from_millis(50)).await;
    for stats in firmware.dispatcher().pools().stats() {
        assert_eq!(stats.free, stats.block_count, "pool {}", stats.block_size);
    }
    let _ = firmware.shutdown(ResetReason::Intended);
}

#[tokio::test]
async fn test_zero_frames_shut_transmitter_off() {
    let mut config = XepConfig::default();
    config.radar.zero_frame_threshold = 3;
    let mut host = Host::new();
    let chip = MockX4::manual(3, FramePattern::Zeros);
    let hw = board(&host, &chip, &flash());
    let firmware = boot(
        &config,
        BootState::power_on(&config),
        &mut host,
        hw,
    )
    .await;

    for _ in 0..3 {
        trigger(&chip).await;
        host.receive_kind(RESP_DATA).await;
    }
    for _ in 0..100 {
        if firmware.radar().stats().zero_frame_shutdowns == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(firmware.radar().stats().zero_frame_shutdowns, 1);
    assert_eq!(chip.tx_power().unwrap(), TxPower::Off);
    assert_eq!(chip.fps(), 0.0);
    let _ = firmware.shutdown(ResetReason::Intended);
}

#[tokio::test]
async fn test_module_reset_reboots_on_same_link() {
    let config = XepConfig::default();
    let mut host = Host::new();
    let chip = MockX4::manual(4, FramePattern::Ramp);
    let store = flash();
    let hw = board(&host, &chip, &store);
    let firmware = boot(
        &config,
        BootState::power_on(&config),
        &mut host,
        hw,
    )
    .await;

    host.send(&[0x22]).await;
    host.receive_kind(RESP_ACK).await;
    let reason = tokio::time::timeout(WAIT, firmware.wait_reset())
        .await
        .unwrap();
    assert_eq!(reason, ResetReason::HostCommand);
    let state = firmware.shutdown(reason);

    let hw = board(&host, &chip, &store);
    let firmware = boot(&config, state, &mut host, hw).await;
    assert_eq!(firmware.system().retained().reset_count, 2);
    assert_eq!(
        firmware.system().retained().reset_reason,
        ResetReason::HostCommand
    );

    host.send(&[0x01, 0, 0, 0, 0]).await;
    host.receive_kind(RESP_PONG).await;
    let _ = firmware.shutdown(ResetReason::Intended);
}

fn direct_cmd(code: u8, words: &[u32], data: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x90, code];
    for w in words {
        payload.extend_from_slice(&w.to_le_bytes());
    }
    payload.extend_from_slice(data);
    payload
}

#[tokio::test]
async fn test_files_survive_reboot() {
    let config = XepConfig::default();
    let mut host = Host::new();
    let chip = MockX4::manual(5, FramePattern::Ramp);
    let store = flash();
    let t = file_type::USER_DEFINED | 1;

    let hw = board(&host, &chip, &store);
    let firmware = boot(
        &config,
        BootState::power_on(&config),
        &mut host,
        hw,
    )
    .await;
    host.send(&direct_cmd(direct::CREATE_NEW_FILE, &[t, 9, 6], &[]))
        .await;
    host.receive_kind(RESP_ACK).await;
    host.send(&direct_cmd(direct::SET_FILE_DATA, &[t, 9, 0, 6], b"radar!"))
        .await;
    host.receive_kind(RESP_ACK).await;
    host.send(&direct_cmd(direct::CLOSE_FILE, &[t, 9, 1], &[]))
        .await;
    host.receive_kind(RESP_ACK).await;
    let state = firmware.shutdown(ResetReason::Intended);

    let hw = board(&host, &chip, &store);
    let firmware = boot(&config, state, &mut host, hw).await;
    host.send(&direct_cmd(direct::GET_FILE_LENGTH, &[t, 9], &[]))
        .await;
    let reply = host.receive_kind(RESP_REPLY).await;
    assert_eq!(word(&reply, 10), 1);
    assert_eq!(word(&reply, 14), 6);

    host.send(&direct_cmd(direct::OPEN_FILE, &[t, 9], &[])).await;
    host.receive_kind(RESP_ACK).await;
    host.send(&direct_cmd(direct::GET_FILE_DATA, &[t, 9, 0, 6], &[]))
        .await;
    let reply = host.receive_kind(RESP_REPLY).await;
    assert_eq!(&reply[14..], b"radar!");
    let _ = firmware.shutdown(ResetReason::Intended);
}

#[tokio::test]
async fn test_stalled_host_flushes_and_recovers() {
    let mut config = XepConfig::default();
    config.pools = vec![
        PoolSpec {
            block_size: 100,
            block_count: 200,
        },
        PoolSpec {
            block_size: 7000,
            block_count: 2,
        },
    ];
    config.hostcom.send_timeout_ms = 100;
    let mut host = Host::new();
    let chip = MockX4::manual(6, FramePattern::Ramp);
    let hw = board(&host, &chip, &flash());
    let firmware = boot(
        &config,
        BootState::power_on(&config),
        &mut host,
        hw,
    )
    .await;

    host.transport.set_stalled(true);
    let mut burst = Vec::new();
    let mut builder = PacketBuilder::default();
    for i in 0..60u32 {
        burst.extend_from_slice(&builder.start().byte(0x01).u32(i).finish());
    }
    host.transport.inject(&burst).await.unwrap();

    let counters = firmware.hostcom_counters()[0].clone();
    for _ in 0..200 {
        if counters.snapshot().control_evicted > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let stats = counters.snapshot();
    assert!(stats.control_evicted > 0, "{stats:?}");
    assert_eq!(host.transport.held_frames(), 1);

    host.transport.set_stalled(false);
    host.send(&[0x01, 0xaa, 0xbb, 0xcc, 0xdd]).await;
    loop {
        let pong = host.receive_kind(RESP_PONG).await;
        if word(&pong, 1) == PONG_READY && host.transport.held_frames() == 0 {
            break;
        }
    }
    let _ = firmware.shutdown(ResetReason::Intended);
}
