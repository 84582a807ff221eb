//! Host link task.
//!
//! Each link runs one `HostComTask`. Outbound, it drains its send topic into
//! the transport one frame at a time: the single send slot travels with the
//! frame and comes back when the transport drops it. Bulk payloads go out as
//! no-escape packets written in place inside their pool block; everything
//! else is escaped into the message-build buffer.
//!
//! When the slot stays taken past the send timeout the host is not reading.
//! The task then keeps flushing its queue until the slot returns, dropping
//! telemetry first and the oldest messages after that, so publishers never
//! block on a full queue.
//!
//! Inbound, received bytes are parsed and every complete packet is copied
//! into a dispatcher block and published on the link's receive topic.

use crate::config::HostComConfig;
use crate::tasks::monitor::MonitorHandle;
use crate::transport::{Link, OutboundFrame};
use bytes::Bytes;
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, trace, warn};
use xep_dispatch::{
    BasebandKind, BulkHeader, BulkView, Content, DispatchMessage, Dispatcher, MessageQueue,
    Topic,
};
use xep_pool::MemoryBlock;
use xep_proto::mcp::{self, DataType, RecordKind};
use xep_proto::nesc::{self, NoEscapeHeader, MAX_HEADER_LEN, PREFIX_LEN};
use xep_proto::{McpParser, McpResult, PacketBuilder, ParserEvent};

/// Monitor timeout of a host link task.
pub const HOSTCOM_MONITOR_TIMEOUT_MS: u32 = 3000;

const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Which link a task serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// The host link selected at boot
    Primary,
    /// The always-present debug link
    Debug,
}

impl LinkRole {
    /// Topic drained to the host.
    #[must_use]
    pub fn send_topic(self) -> Topic {
        match self {
            Self::Primary => Topic::HostComSend,
            Self::Debug => Topic::HostComSendDebug,
        }
    }

    /// Topic host packets are published on.
    #[must_use]
    pub fn rx_topic(self) -> Topic {
        match self {
            Self::Primary => Topic::HostComRx,
            Self::Debug => Topic::HostComRxDebug,
        }
    }

    /// Task name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Primary => "hostcom",
            Self::Debug => "dhostcom",
        }
    }
}

/// Messages removed by one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Telemetry messages dropped
    pub data_evicted: usize,
    /// Other messages dropped, oldest first
    pub control_evicted: usize,
}

impl FlushOutcome {
    /// Total messages dropped.
    #[must_use]
    pub fn total(&self) -> usize {
        self.data_evicted + self.control_evicted
    }
}

/// Restore at least `capacity / divisor` free entries in `queue`.
///
/// Nothing happens while more than that is free. Otherwise every
/// data-string, data-byte and data-float message goes first, keeping the
/// order of the rest; if that is not enough, the oldest messages follow.
pub fn flush_queue(
    queue: &mut VecDeque<DispatchMessage>,
    capacity: usize,
    divisor: usize,
) -> FlushOutcome {
    let floor = capacity / divisor.max(1);
    let free = |queue: &VecDeque<DispatchMessage>| capacity.saturating_sub(queue.len());
    let mut outcome = FlushOutcome::default();
    if free(queue) > floor {
        return outcome;
    }

    let before = queue.len();
    queue.retain(|message| !message.content_ref().is_some_and(|kind| kind.is_data()));
    outcome.data_evicted = before - queue.len();

    while free(queue) < floor && queue.pop_front().is_some() {
        outcome.control_evicted += 1;
    }
    outcome
}

/// Snapshot of a link's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostComStats {
    /// Frames handed to the transport
    pub frames_sent: u64,
    /// Bytes handed to the transport
    pub bytes_sent: u64,
    /// Frames sent straight out of their pool block
    pub zero_copy_frames: u64,
    /// Telemetry messages dropped by flushes
    pub data_evicted: u64,
    /// Other messages dropped by flushes
    pub control_evicted: u64,
    /// Packets received from the host
    pub packets_received: u64,
    /// Packets dropped for a bad checksum
    pub crc_errors: u64,
}

/// Live counters of one link.
#[derive(Debug, Default)]
pub struct HostComCounters {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    zero_copy_frames: AtomicU64,
    data_evicted: AtomicU64,
    control_evicted: AtomicU64,
    packets_received: AtomicU64,
    crc_errors: AtomicU64,
}

impl HostComCounters {
    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> HostComStats {
        HostComStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            zero_copy_frames: self.zero_copy_frames.load(Ordering::Relaxed),
            data_evicted: self.data_evicted.load(Ordering::Relaxed),
            control_evicted: self.control_evicted.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            crc_errors: self.crc_errors.load(Ordering::Relaxed),
        }
    }
}

enum Wire {
    Copied(Bytes),
    InPlace(MemoryBlock, Range<usize>),
}

/// No-escape header for a bulk payload.
#[must_use]
pub fn no_escape_header(view: &BulkView) -> NoEscapeHeader {
    let count = u32::try_from(view.data_len).unwrap_or(u32::MAX);
    match view.header {
        BulkHeader::DataByte { content_id, info } => NoEscapeHeader::DataByte {
            content_id,
            info,
            count,
        },
        BulkHeader::RadarFrame { frame_counter } => NoEscapeHeader::DataFloat {
            content_id: mcp::ID_RAW_FRAME_BUFFER,
            info: frame_counter,
            count: count / 4,
        },
        BulkHeader::Baseband {
            kind,
            frame_counter,
            num_bins,
            bin_length,
            sampling_frequency,
            carrier_frequency,
            range_offset,
        } => NoEscapeHeader::Baseband {
            iq: kind == BasebandKind::Iq,
            counter: frame_counter,
            num_bins,
            bin_length,
            sampling_frequency,
            carrier_frequency,
            range_offset,
        },
        BulkHeader::PulseDopplerFloat { noisemap, params } => NoEscapeHeader::PulseDoppler {
            noisemap,
            byte_step: None,
            ints: pd_ints(&params),
            floats: pd_floats(&params),
        },
        BulkHeader::PulseDopplerByte {
            noisemap,
            params,
            step_start,
            step_size,
        } => NoEscapeHeader::PulseDoppler {
            noisemap,
            byte_step: Some((step_start, step_size)),
            ints: pd_ints(&params),
            floats: pd_floats(&params),
        },
    }
}

fn pd_ints(p: &xep_dispatch::PulseDopplerParams) -> [u32; 6] {
    [
        p.frame_counter,
        p.matrix_counter,
        p.range_idx,
        p.range_bins,
        p.frequency_count,
        p.pd_instance,
    ]
}

fn pd_floats(p: &xep_dispatch::PulseDopplerParams) -> [f32; 5] {
    [
        p.fps,
        p.fps_decimated,
        p.frequency_start,
        p.frequency_step,
        p.range,
    ]
}

fn le_bytes<T, const N: usize>(values: &[T], to_le: impl Fn(&T) -> [u8; N]) -> Vec<u8> {
    values.iter().flat_map(to_le).collect()
}

/// Escaped encoding of a non-bulk message; `None` for kinds never sent.
pub fn encode_escaped(builder: &mut PacketBuilder, content: &Content) -> Option<Bytes> {
    Some(match content {
        Content::Ack => builder.ack(),
        Content::Error { code } => builder.error(*code),
        Content::Pong { value } => builder.pong(*value),
        Content::System { code } => builder.system(*code),
        Content::DataString {
            content_id,
            info,
            text,
        } => builder.record(
            RecordKind::Data,
            DataType::String,
            *content_id,
            *info,
            text.len(),
            text.as_bytes(),
        ),
        Content::DataFloat {
            content_id,
            info,
            data,
        } => builder.record(
            RecordKind::Data,
            DataType::Float,
            *content_id,
            *info,
            data.len(),
            &le_bytes(data, |v| v.to_le_bytes()),
        ),
        Content::ReplyInt {
            content_id,
            info,
            data,
        } => builder.record(
            RecordKind::Reply,
            DataType::Int,
            *content_id,
            *info,
            data.len(),
            &le_bytes(data, |v| v.to_le_bytes()),
        ),
        Content::ReplyByte {
            content_id,
            info,
            data,
        } => builder.record(
            RecordKind::Reply,
            DataType::Byte,
            *content_id,
            *info,
            data.len(),
            data,
        ),
        Content::ReplyString {
            content_id,
            info,
            text,
        } => builder.record(
            RecordKind::Reply,
            DataType::String,
            *content_id,
            *info,
            text.len(),
            text.as_bytes(),
        ),
        Content::ReplyFloat {
            content_id,
            info,
            data,
        } => builder.record(
            RecordKind::Reply,
            DataType::Float,
            *content_id,
            *info,
            data.len(),
            &le_bytes(data, |v| v.to_le_bytes()),
        ),
        Content::AppData { data, .. } => builder.appdata(data),
        Content::SimpleResult { .. } | Content::Bulk { .. } => return None,
    })
}

/// One host link.
pub struct HostComTask {
    role: LinkRole,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<MessageQueue>,
    link: Link,
    slot: Arc<Semaphore>,
    builder: PacketBuilder,
    parser: McpParser,
    config: HostComConfig,
    monitor: Option<MonitorHandle>,
    counters: Arc<HostComCounters>,
}

impl HostComTask {
    /// Register the link's queue on its send topic.
    pub fn new(
        role: LinkRole,
        dispatcher: Arc<Dispatcher>,
        link: Link,
        config: &HostComConfig,
        queue_capacity: usize,
        monitor: Option<MonitorHandle>,
    ) -> crate::error::XepResult<Self> {
        let queue = dispatcher.register(role.name(), queue_capacity);
        dispatcher.subscribe(role.send_topic(), &queue)?;
        Ok(Self {
            role,
            dispatcher,
            queue,
            link,
            slot: Arc::new(Semaphore::new(1)),
            builder: PacketBuilder::with_capacity(config.messagebuild_size),
            parser: McpParser::new(config.messagebuild_size),
            config: *config,
            monitor,
            counters: Arc::new(HostComCounters::default()),
        })
    }

    /// Handle on the link counters.
    #[must_use]
    pub fn counters(&self) -> Arc<HostComCounters> {
        self.counters.clone()
    }

    /// The outbound queue.
    #[must_use]
    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.clone()
    }

    /// Serve the link forever.
    pub async fn run(mut self) {
        let inbound = self.link.inbound.clone();
        let mut inbound = inbound.lock().await;
        let mut inbound_open = true;
        info!(link = self.link.transport.name(), role = ?self.role, "Host link started");

        loop {
            self.alive();
            let queue = self.queue.clone();
            tokio::select! {
                biased;
                message = queue.recv_timeout(IDLE_WAIT) => {
                    if let Some(message) = message {
                        self.on_outbound(message).await;
                    }
                }
                chunk = inbound.recv(), if inbound_open => match chunk {
                    Some(bytes) => self.on_inbound(&bytes),
                    None => {
                        debug!(role = ?self.role, "Inbound channel closed");
                        inbound_open = false;
                    }
                },
            }
        }
    }

    fn alive(&self) {
        if let Some(monitor) = &self.monitor {
            monitor.alive();
        }
    }

    async fn on_outbound(&mut self, message: DispatchMessage) {
        if message.topic != self.role.send_topic() {
            trace!(topic = ?message.topic, "Ignoring message on foreign topic");
            return;
        }
        let Some(slot) = self.acquire_slot().await else {
            return;
        };

        let wire = match self.encode(message) {
            Ok(Some(wire)) => wire,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Message not encodable");
                return;
            }
        };
        let frame = match wire {
            Wire::Copied(bytes) => OutboundFrame::copied(bytes, Some(slot)),
            Wire::InPlace(block, range) => {
                self.counters.zero_copy_frames.fetch_add(1, Ordering::Relaxed);
                OutboundFrame::zero_copy(block, range, Some(slot))
            }
        };

        let len = frame.len() as u64;
        match self.link.transport.submit(frame).await {
            Ok(()) => {
                self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                self.counters.bytes_sent.fetch_add(len, Ordering::Relaxed);
            }
            Err(e) => warn!(error = %e, "Transport rejected frame"),
        }
    }

    /// Wait for the send slot, flushing the queue while the host stalls.
    async fn acquire_slot(&mut self) -> Option<OwnedSemaphorePermit> {
        let send_timeout = Duration::from_millis(self.config.send_timeout_ms);
        if let Ok(permit) = tokio::time::timeout(send_timeout, self.slot.clone().acquire_owned()).await
        {
            return permit.ok();
        }

        debug!(role = ?self.role, "Send slot stalled, flushing queue");
        let lock_timeout = Duration::from_millis(self.config.lock_timeout_ms);
        loop {
            self.alive();
            if let Some(mut pending) = self.queue.lock_for(lock_timeout) {
                let outcome = flush_queue(
                    &mut pending,
                    self.queue.capacity(),
                    self.config.backpressure_divisor,
                );
                drop(pending);
                if outcome.total() > 0 {
                    self.counters
                        .data_evicted
                        .fetch_add(outcome.data_evicted as u64, Ordering::Relaxed);
                    self.counters
                        .control_evicted
                        .fetch_add(outcome.control_evicted as u64, Ordering::Relaxed);
                    warn!(
                        data_evicted = outcome.data_evicted,
                        control_evicted = outcome.control_evicted,
                        "Host not reading, queue flushed"
                    );
                }
            }
            match tokio::time::timeout(lock_timeout, self.slot.clone().acquire_owned()).await {
                Ok(permit) => return permit.ok(),
                Err(_) => continue,
            }
        }
    }

    fn encode(&mut self, message: DispatchMessage) -> McpResult<Option<Wire>> {
        if let Some(view) = message.bulk_view() {
            let header = no_escape_header(&view);
            return match message.block.try_unique() {
                Ok(mut block) => {
                    let range = nesc::inject(
                        block.as_mut_slice(),
                        view.data_offset,
                        view.data_len,
                        &header,
                    )?;
                    Ok(Some(Wire::InPlace(block, range)))
                }
                Err(shared) => {
                    let mut head = [0u8; MAX_HEADER_LEN];
                    let range = nesc::inject(&mut head, header.len(), 0, &header)?;
                    let data = &shared[view.data_offset..view.data_offset + view.data_len];
                    let bytes = self
                        .builder
                        .start()
                        .bytes(&head[range.start + PREFIX_LEN..range.end])
                        .bytes(data)
                        .finish();
                    Ok(Some(Wire::Copied(bytes)))
                }
            };
        }

        match message.decode() {
            Ok(content) => Ok(encode_escaped(&mut self.builder, &content).map(Wire::Copied)),
            Err(e) => {
                debug!(error = %e, "Undecodable outbound message dropped");
                Ok(None)
            }
        }
    }

    fn on_inbound(&mut self, bytes: &[u8]) {
        for event in self.parser.feed(bytes) {
            match event {
                ParserEvent::Packet(packet) => self.publish_packet(&packet),
                ParserEvent::CrcError => {
                    self.counters.crc_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(role = ?self.role, "Packet dropped, bad crc");
                    if let Err(e) = self
                        .dispatcher
                        .send_error(self.role.send_topic(), mcp::ERROR_CRC_FAILED)
                    {
                        debug!(error = %e, "Crc error reply not sent");
                    }
                }
                other => debug!(role = ?self.role, event = ?other, "Inbound bytes dropped"),
            }
        }
    }

    fn publish_packet(&mut self, packet: &[u8]) {
        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
        let mut block = match self.dispatcher.get_block(packet.len()) {
            Ok(block) => block,
            Err(e) => {
                warn!(len = packet.len(), error = %e, "No memory for host packet");
                return;
            }
        };
        block[..packet.len()].copy_from_slice(packet);
        if let Err(e) = self.dispatcher.send(
            self.role.rx_topic(),
            block,
            packet.len(),
            Some(self.queue.id()),
        ) {
            warn!(error = %e, "Host packet not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use xep_dispatch::DispatcherConfig;
    use xep_pool::MemoryPoolSet;

    fn dispatcher(pools: &[(usize, usize)]) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            MemoryPoolSet::with_pools(pools).unwrap(),
            DispatcherConfig::default(),
        ))
    }

    fn config() -> HostComConfig {
        HostComConfig {
            send_timeout_ms: 20,
            ..HostComConfig::default()
        }
    }

    fn fill(d: &Dispatcher, topic: Topic, kinds: &[bool]) {
        for (i, data) in kinds.iter().enumerate() {
            if *data {
                d.send_data_string(topic, 0, i as u32, "telemetry").unwrap();
            } else {
                d.send_pong(topic, i as u32).unwrap();
            }
        }
    }

    #[test]
    fn test_flush_keeps_control_while_data_remains() {
        let d = dispatcher(&[(100, 40)]);
        let q = d.register("out", 20);
        d.subscribe(Topic::HostComSend, &q).unwrap();
        // 12 data, 6 control: 2 free, floor 5
        let kinds: Vec<bool> = (0..18).map(|i| i % 3 != 0).collect();
        fill(&d, Topic::HostComSend, &kinds);

        let mut pending = q.lock_for(Duration::from_millis(10)).unwrap();
        let outcome = flush_queue(&mut pending, 20, 4);
        assert_eq!(outcome.data_evicted, 12);
        assert_eq!(outcome.control_evicted, 0);
        assert_eq!(pending.len(), 6);
        let values: Vec<u32> = pending
            .iter()
            .map(|m| match m.decode().unwrap() {
                Content::Pong { value } => value,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![0, 3, 6, 9, 12, 15]);
    }

    #[test]
    fn test_flush_evicts_oldest_when_data_is_not_enough() {
        let d = dispatcher(&[(100, 40)]);
        let q = d.register("out", 20);
        d.subscribe(Topic::HostComSend, &q).unwrap();
        let mut kinds = vec![false; 18];
        kinds[17] = true;
        fill(&d, Topic::HostComSend, &kinds);

        let mut pending = q.lock_for(Duration::from_millis(10)).unwrap();
        let outcome = flush_queue(&mut pending, 20, 4);
        assert_eq!(outcome.data_evicted, 1);
        assert_eq!(outcome.control_evicted, 2);
        assert_eq!(pending.len(), 15);
        assert_eq!(pending.front().unwrap().decode().unwrap(), Content::Pong { value: 2 });
    }

    #[test]
    fn test_flush_noop_above_floor() {
        let d = dispatcher(&[(100, 40)]);
        let q = d.register("out", 20);
        d.subscribe(Topic::HostComSend, &q).unwrap();
        fill(&d, Topic::HostComSend, &[true; 10]);

        let mut pending = q.lock_for(Duration::from_millis(10)).unwrap();
        assert_eq!(flush_queue(&mut pending, 20, 4), FlushOutcome::default());
        assert_eq!(pending.len(), 10);
    }

    #[test]
    fn test_escaped_encodings() {
        let mut builder = PacketBuilder::default();
        let bytes = encode_escaped(
            &mut builder,
            &Content::ReplyInt {
                content_id: 0x61,
                info: 0,
                data: vec![260],
            },
        )
        .unwrap();
        let mut expected = PacketBuilder::default();
        let want = expected
            .start()
            .byte(mcp::RESP_REPLY)
            .byte(DataType::Int as u8)
            .u32(0x61)
            .u32(0)
            .u32(1)
            .u32(260)
            .finish();
        assert_eq!(bytes, want);
        assert!(encode_escaped(&mut builder, &Content::SimpleResult { value: 1 }).is_none());
    }

    #[tokio::test]
    async fn test_radar_frame_goes_out_in_place() {
        let d = dispatcher(&[(100, 4), (7000, 1)]);
        let (loopback, link) = LoopbackTransport::new("loop");
        let task = HostComTask::new(LinkRole::Primary, d.clone(), link, &config(), 50, None).unwrap();
        let counters = task.counters();
        let handle = tokio::spawn(task.run());

        let samples = vec![0.25f32; 186];
        let block = d.get_block(Dispatcher::radar_frame_size(samples.len())).unwrap();
        d.send_radar_frame(Topic::HostComSend, block, 9, &samples, None).unwrap();

        assert!(loopback.wait_for_frames(1, Duration::from_secs(2)).await);
        let frame = &loopback.frames()[0];
        assert_eq!(&frame[..4], &nesc::NOESCAPE_FLAG.to_le_bytes());
        assert_eq!(frame[9], mcp::RESP_DATA);
        assert_eq!(frame[10], DataType::Float as u8);
        assert_eq!(&frame[15..19], &9u32.to_le_bytes());
        assert_eq!(&frame[19..23], &186u32.to_le_bytes());
        assert_eq!(frame.len(), 23 + 186 * 4);
        assert_eq!(loopback.zero_copy_frames(), 1);
        assert_eq!(counters.snapshot().zero_copy_frames, 1);
        assert_eq!(d.pools().stats()[1].free, 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_shared_bulk_falls_back_to_escaped() {
        let d = dispatcher(&[(100, 4), (7000, 1)]);
        let (loopback, link) = LoopbackTransport::new("loop");
        let task = HostComTask::new(LinkRole::Primary, d.clone(), link, &config(), 50, None).unwrap();
        let other = d.register("observer", 4);
        d.subscribe(Topic::HostComSend, &other).unwrap();
        let handle = tokio::spawn(task.run());

        let block = d.get_block(Dispatcher::radar_frame_size(2)).unwrap();
        d.send_radar_frame(Topic::HostComSend, block, 1, &[1.0, 2.0], None).unwrap();

        assert!(loopback.wait_for_frames(1, Duration::from_secs(2)).await);
        let frame = &loopback.frames()[0];
        assert_eq!(frame[0], mcp::START);
        assert_eq!(*frame.last().unwrap(), mcp::END);
        assert_eq!(loopback.zero_copy_frames(), 0);
        assert!(other.try_recv().is_some());

        handle.abort();
    }

    #[tokio::test]
    async fn test_stalled_host_triggers_flush() {
        let d = dispatcher(&[(100, 64)]);
        let (loopback, link) = LoopbackTransport::new("loop");
        loopback.set_stalled(true);
        let task = HostComTask::new(LinkRole::Primary, d.clone(), link, &config(), 8, None).unwrap();
        let counters = task.counters();
        let queue = task.queue();
        let handle = tokio::spawn(task.run());

        d.send_ack(Topic::HostComSend).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // First frame holds the slot; the next one waits for it
        d.send_ack(Topic::HostComSend).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        for i in 0..8 {
            let _ = d.send_data_string(Topic::HostComSend, 0, i, "x");
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        let stats = counters.snapshot();
        assert!(stats.data_evicted > 0);
        assert_eq!(stats.control_evicted, 0);
        assert!(queue.free_space() >= 2);

        loopback.set_stalled(false);
        assert!(loopback.wait_for_frames(2, Duration::from_secs(2)).await);
        handle.abort();
    }

    #[tokio::test]
    async fn test_inbound_packet_published() {
        let d = dispatcher(&[(100, 8)]);
        let rx = d.register("app", 4);
        d.subscribe(Topic::HostComRx, &rx).unwrap();
        let (loopback, link) = LoopbackTransport::new("loop");
        let task = HostComTask::new(LinkRole::Primary, d.clone(), link, &config(), 8, None).unwrap();
        let counters = task.counters();
        let handle = tokio::spawn(task.run());

        let mut builder = PacketBuilder::default();
        let ping = builder.start().byte(0x01).u32(0xeeaaeaae).finish();
        loopback.inject(&ping).await.unwrap();

        let message = rx.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(message.payload(), &[0x01, 0xae, 0xea, 0xaa, 0xee]);
        assert_eq!(counters.snapshot().packets_received, 1);

        let mut corrupt = ping.to_vec();
        corrupt[1] = 0x02;
        loopback.inject(&corrupt).await.unwrap();
        assert!(loopback.wait_for_frames(1, Duration::from_secs(2)).await);
        assert_eq!(counters.snapshot().crc_errors, 1);

        handle.abort();
    }
}
