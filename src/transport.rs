//! Host link transports.
//!
//! A [`Transport`] accepts one [`OutboundFrame`] at a time from a host link
//! task. Completion is the frame being dropped: that returns the link's send
//! slot and, for zero-copy frames, the pool block the bytes live in.
//!
//! Bytes from the host arrive on an [`Inbound`] channel that outlives a
//! firmware reboot, so the same connection keeps working after an in-process
//! reset.

use crate::error::{XepError, XepResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit};
use tracing::{debug, info, warn};
use xep_pool::MemoryBlock;

/// Receive side of a link, shared across reboots.
pub type Inbound = Arc<tokio::sync::Mutex<mpsc::Receiver<Bytes>>>;

const INBOUND_DEPTH: usize = 32;
const OUTBOUND_DEPTH: usize = 4;
const READ_CHUNK: usize = 4096;

/// One encoded packet on its way to the host.
#[derive(Debug)]
pub struct OutboundFrame {
    bytes: Bytes,
    zero_copy: bool,
    _slot: Option<OwnedSemaphorePermit>,
}

impl OutboundFrame {
    /// Frame built in a separate buffer.
    #[must_use]
    pub fn copied(bytes: Bytes, slot: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            bytes,
            zero_copy: false,
            _slot: slot,
        }
    }

    /// Frame sent straight out of `block[range]`.
    ///
    /// The block returns to its pool when the frame is dropped.
    #[must_use]
    pub fn zero_copy(
        block: MemoryBlock,
        range: Range<usize>,
        slot: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            bytes: block.freeze(range),
            zero_copy: true,
            _slot: slot,
        }
    }

    /// Wire bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length on the wire.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` for an empty frame.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `true` when the bytes still live in a pool block.
    #[must_use]
    pub fn is_zero_copy(&self) -> bool {
        self.zero_copy
    }
}

/// Outbound side of a host link.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand a frame to the link. Returns once the link has accepted it;
    /// transmission completes when the frame is dropped.
    async fn submit(&self, frame: OutboundFrame) -> XepResult<()>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// A transport plus its inbound channel.
#[derive(Clone)]
pub struct Link {
    /// Outbound side
    pub transport: Arc<dyn Transport>,
    /// Inbound side
    pub inbound: Inbound,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("transport", &self.transport.name())
            .finish()
    }
}

/// Transport over any byte stream (stdio, TCP).
///
/// A writer task drains submitted frames in order; a reader task forwards
/// received chunks to the inbound channel.
pub struct StreamTransport {
    name: String,
    frames: mpsc::Sender<OutboundFrame>,
    bytes_written: Arc<AtomicU64>,
}

impl StreamTransport {
    /// Spawn reader and writer tasks for a stream pair.
    pub fn spawn<R, W>(name: &str, mut reader: R, mut writer: W) -> Link
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (frame_tx, mut frame_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Bytes>(INBOUND_DEPTH);
        let bytes_written = Arc::new(AtomicU64::new(0));

        let writer_name = name.to_string();
        let written = bytes_written.clone();
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let result = async {
                    writer.write_all(frame.bytes()).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = result {
                    warn!(link = %writer_name, error = %e, "Link write failed");
                    break;
                }
                written.fetch_add(frame.len() as u64, Ordering::Relaxed);
            }
            debug!(link = %writer_name, "Link writer stopped");
        });

        let reader_name = name.to_string();
        tokio::spawn(async move {
            loop {
                let mut buf = BytesMut::with_capacity(READ_CHUNK);
                match reader.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if inbound_tx.send(buf.freeze()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(link = %reader_name, error = %e, "Link read failed");
                        break;
                    }
                }
            }
            info!(link = %reader_name, "Link closed by host");
        });

        let transport = Arc::new(Self {
            name: name.to_string(),
            frames: frame_tx,
            bytes_written,
        });
        Link {
            transport,
            inbound: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn submit(&self, frame: OutboundFrame) -> XepResult<()> {
        self.frames
            .send(frame)
            .await
            .map_err(|_| XepError::Transport(format!("{} writer stopped", self.name)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// In-process transport that records every frame.
///
/// While stalled, submitted frames are held, so the link's send slot stays
/// taken as it would with a host that stopped reading.
///
/// ```
/// use bytes::Bytes;
/// use xep::transport::{LoopbackTransport, OutboundFrame, Transport};
///
/// tokio_test::block_on(async {
///     let (host, link) = LoopbackTransport::new("host");
///     link.transport
///         .submit(OutboundFrame::copied(Bytes::from_static(b"\x7d\x10\x6d\x7e"), None))
///         .await
///         .unwrap();
///     assert_eq!(host.frames().len(), 1);
///
///     host.inject(b"\x7d\x01\x7c\x7e").await.unwrap();
///     let received = link.inbound.lock().await.recv().await.unwrap();
///     assert_eq!(&received[..], b"\x7d\x01\x7c\x7e");
/// });
/// ```
pub struct LoopbackTransport {
    name: String,
    sent: Mutex<Vec<Bytes>>,
    held: Mutex<Vec<OutboundFrame>>,
    stalled: AtomicBool,
    zero_copy_frames: AtomicU64,
    notify: Notify,
    host: mpsc::Sender<Bytes>,
}

impl LoopbackTransport {
    /// Create a loopback link.
    #[must_use]
    pub fn new(name: &str) -> (Arc<Self>, Link) {
        let (host, inbound_rx) = mpsc::channel(INBOUND_DEPTH);
        let transport = Arc::new(Self {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            stalled: AtomicBool::new(false),
            zero_copy_frames: AtomicU64::new(0),
            notify: Notify::new(),
            host,
        });
        let link = Link {
            transport: transport.clone(),
            inbound: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
        };
        (transport, link)
    }

    /// Hold (`true`) or complete (`false`) submitted frames.
    ///
    /// Un-stalling completes every held frame in order.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
        if !stalled {
            let held: Vec<_> = self.held.lock().drain(..).collect();
            for frame in held {
                self.complete(frame);
            }
        }
    }

    /// Frames completed so far.
    #[must_use]
    pub fn frames(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Number of completed frames that were sent out of a pool block.
    #[must_use]
    pub fn zero_copy_frames(&self) -> u64 {
        self.zero_copy_frames.load(Ordering::Relaxed)
    }

    /// Frames waiting while stalled.
    #[must_use]
    pub fn held_frames(&self) -> usize {
        self.held.lock().len()
    }

    /// Deliver bytes as if the host had sent them.
    pub async fn inject(&self, data: &[u8]) -> XepResult<()> {
        self.host
            .send(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| XepError::Transport(format!("{} receiver dropped", self.name)))
    }

    /// Wait until at least `count` frames have completed.
    pub async fn wait_for_frames(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.sent.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn complete(&self, frame: OutboundFrame) {
        if frame.is_zero_copy() {
            self.zero_copy_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.sent.lock().push(Bytes::copy_from_slice(frame.bytes()));
        drop(frame);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn submit(&self, frame: OutboundFrame) -> XepResult<()> {
        if self.stalled.load(Ordering::Acquire) {
            self.held.lock().push(frame);
        } else {
            self.complete(frame);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
