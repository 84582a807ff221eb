use crate::content::Content;
use crate::error::{DispatchError, DispatchResult};
use crate::message::DispatchMessage;
use crate::queue::{MessageQueue, QueueId};
use crate::topic::Topic;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use xep_pool::{MemoryBlock, MemoryPoolSet};

/// Timeouts used by the bus.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Lock wait per subscriber for `send` and `reply`
    pub send_timeout: Duration,
    /// Lock wait per subscriber for `forward`
    pub forward_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_millis(10),
            forward_timeout: Duration::from_millis(500),
        }
    }
}

/// Bus-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Messages accepted by `send`, `forward` or `reply`
    pub sent: u64,
    /// Envelopes placed in subscriber queues
    pub delivered: u64,
    /// Envelopes refused by a full or locked queue
    pub rejected: u64,
    /// Messages sent to a topic without subscribers
    pub unrouted: u64,
}

/// Topic-keyed publish/subscribe bus.
///
/// Queues live in an arena indexed by [`QueueId`] and are registered once at
/// task start-up; the topic table maps each [`Topic`] to the queues that
/// subscribe to it.
pub struct Dispatcher {
    pools: MemoryPoolSet,
    queues: RwLock<Vec<Arc<MessageQueue>>>,
    topics: RwLock<[Vec<QueueId>; Topic::COUNT]>,
    next_id: AtomicU32,
    config: DispatcherConfig,
    sent: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
    unrouted: AtomicU64,
}

impl Dispatcher {
    /// Create a bus over `pools`.
    #[must_use]
    pub fn new(pools: MemoryPoolSet, config: DispatcherConfig) -> Self {
        info!(
            pool_count = pools.len(),
            statistics = %pools.statistics(),
            "Dispatcher created"
        );
        Self {
            pools,
            queues: RwLock::new(Vec::new()),
            topics: RwLock::new(Default::default()),
            next_id: AtomicU32::new(1),
            config,
            sent: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            unrouted: AtomicU64::new(0),
        }
    }

    /// Create a bounded queue for one consuming task.
    pub fn register(&self, name: &str, capacity: usize) -> Arc<MessageQueue> {
        let mut queues = self.queues.write();
        let id = QueueId(queues.len());
        let queue = Arc::new(MessageQueue::new(
            id,
            name,
            capacity,
            self.config.send_timeout,
        ));
        queues.push(Arc::clone(&queue));
        debug!(queue = name, capacity, slot = id.0, "Queue registered");
        queue
    }

    /// Attach a registered queue to a topic.
    ///
    /// Subscribing the same queue twice to one topic is a no-op.
    pub fn subscribe(&self, topic: Topic, queue: &MessageQueue) -> DispatchResult<()> {
        if self.queue(queue.id()).is_none() {
            return Err(DispatchError::NotFound);
        }
        let mut topics = self.topics.write();
        let subscribers = &mut topics[topic.index()];
        if !subscribers.contains(&queue.id()) {
            subscribers.push(queue.id());
        }
        debug!(?topic, queue = queue.name(), "Queue subscribed");
        Ok(())
    }

    /// Number of queues subscribed to `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.read()[topic.index()].len()
    }

    /// Take a payload block of at least `size` bytes. Never blocks.
    pub fn get_block(&self, size: usize) -> DispatchResult<MemoryBlock> {
        Ok(self.pools.take(size)?)
    }

    /// The pool set backing the bus.
    #[must_use]
    pub fn pools(&self) -> &MemoryPoolSet {
        &self.pools
    }

    /// Publish `length` bytes of `block` to every subscriber of `topic`.
    ///
    /// Subscribers share the block. If any queue refuses the envelope the
    /// error is returned, other subscribers still get theirs. The block is
    /// released as soon as no envelope references it.
    pub fn send(
        &self,
        topic: Topic,
        block: MemoryBlock,
        length: usize,
        sender: Option<QueueId>,
    ) -> DispatchResult<u32> {
        let id = self.next_message_id();
        let message = DispatchMessage {
            topic,
            id,
            reply_to: None,
            block: block.into_shared(),
            length,
            sender,
        };
        self.deliver(message, self.config.send_timeout)?;
        Ok(id)
    }

    /// Re-route a received message to another topic without copying it.
    ///
    /// The message keeps its id.
    pub fn forward(&self, topic: Topic, mut message: DispatchMessage) -> DispatchResult<u32> {
        message.topic = topic;
        let id = message.id;
        self.deliver(message, self.config.forward_timeout)?;
        Ok(id)
    }

    /// Answer `original`.
    ///
    /// The reply goes straight to the sender's queue when the request carries
    /// one, regardless of who subscribes to `topic`; otherwise it is
    /// published on `topic`.
    pub fn reply(
        &self,
        original: &DispatchMessage,
        topic: Topic,
        block: MemoryBlock,
        length: usize,
    ) -> DispatchResult<u32> {
        let id = self.next_message_id();
        let message = DispatchMessage {
            topic,
            id,
            reply_to: Some(original.id),
            block: block.into_shared(),
            length,
            sender: None,
        };

        match original.sender.and_then(|sender| self.queue(sender)) {
            Some(queue) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                match queue.push(message, self.config.send_timeout) {
                    Ok(()) => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                        Ok(id)
                    }
                    Err(err) => {
                        self.rejected.fetch_add(1, Ordering::Relaxed);
                        warn!(queue = queue.name(), %err, "Reply not delivered");
                        Err(err)
                    }
                }
            }
            None => {
                self.deliver(message, self.config.send_timeout)?;
                Ok(id)
            }
        }
    }

    /// Release a consumed message.
    ///
    /// The block returns to its pool once every envelope sharing it is released.
    pub fn release_message(&self, message: DispatchMessage) {
        drop(message);
    }

    /// Encode `content` into a fresh block and publish it.
    pub fn publish(
        &self,
        topic: Topic,
        content: &Content,
        sender: Option<QueueId>,
    ) -> DispatchResult<u32> {
        let (block, length) = self.encode(content)?;
        self.send(topic, block, length, sender)
    }

    /// Encode `content` into a fresh block and reply with it.
    pub fn reply_content(
        &self,
        original: &DispatchMessage,
        topic: Topic,
        content: &Content,
    ) -> DispatchResult<u32> {
        let (block, length) = self.encode(content)?;
        self.reply(original, topic, block, length)
    }

    /// Get current counters.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
        }
    }

    fn encode(&self, content: &Content) -> DispatchResult<(MemoryBlock, usize)> {
        let mut block = self.get_block(content.encoded_len())?;
        let length = content.encode(&mut block)?;
        Ok((block, length))
    }

    fn next_message_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn queue(&self, id: QueueId) -> Option<Arc<MessageQueue>> {
        self.queues.read().get(id.0).cloned()
    }

    fn deliver(&self, message: DispatchMessage, timeout: Duration) -> DispatchResult<()> {
        let targets: Vec<Arc<MessageQueue>> = {
            let topics = self.topics.read();
            let queues = self.queues.read();
            topics[message.topic.index()]
                .iter()
                .filter_map(|id| queues.get(id.0).cloned())
                .collect()
        };

        if targets.is_empty() {
            self.unrouted.fetch_add(1, Ordering::Relaxed);
            debug!(topic = ?message.topic, id = message.id, "No subscriber, message dropped");
            return Err(DispatchError::UnknownTopic(message.topic));
        }

        self.sent.fetch_add(1, Ordering::Relaxed);
        let mut result = Ok(());
        for queue in targets {
            match queue.push(message.clone(), timeout) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        queue = queue.name(),
                        topic = ?message.topic,
                        id = message.id,
                        %err,
                        "Dispatch queue refused message"
                    );
                    result = Err(err);
                }
            }
        }
        result
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queues", &self.queues.read().len())
            .field("pools", &self.pools.statistics())
            .finish()
    }
}
