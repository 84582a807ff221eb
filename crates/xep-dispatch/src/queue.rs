use crate::error::{DispatchError, DispatchResult};
use crate::message::DispatchMessage;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Slot of a queue in the dispatcher's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub(crate) usize);

impl QueueId {
    /// Arena slot index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Bounded FIFO of envelopes owned by one consuming task.
///
/// The mutex doubles as the subscriber lock: every access goes through
/// [`MessageQueue::lock_for`] with an explicit timeout.
pub struct MessageQueue {
    id: QueueId,
    name: String,
    capacity: usize,
    messages: Mutex<VecDeque<DispatchMessage>>,
    notify: Notify,
    lock_timeout: Duration,
    enqueued: AtomicU64,
    rejected: AtomicU64,
}

impl MessageQueue {
    pub(crate) fn new(id: QueueId, name: &str, capacity: usize, lock_timeout: Duration) -> Self {
        Self {
            id,
            name: name.to_string(),
            capacity,
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            lock_timeout,
            enqueued: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Arena id, usable as sender identity.
    #[must_use]
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Name given at registration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of envelopes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take the queue lock, waiting at most `timeout`.
    #[must_use]
    pub fn lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, VecDeque<DispatchMessage>>> {
        self.messages.try_lock_for(timeout)
    }

    /// Current number of queued envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_for(self.lock_timeout).map_or(0, |q| q.len())
    }

    /// `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free envelope slots.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Append an envelope and wake the consumer.
    pub(crate) fn push(&self, message: DispatchMessage, timeout: Duration) -> DispatchResult<()> {
        let mut queue = self.lock_for(timeout).ok_or(DispatchError::Timeout)?;
        if queue.len() >= self.capacity {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DispatchError::Full);
        }
        queue.push_back(message);
        drop(queue);

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(())
    }

    /// Pop the oldest envelope without waiting for new ones.
    #[must_use]
    pub fn try_recv(&self) -> Option<DispatchMessage> {
        self.lock_for(self.lock_timeout)?.pop_front()
    }

    /// Wait for the next envelope.
    pub async fn recv(&self) -> DispatchMessage {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.try_recv() {
                return message;
            }
            notified.await;
        }
    }

    /// Wait for the next envelope, giving up after `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<DispatchMessage> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }

    /// Envelopes accepted and envelopes rejected because the queue was full.
    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        (
            self.enqueued.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
        )
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish()
    }
}
