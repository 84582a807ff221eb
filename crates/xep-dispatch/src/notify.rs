use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Notification bits delivered from interrupt context to a task.
///
/// [`TaskNotifier::notify`] ORs bits in and never blocks, so it is safe to call
/// from a timer callback or a simulated ISR. The owning task collects and
/// clears all pending bits with [`TaskNotifier::wait`].
#[derive(Debug, Default)]
pub struct TaskNotifier {
    bits: AtomicU32,
    notify: Notify,
}

impl TaskNotifier {
    /// Create with no pending bits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `bits` and wake the task.
    pub fn notify(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
        self.notify.notify_one();
    }

    /// Pending bits without clearing them.
    #[must_use]
    pub fn pending(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for bits, then return and clear them.
    ///
    /// Returns 0 when the timeout expires with nothing pending.
    pub async fn wait(&self, timeout: Duration) -> u32 {
        let notified = self.notify.notified();
        let bits = self.bits.swap(0, Ordering::AcqRel);
        if bits != 0 {
            return bits;
        }
        let _ = tokio::time::timeout(timeout, notified).await;
        self.bits.swap(0, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bits_accumulate() {
        let notifier = TaskNotifier::new();
        notifier.notify(0x1);
        notifier.notify(0x4);
        assert_eq!(notifier.pending(), 0x5);
        assert_eq!(notifier.wait(Duration::from_millis(10)).await, 0x5);
        assert_eq!(notifier.pending(), 0);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let notifier = TaskNotifier::new();
        assert_eq!(notifier.wait(Duration::from_millis(5)).await, 0);
    }

    #[tokio::test]
    async fn test_wakes_waiting_task() {
        let notifier = std::sync::Arc::new(TaskNotifier::new());
        let waiter = {
            let notifier = notifier.clone();
            tokio::spawn(async move { notifier.wait(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        notifier.notify(0x2);
        assert_eq!(waiter.await.unwrap(), 0x2);
    }
}
