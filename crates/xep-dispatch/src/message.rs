use crate::content::{BulkView, Content, ContentRef};
use crate::error::DispatchResult;
use crate::queue::QueueId;
use crate::topic::Topic;
use xep_pool::SharedBlock;

/// Envelope for one payload travelling on the bus.
///
/// Cloning an envelope shares the payload block; it never copies it.
#[derive(Debug, Clone)]
pub struct DispatchMessage {
    /// Topic the message was delivered on
    pub topic: Topic,
    /// Monotonic message id assigned by the dispatcher
    pub id: u32,
    /// Id of the message this one answers
    pub reply_to: Option<u32>,
    /// Payload block
    pub block: SharedBlock,
    /// Number of valid payload bytes in `block`
    pub length: usize,
    /// Queue of the task that sent the message, if it has one
    pub sender: Option<QueueId>,
}

impl DispatchMessage {
    /// The valid payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.block[..self.length.min(self.block.len())]
    }

    /// Content kind tag, if the payload carries a known one.
    #[must_use]
    pub fn content_ref(&self) -> Option<ContentRef> {
        ContentRef::peek(self.payload())
    }

    /// Decode the payload into an owned [`Content`].
    pub fn decode(&self) -> DispatchResult<Content> {
        Content::decode(self.payload())
    }

    /// Zero-copy layout of a bulk payload.
    #[must_use]
    pub fn bulk_view(&self) -> Option<BulkView> {
        BulkView::parse(self.payload())
    }
}
