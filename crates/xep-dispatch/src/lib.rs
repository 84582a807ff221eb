//! Topic-keyed publish/subscribe bus for the firmware tasks.
//!
//! Producers (the radar task, the command processor) and consumers (the host
//! link, the application task) are decoupled by [`Topic`]. Payloads live in
//! pool blocks and are never copied by the bus: a [`Dispatcher::send`] to a
//! topic with `K` subscribers enqueues `K` envelopes that all reference one
//! [`SharedBlock`](xep_pool::SharedBlock). The block is released once the last
//! envelope is dropped.
//!
//! # Pieces
//!
//! - [`Dispatcher`]: owns the [`MemoryPoolSet`](xep_pool::MemoryPoolSet), the
//!   queue arena and the topic table.
//! - [`MessageQueue`]: bounded FIFO of [`DispatchMessage`] envelopes plus its
//!   lock and wake-up signal.
//! - [`Content`]: typed view of a payload, keyed by [`ContentRef`] with the
//!   numeric tags used on the wire.
//! - [`TaskNotifier`]: interrupt-to-task notification bits.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use xep_dispatch::{Content, Dispatcher, DispatcherConfig, Topic};
//! use xep_pool::MemoryPoolSet;
//!
//! # tokio_test::block_on(async {
//! let pools = MemoryPoolSet::with_pools(&[(100, 10), (7000, 2)]).unwrap();
//! let dispatcher = Arc::new(Dispatcher::new(pools, DispatcherConfig::default()));
//!
//! let hostcom = dispatcher.register("hostcom", 50);
//! dispatcher.subscribe(Topic::HostComSend, &hostcom).unwrap();
//!
//! dispatcher.publish(Topic::HostComSend, &Content::Ack, None).unwrap();
//!
//! let message = hostcom.recv().await;
//! assert_eq!(message.decode().unwrap(), Content::Ack);
//! # });
//! ```

mod content;
mod dispatcher;
mod error;
mod message;
mod notify;
mod publish;
mod queue;
mod topic;

pub use content::{
    BasebandKind, BulkHeader, BulkView, Content, ContentRef, PulseDopplerParams,
    BULK_HEADER_ROOM,
};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats};
pub use error::{DispatchError, DispatchResult};
pub use message::DispatchMessage;
pub use notify::TaskNotifier;
pub use queue::{MessageQueue, QueueId};
pub use topic::Topic;
