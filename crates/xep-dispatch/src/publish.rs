//! Shorthands for the records every task publishes.

use crate::content::{BulkHeader, Content};
use crate::dispatcher::Dispatcher;
use crate::error::DispatchResult;
use crate::queue::QueueId;
use crate::topic::Topic;
use xep_pool::MemoryBlock;

impl Dispatcher {
    /// Publish a command acknowledgement.
    pub fn send_ack(&self, topic: Topic) -> DispatchResult<u32> {
        self.publish(topic, &Content::Ack, None)
    }

    /// Publish an error reply.
    pub fn send_error(&self, topic: Topic, code: u32) -> DispatchResult<u32> {
        self.publish(topic, &Content::Error { code }, None)
    }

    /// Publish a ping answer.
    pub fn send_pong(&self, topic: Topic, value: u32) -> DispatchResult<u32> {
        self.publish(topic, &Content::Pong { value }, None)
    }

    /// Publish a module state change.
    pub fn send_system(&self, topic: Topic, code: u32) -> DispatchResult<u32> {
        self.publish(topic, &Content::System { code }, None)
    }

    /// Publish text telemetry.
    pub fn send_data_string(
        &self,
        topic: Topic,
        content_id: u32,
        info: u32,
        text: &str,
    ) -> DispatchResult<u32> {
        let content = Content::DataString {
            content_id,
            info,
            text: text.to_string(),
        };
        self.publish(topic, &content, None)
    }

    /// Publish byte telemetry with the bulk layout.
    pub fn send_data_byte(
        &self,
        topic: Topic,
        content_id: u32,
        info: u32,
        data: &[u8],
    ) -> DispatchResult<u32> {
        let header = BulkHeader::DataByte { content_id, info };
        let mut block = self.get_block(header.message_size(data.len()))?;
        let offset = header.write_into(&mut block, data.len())?;
        block[offset..offset + data.len()].copy_from_slice(data);
        self.send(topic, block, offset + data.len(), None)
    }

    /// Publish float telemetry.
    pub fn send_data_float(
        &self,
        topic: Topic,
        content_id: u32,
        info: u32,
        data: &[f32],
    ) -> DispatchResult<u32> {
        let content = Content::DataFloat {
            content_id,
            info,
            data: data.to_vec(),
        };
        self.publish(topic, &content, None)
    }

    /// Publish an integer reply.
    pub fn send_reply_int(
        &self,
        topic: Topic,
        content_id: u32,
        info: u32,
        data: &[u32],
    ) -> DispatchResult<u32> {
        let content = Content::ReplyInt {
            content_id,
            info,
            data: data.to_vec(),
        };
        self.publish(topic, &content, None)
    }

    /// Publish a byte reply.
    pub fn send_reply_byte(
        &self,
        topic: Topic,
        content_id: u32,
        info: u32,
        data: &[u8],
    ) -> DispatchResult<u32> {
        let content = Content::ReplyByte {
            content_id,
            info,
            data: data.to_vec(),
        };
        self.publish(topic, &content, None)
    }

    /// Publish a text reply.
    pub fn send_reply_string(
        &self,
        topic: Topic,
        content_id: u32,
        info: u32,
        text: &str,
    ) -> DispatchResult<u32> {
        let content = Content::ReplyString {
            content_id,
            info,
            text: text.to_string(),
        };
        self.publish(topic, &content, None)
    }

    /// Publish a float reply.
    pub fn send_reply_float(
        &self,
        topic: Topic,
        content_id: u32,
        info: u32,
        data: &[f32],
    ) -> DispatchResult<u32> {
        let content = Content::ReplyFloat {
            content_id,
            info,
            data: data.to_vec(),
        };
        self.publish(topic, &content, None)
    }

    /// Write a radar frame into `block` and publish it.
    ///
    /// `block` must come from [`Dispatcher::get_block`] with at least
    /// [`Dispatcher::radar_frame_size`] bytes; it is released if the layout
    /// does not fit.
    pub fn send_radar_frame(
        &self,
        topic: Topic,
        mut block: MemoryBlock,
        frame_counter: u32,
        samples: &[f32],
        sender: Option<QueueId>,
    ) -> DispatchResult<u32> {
        let header = BulkHeader::RadarFrame { frame_counter };
        let data_len = samples.len() * 4;
        let offset = header.write_into(&mut block, data_len)?;
        for (chunk, v) in block[offset..offset + data_len]
            .chunks_exact_mut(4)
            .zip(samples)
        {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        self.send(topic, block, offset + data_len, sender)
    }

    /// Block size needed for a radar frame of `sample_count` floats.
    #[must_use]
    pub fn radar_frame_size(sample_count: usize) -> usize {
        BulkHeader::RadarFrame { frame_counter: 0 }.message_size(sample_count * 4)
    }
}
