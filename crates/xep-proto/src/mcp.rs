//! Escaped packet encoding and protocol constants.

use bytes::{BufMut, Bytes, BytesMut};

/// Packet start flag.
pub const START: u8 = 0x7d;
/// Packet end flag.
pub const END: u8 = 0x7e;
/// Escape prefix.
pub const ESC: u8 = 0x7f;

/// Response record: pong.
pub const RESP_PONG: u8 = 0x01;
/// Response record: ack.
pub const RESP_ACK: u8 = 0x10;
/// Response record: reply.
pub const RESP_REPLY: u8 = 0x11;
/// Response record: error.
pub const RESP_ERROR: u8 = 0x20;
/// Response record: system.
pub const RESP_SYSTEM: u8 = 0x30;
/// Response record: application data.
pub const RESP_APPDATA: u8 = 0x50;
/// Response record: data.
pub const RESP_DATA: u8 = 0xa0;

/// Error code: command not recognized.
pub const ERROR_NOT_RECOGNIZED: u32 = 0x01;
/// Error code: crc check failed.
pub const ERROR_CRC_FAILED: u32 = 0x02;
/// Error code: resource busy.
pub const ERROR_BUSY: u32 = 0x03;
/// Error code: command failed.
pub const ERROR_COMMAND_FAILED: u32 = 0x21;
/// Error code: restarting.
pub const ERROR_RESTARTING: u32 = 0x22;
/// Error code: user-range failure.
pub const ERROR_USER: u32 = 0xa0;

/// System code: module is booting.
pub const SYSTEM_BOOTING: u32 = 0x10;
/// System code: module is ready.
pub const SYSTEM_READY: u32 = 0x11;

/// Pong value in normal operation.
pub const PONG_READY: u32 = 0xaaee_aeea;
/// Pong value in safe mode.
pub const PONG_SAFE_MODE: u32 = 0xffee_feef;

/// Appdata id of baseband IQ.
pub const APPDATA_BASEBAND_IQ: u32 = 0x0c;
/// Appdata id of baseband amplitude/phase.
pub const APPDATA_BASEBAND_AP: u32 = 0x0d;
/// Appdata id of pulse-Doppler floats.
pub const APPDATA_PD_FLOAT: u32 = 0x10;
/// Appdata id of pulse-Doppler bytes.
pub const APPDATA_PD_BYTE: u32 = 0x11;
/// Appdata id of noise-map floats.
pub const APPDATA_NOISEMAP_FLOAT: u32 = 0x12;
/// Appdata id of noise-map bytes.
pub const APPDATA_NOISEMAP_BYTE: u32 = 0x13;

/// Content id of raw radar frames.
pub const ID_RAW_FRAME_BUFFER: u32 = 0;

/// Element type of data and reply records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataType {
    /// `u8` elements
    Byte = 0x10,
    /// `u32` elements
    Int = 0x11,
    /// `f32` elements
    Float = 0x12,
    /// Characters
    String = 0x13,
}

/// Data (unsolicited) or reply (to a command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Streaming telemetry
    Data,
    /// Answer to a command
    Reply,
}

impl RecordKind {
    fn code(self) -> u8 {
        match self {
            Self::Data => RESP_DATA,
            Self::Reply => RESP_REPLY,
        }
    }
}

/// `true` for bytes that must be escaped.
#[must_use]
pub fn is_special(byte: u8) -> bool {
    matches!(byte, START | END | ESC)
}

/// Builder for escaped packets.
///
/// Reuses its buffer between packets. Each finished packet is handed out as
/// `Bytes`.
#[derive(Debug)]
pub struct PacketBuilder {
    buf: BytesMut,
    crc: u8,
}

impl PacketBuilder {
    /// Create a builder with `capacity` bytes reserved.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            crc: START,
        }
    }

    /// Begin a packet.
    pub fn start(&mut self) -> &mut Self {
        self.buf.clear();
        self.crc = START;
        self.buf.put_u8(START);
        self
    }

    /// Append one payload byte.
    pub fn byte(&mut self, byte: u8) -> &mut Self {
        if is_special(byte) {
            self.buf.put_u8(ESC);
        }
        self.crc ^= byte;
        self.buf.put_u8(byte);
        self
    }

    /// Append payload bytes.
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.reserve(data.len());
        for &b in data {
            self.byte(b);
        }
        self
    }

    /// Append a little-endian `u32`.
    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    /// Append a little-endian `f32`.
    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    /// Close the packet with crc and end flag.
    pub fn finish(&mut self) -> Bytes {
        let crc = self.crc;
        if is_special(crc) {
            self.buf.put_u8(ESC);
        }
        self.buf.put_u8(crc);
        self.buf.put_u8(END);
        self.buf.split().freeze()
    }

    /// `[ACK]`
    pub fn ack(&mut self) -> Bytes {
        self.start().byte(RESP_ACK).finish()
    }

    /// `[ERROR, u32 code]`
    pub fn error(&mut self, code: u32) -> Bytes {
        self.start().byte(RESP_ERROR).u32(code).finish()
    }

    /// `[PONG, u32 value]`
    pub fn pong(&mut self, value: u32) -> Bytes {
        self.start().byte(RESP_PONG).u32(value).finish()
    }

    /// `[SYSTEM, u32 code]`
    pub fn system(&mut self, code: u32) -> Bytes {
        self.start().byte(RESP_SYSTEM).u32(code).finish()
    }

    /// `[DATA|REPLY, type, u32 content_id, u32 info, (u32 count, raw)]`
    ///
    /// `raw` holds `count` elements already in little-endian order. The count
    /// and data are omitted when `count` is zero.
    pub fn record(
        &mut self,
        kind: RecordKind,
        data_type: DataType,
        content_id: u32,
        info: u32,
        count: usize,
        raw: &[u8],
    ) -> Bytes {
        self.start()
            .byte(kind.code())
            .byte(data_type as u8)
            .u32(content_id)
            .u32(info);
        if count > 0 {
            self.u32(u32::try_from(count).unwrap_or(u32::MAX)).bytes(raw);
        }
        self.finish()
    }

    /// `[APPDATA, raw]`
    pub fn appdata(&mut self, raw: &[u8]) -> Bytes {
        self.start().byte(RESP_APPDATA).bytes(raw).finish()
    }
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::with_capacity(256)
    }
}
