//! Typed message contents.
//!
//! Every payload starts with its [`ContentRef`] as a little-endian `u32`.
//! Small kinds are decoded into owned [`Content`] values. Bulk kinds (radar
//! frames, baseband, pulse-Doppler matrices, byte telemetry) record where
//! their sample data starts and keep [`BULK_HEADER_ROOM`] spare bytes in
//! front of it, so the host link can write its wire header in place.
//!
//! Bulk layout:
//!
//! ```text
//! [u32 ref][u32 data_offset][u32 data_len][kind fields][room][data...]
//!                                                            ^ data_offset
//! ```

use crate::error::{DispatchError, DispatchResult};

/// Spare bytes reserved in front of bulk sample data.
pub const BULK_HEADER_ROOM: usize = 72;

const BULK_PREFIX: usize = 12;

/// Content kind tags. Values are part of the host protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum ContentRef {
    SimpleResult = 1,
    HostComAck = 2,
    Error = 3,
    Pong = 4,
    AppDataSleep = 5,
    VitalSigns = 6,
    Respiration = 7,
    RespirationMovingList = 8,
    RespirationDetectionList = 9,
    RespirationNormalizedMovementList = 10,
    PresenceSingle = 11,
    PresenceMovingList = 12,
    BasebandAmplitudePhase = 13,
    BasebandIq = 14,
    ProfileParameterFile = 15,
    PulseDopplerFloat = 16,
    NoisemapFloat = 17,
    PulseDopplerByte = 18,
    NoisemapByte = 19,
    System = 20,
    DataString = 21,
    DataByte = 22,
    DataFloat = 23,
    ReplyInt = 24,
    ReplyByte = 25,
    ReplyString = 26,
    ReplyFloat = 27,
    RadarDataFrame = 28,
}

impl ContentRef {
    /// Kind for a numeric tag.
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        use ContentRef::*;
        Some(match value {
            1 => SimpleResult,
            2 => HostComAck,
            3 => Error,
            4 => Pong,
            5 => AppDataSleep,
            6 => VitalSigns,
            7 => Respiration,
            8 => RespirationMovingList,
            9 => RespirationDetectionList,
            10 => RespirationNormalizedMovementList,
            11 => PresenceSingle,
            12 => PresenceMovingList,
            13 => BasebandAmplitudePhase,
            14 => BasebandIq,
            15 => ProfileParameterFile,
            16 => PulseDopplerFloat,
            17 => NoisemapFloat,
            18 => PulseDopplerByte,
            19 => NoisemapByte,
            20 => System,
            21 => DataString,
            22 => DataByte,
            23 => DataFloat,
            24 => ReplyInt,
            25 => ReplyByte,
            26 => ReplyString,
            27 => ReplyFloat,
            28 => RadarDataFrame,
            _ => return None,
        })
    }

    /// Read the tag at the start of a payload.
    #[must_use]
    pub fn peek(payload: &[u8]) -> Option<Self> {
        let raw = payload.get(..4)?;
        Self::from_u32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Application profile outputs carried as opaque bytes.
    #[must_use]
    pub fn is_app_data(self) -> bool {
        matches!(self as u32, 5..=12 | 15)
    }

    /// Kinds stored with the bulk layout.
    #[must_use]
    pub fn is_bulk(self) -> bool {
        use ContentRef::*;
        matches!(
            self,
            DataByte
                | RadarDataFrame
                | BasebandAmplitudePhase
                | BasebandIq
                | PulseDopplerFloat
                | NoisemapFloat
                | PulseDopplerByte
                | NoisemapByte
        )
    }

    /// Streaming telemetry that may be dropped under backpressure.
    #[must_use]
    pub fn is_data(self) -> bool {
        use ContentRef::*;
        matches!(self, DataString | DataByte | DataFloat)
    }
}

/// Baseband representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasebandKind {
    /// In-phase / quadrature
    Iq,
    /// Amplitude / phase
    AmplitudePhase,
}

/// Geometry of one pulse-Doppler or noise-map matrix row.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[allow(missing_docs)]
pub struct PulseDopplerParams {
    pub frame_counter: u32,
    pub matrix_counter: u32,
    pub range_idx: u32,
    pub range_bins: u32,
    pub frequency_count: u32,
    pub pd_instance: u32,
    pub fps: f32,
    pub fps_decimated: f32,
    pub frequency_start: f32,
    pub frequency_step: f32,
    pub range: f32,
}

/// Fixed fields of a bulk payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BulkHeader {
    /// Byte telemetry
    DataByte {
        /// Host-visible content id
        content_id: u32,
        /// Free-form info word
        info: u32,
    },
    /// Raw radar frame, samples are `f32`
    RadarFrame {
        /// Chip frame counter
        frame_counter: u32,
    },
    /// Baseband samples, `2 * num_bins` `f32` values
    Baseband {
        /// IQ or amplitude/phase
        kind: BasebandKind,
        /// Chip frame counter
        frame_counter: u32,
        /// Number of range bins
        num_bins: u32,
        /// Bin length in metres
        bin_length: f32,
        /// Sampling frequency in Hz
        sampling_frequency: f32,
        /// Carrier frequency in Hz
        carrier_frequency: f32,
        /// Range of the first bin in metres
        range_offset: f32,
    },
    /// Pulse-Doppler or noise-map row, `f32` values
    PulseDopplerFloat {
        /// Noise map instead of pulse-Doppler
        noisemap: bool,
        /// Matrix geometry
        params: PulseDopplerParams,
    },
    /// Pulse-Doppler or noise-map row quantised to bytes
    PulseDopplerByte {
        /// Noise map instead of pulse-Doppler
        noisemap: bool,
        /// Matrix geometry
        params: PulseDopplerParams,
        /// Value of byte 0
        step_start: f32,
        /// Value step per byte increment
        step_size: f32,
    },
}

impl BulkHeader {
    /// Content kind of this header.
    #[must_use]
    pub fn content_ref(&self) -> ContentRef {
        match self {
            Self::DataByte { .. } => ContentRef::DataByte,
            Self::RadarFrame { .. } => ContentRef::RadarDataFrame,
            Self::Baseband {
                kind: BasebandKind::Iq,
                ..
            } => ContentRef::BasebandIq,
            Self::Baseband {
                kind: BasebandKind::AmplitudePhase,
                ..
            } => ContentRef::BasebandAmplitudePhase,
            Self::PulseDopplerFloat { noisemap: false, .. } => ContentRef::PulseDopplerFloat,
            Self::PulseDopplerFloat { noisemap: true, .. } => ContentRef::NoisemapFloat,
            Self::PulseDopplerByte { noisemap: false, .. } => ContentRef::PulseDopplerByte,
            Self::PulseDopplerByte { noisemap: true, .. } => ContentRef::NoisemapByte,
        }
    }

    fn fields_len(&self) -> usize {
        match self {
            Self::DataByte { .. } => 8,
            Self::RadarFrame { .. } => 4,
            Self::Baseband { .. } => 24,
            Self::PulseDopplerFloat { .. } => 44,
            Self::PulseDopplerByte { .. } => 52,
        }
    }

    /// Offset of the sample data inside the payload.
    #[must_use]
    pub fn data_offset(&self) -> usize {
        align4(BULK_PREFIX + self.fields_len()) + BULK_HEADER_ROOM
    }

    /// Payload size needed for `data_len` bytes of samples.
    #[must_use]
    pub fn message_size(&self, data_len: usize) -> usize {
        self.data_offset() + data_len
    }

    /// Write the prefix and fields; returns the data offset.
    ///
    /// The caller writes `data_len` sample bytes starting at the returned offset.
    pub fn write_into(&self, buf: &mut [u8], data_len: usize) -> DispatchResult<usize> {
        let data_offset = self.data_offset();
        if buf.len() < data_offset + data_len {
            return Err(DispatchError::Malformed(format!(
                "bulk payload needs {} bytes, block has {}",
                data_offset + data_len,
                buf.len()
            )));
        }

        let mut w = Writer::new(buf);
        w.u32(self.content_ref() as u32)?;
        w.u32(to_u32(data_offset)?)?;
        w.u32(to_u32(data_len)?)?;
        match *self {
            Self::DataByte { content_id, info } => {
                w.u32(content_id)?;
                w.u32(info)?;
            }
            Self::RadarFrame { frame_counter } => w.u32(frame_counter)?,
            Self::Baseband {
                frame_counter,
                num_bins,
                bin_length,
                sampling_frequency,
                carrier_frequency,
                range_offset,
                ..
            } => {
                w.u32(frame_counter)?;
                w.u32(num_bins)?;
                w.f32(bin_length)?;
                w.f32(sampling_frequency)?;
                w.f32(carrier_frequency)?;
                w.f32(range_offset)?;
            }
            Self::PulseDopplerFloat { params, .. } => write_pd(&mut w, &params)?,
            Self::PulseDopplerByte {
                params,
                step_start,
                step_size,
                ..
            } => {
                write_pd(&mut w, &params)?;
                w.f32(step_start)?;
                w.f32(step_size)?;
            }
        }
        Ok(data_offset)
    }

    fn read(kind: ContentRef, r: &mut Reader<'_>) -> DispatchResult<Self> {
        Ok(match kind {
            ContentRef::DataByte => Self::DataByte {
                content_id: r.u32()?,
                info: r.u32()?,
            },
            ContentRef::RadarDataFrame => Self::RadarFrame {
                frame_counter: r.u32()?,
            },
            ContentRef::BasebandIq | ContentRef::BasebandAmplitudePhase => Self::Baseband {
                kind: if kind == ContentRef::BasebandIq {
                    BasebandKind::Iq
                } else {
                    BasebandKind::AmplitudePhase
                },
                frame_counter: r.u32()?,
                num_bins: r.u32()?,
                bin_length: r.f32()?,
                sampling_frequency: r.f32()?,
                carrier_frequency: r.f32()?,
                range_offset: r.f32()?,
            },
            ContentRef::PulseDopplerFloat | ContentRef::NoisemapFloat => Self::PulseDopplerFloat {
                noisemap: kind == ContentRef::NoisemapFloat,
                params: read_pd(r)?,
            },
            ContentRef::PulseDopplerByte | ContentRef::NoisemapByte => Self::PulseDopplerByte {
                noisemap: kind == ContentRef::NoisemapByte,
                params: read_pd(r)?,
                step_start: r.f32()?,
                step_size: r.f32()?,
            },
            other => {
                return Err(DispatchError::Malformed(format!(
                    "{other:?} is not a bulk kind"
                )))
            }
        })
    }
}

fn write_pd(w: &mut Writer<'_>, p: &PulseDopplerParams) -> DispatchResult<()> {
    for v in [
        p.frame_counter,
        p.matrix_counter,
        p.range_idx,
        p.range_bins,
        p.frequency_count,
        p.pd_instance,
    ] {
        w.u32(v)?;
    }
    for v in [
        p.fps,
        p.fps_decimated,
        p.frequency_start,
        p.frequency_step,
        p.range,
    ] {
        w.f32(v)?;
    }
    Ok(())
}

fn read_pd(r: &mut Reader<'_>) -> DispatchResult<PulseDopplerParams> {
    Ok(PulseDopplerParams {
        frame_counter: r.u32()?,
        matrix_counter: r.u32()?,
        range_idx: r.u32()?,
        range_bins: r.u32()?,
        frequency_count: r.u32()?,
        pd_instance: r.u32()?,
        fps: r.f32()?,
        fps_decimated: r.f32()?,
        frequency_start: r.f32()?,
        frequency_step: r.f32()?,
        range: r.f32()?,
    })
}

/// Zero-copy description of a bulk payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BulkView {
    /// Decoded fixed fields
    pub header: BulkHeader,
    /// Start of the sample data
    pub data_offset: usize,
    /// Length of the sample data in bytes
    pub data_len: usize,
}

impl BulkView {
    /// Parse the bulk prefix of `payload`.
    ///
    /// Returns `None` for non-bulk kinds or inconsistent offsets.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let kind = ContentRef::peek(payload).filter(|k| k.is_bulk())?;
        let mut r = Reader::new(payload);
        r.u32().ok()?;
        let data_offset = r.u32().ok()? as usize;
        let data_len = r.u32().ok()? as usize;
        let header = BulkHeader::read(kind, &mut r).ok()?;

        if data_offset != header.data_offset() || data_offset + data_len > payload.len() {
            return None;
        }
        Some(Self {
            header,
            data_offset,
            data_len,
        })
    }
}

/// Owned, decoded message content.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Generic result word
    SimpleResult {
        /// Result value
        value: u32,
    },
    /// Command accepted
    Ack,
    /// Command failed
    Error {
        /// Error code
        code: u32,
    },
    /// Reply to a ping
    Pong {
        /// Module state magic
        value: u32,
    },
    /// Module state change
    System {
        /// System code
        code: u32,
    },
    /// Text telemetry
    DataString {
        /// Host-visible content id
        content_id: u32,
        /// Free-form info word
        info: u32,
        /// Text payload
        text: String,
    },
    /// Float telemetry
    DataFloat {
        /// Host-visible content id
        content_id: u32,
        /// Free-form info word
        info: u32,
        /// Samples
        data: Vec<f32>,
    },
    /// Integer reply to a command
    ReplyInt {
        /// Host-visible content id
        content_id: u32,
        /// Free-form info word
        info: u32,
        /// Values
        data: Vec<u32>,
    },
    /// Byte reply to a command
    ReplyByte {
        /// Host-visible content id
        content_id: u32,
        /// Free-form info word
        info: u32,
        /// Values
        data: Vec<u8>,
    },
    /// Text reply to a command
    ReplyString {
        /// Host-visible content id
        content_id: u32,
        /// Free-form info word
        info: u32,
        /// Text payload
        text: String,
    },
    /// Float reply to a command
    ReplyFloat {
        /// Host-visible content id
        content_id: u32,
        /// Free-form info word
        info: u32,
        /// Values
        data: Vec<f32>,
    },
    /// Bulk kind with its sample bytes copied out
    Bulk {
        /// Fixed fields
        header: BulkHeader,
        /// Raw little-endian sample bytes
        data: Vec<u8>,
    },
    /// Application profile output, carried opaquely
    AppData {
        /// Profile content kind
        kind: ContentRef,
        /// Serialized profile data
        data: Vec<u8>,
    },
}

impl Content {
    /// Kind tag of this content.
    #[must_use]
    pub fn content_ref(&self) -> ContentRef {
        match self {
            Self::SimpleResult { .. } => ContentRef::SimpleResult,
            Self::Ack => ContentRef::HostComAck,
            Self::Error { .. } => ContentRef::Error,
            Self::Pong { .. } => ContentRef::Pong,
            Self::System { .. } => ContentRef::System,
            Self::DataString { .. } => ContentRef::DataString,
            Self::DataFloat { .. } => ContentRef::DataFloat,
            Self::ReplyInt { .. } => ContentRef::ReplyInt,
            Self::ReplyByte { .. } => ContentRef::ReplyByte,
            Self::ReplyString { .. } => ContentRef::ReplyString,
            Self::ReplyFloat { .. } => ContentRef::ReplyFloat,
            Self::Bulk { header, .. } => header.content_ref(),
            Self::AppData { kind, .. } => *kind,
        }
    }

    /// Bytes needed by [`Content::encode`].
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Ack => 4,
            Self::SimpleResult { .. }
            | Self::Error { .. }
            | Self::Pong { .. }
            | Self::System { .. } => 8,
            Self::DataString { text, .. } | Self::ReplyString { text, .. } => 16 + text.len(),
            Self::DataFloat { data, .. } | Self::ReplyFloat { data, .. } => 16 + 4 * data.len(),
            Self::ReplyInt { data, .. } => 16 + 4 * data.len(),
            Self::ReplyByte { data, .. } => 16 + data.len(),
            Self::Bulk { header, data } => header.message_size(data.len()),
            Self::AppData { data, .. } => 8 + data.len(),
        }
    }

    /// Serialize into `buf`; returns the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> DispatchResult<usize> {
        if let Self::Bulk { header, data } = self {
            let offset = header.write_into(buf, data.len())?;
            buf[offset..offset + data.len()].copy_from_slice(data);
            return Ok(offset + data.len());
        }

        let mut w = Writer::new(buf);
        w.u32(self.content_ref() as u32)?;
        match self {
            Self::Ack | Self::Bulk { .. } => {}
            Self::SimpleResult { value } | Self::Pong { value } => w.u32(*value)?,
            Self::Error { code } | Self::System { code } => w.u32(*code)?,
            Self::DataString {
                content_id,
                info,
                text,
            }
            | Self::ReplyString {
                content_id,
                info,
                text,
            } => {
                w.header(*content_id, *info, text.len())?;
                w.bytes(text.as_bytes())?;
            }
            Self::DataFloat {
                content_id,
                info,
                data,
            }
            | Self::ReplyFloat {
                content_id,
                info,
                data,
            } => {
                w.header(*content_id, *info, data.len())?;
                for v in data {
                    w.f32(*v)?;
                }
            }
            Self::ReplyInt {
                content_id,
                info,
                data,
            } => {
                w.header(*content_id, *info, data.len())?;
                for v in data {
                    w.u32(*v)?;
                }
            }
            Self::ReplyByte {
                content_id,
                info,
                data,
            } => {
                w.header(*content_id, *info, data.len())?;
                w.bytes(data)?;
            }
            Self::AppData { data, .. } => {
                w.u32(to_u32(data.len())?)?;
                w.bytes(data)?;
            }
        }
        Ok(w.pos)
    }

    /// Decode a payload.
    pub fn decode(payload: &[u8]) -> DispatchResult<Self> {
        let kind = ContentRef::peek(payload)
            .ok_or_else(|| DispatchError::Malformed("unknown content reference".into()))?;

        if kind.is_bulk() {
            let view = BulkView::parse(payload)
                .ok_or_else(|| DispatchError::Malformed(format!("bad {kind:?} layout")))?;
            return Ok(Self::Bulk {
                header: view.header,
                data: payload[view.data_offset..view.data_offset + view.data_len].to_vec(),
            });
        }

        let mut r = Reader::new(payload);
        r.u32()?;
        Ok(match kind {
            ContentRef::HostComAck => Self::Ack,
            ContentRef::SimpleResult => Self::SimpleResult { value: r.u32()? },
            ContentRef::Error => Self::Error { code: r.u32()? },
            ContentRef::Pong => Self::Pong { value: r.u32()? },
            ContentRef::System => Self::System { code: r.u32()? },
            ContentRef::DataString | ContentRef::ReplyString => {
                let (content_id, info, len) = r.header()?;
                let text = String::from_utf8_lossy(r.bytes(len)?).into_owned();
                if kind == ContentRef::DataString {
                    Self::DataString {
                        content_id,
                        info,
                        text,
                    }
                } else {
                    Self::ReplyString {
                        content_id,
                        info,
                        text,
                    }
                }
            }
            ContentRef::DataFloat | ContentRef::ReplyFloat => {
                let (content_id, info, count) = r.header()?;
                let data = (0..count).map(|_| r.f32()).collect::<DispatchResult<_>>()?;
                if kind == ContentRef::DataFloat {
                    Self::DataFloat {
                        content_id,
                        info,
                        data,
                    }
                } else {
                    Self::ReplyFloat {
                        content_id,
                        info,
                        data,
                    }
                }
            }
            ContentRef::ReplyInt => {
                let (content_id, info, count) = r.header()?;
                let data = (0..count).map(|_| r.u32()).collect::<DispatchResult<_>>()?;
                Self::ReplyInt {
                    content_id,
                    info,
                    data,
                }
            }
            ContentRef::ReplyByte => {
                let (content_id, info, count) = r.header()?;
                Self::ReplyByte {
                    content_id,
                    info,
                    data: r.bytes(count)?.to_vec(),
                }
            }
            app => {
                let len = r.u32()? as usize;
                Self::AppData {
                    kind: app,
                    data: r.bytes(len)?.to_vec(),
                }
            }
        })
    }
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn to_u32(n: usize) -> DispatchResult<u32> {
    u32::try_from(n).map_err(|_| DispatchError::Malformed(format!("length {n} exceeds u32")))
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, data: &[u8]) -> DispatchResult<()> {
        let end = self.pos + data.len();
        let dst = self.buf.get_mut(self.pos..end).ok_or_else(|| {
            DispatchError::Malformed(format!("content needs {end} bytes"))
        })?;
        dst.copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    fn u32(&mut self, v: u32) -> DispatchResult<()> {
        self.bytes(&v.to_le_bytes())
    }

    fn f32(&mut self, v: f32) -> DispatchResult<()> {
        self.bytes(&v.to_le_bytes())
    }

    fn header(&mut self, content_id: u32, info: u32, count: usize) -> DispatchResult<()> {
        self.u32(content_id)?;
        self.u32(info)?;
        self.u32(to_u32(count)?)
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> DispatchResult<&'a [u8]> {
        let end = self.pos + len;
        let out = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| DispatchError::Malformed("truncated content".into()))?;
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> DispatchResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> DispatchResult<f32> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn header(&mut self) -> DispatchResult<(u32, u32, usize)> {
        Ok((self.u32()?, self.u32()?, self.u32()? as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(content: &Content) -> Vec<u8> {
        let mut buf = vec![0u8; content.encoded_len()];
        let written = content.encode(&mut buf).unwrap();
        assert_eq!(written, buf.len());
        buf
    }

    #[test]
    fn test_wire_tags() {
        assert_eq!(ContentRef::HostComAck as u32, 2);
        assert_eq!(ContentRef::RadarDataFrame as u32, 28);
        assert_eq!(ContentRef::from_u32(19), Some(ContentRef::NoisemapByte));
        assert_eq!(ContentRef::from_u32(0), None);
        assert_eq!(ContentRef::from_u32(29), None);
    }

    #[test]
    fn test_kind_classes() {
        assert!(ContentRef::DataFloat.is_data());
        assert!(!ContentRef::ReplyFloat.is_data());
        assert!(ContentRef::PresenceSingle.is_app_data());
        assert!(ContentRef::ProfileParameterFile.is_app_data());
        assert!(!ContentRef::BasebandIq.is_app_data());
        assert!(ContentRef::BasebandIq.is_bulk());
        assert!(!ContentRef::DataFloat.is_bulk());
    }

    #[test]
    fn test_reply_string_layout() {
        let buf = encode(&Content::ReplyString {
            content_id: 0x58,
            info: 0,
            text: "X4M03".into(),
        });
        assert_eq!(&buf[0..4], &26u32.to_le_bytes());
        assert_eq!(&buf[4..8], &0x58u32.to_le_bytes());
        assert_eq!(&buf[12..16], &5u32.to_le_bytes());
        assert_eq!(&buf[16..], b"X4M03");
    }

    #[test]
    fn test_decode_reply_int() {
        let content = Content::ReplyInt {
            content_id: 0x12,
            info: 0,
            data: vec![16, 32],
        };
        assert_eq!(Content::decode(&encode(&content)).unwrap(), content);
    }

    #[test]
    fn test_radar_frame_bulk_layout() {
        let header = BulkHeader::RadarFrame { frame_counter: 7 };
        let samples: Vec<u8> = [1.0f32, -2.5]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let buf = encode(&Content::Bulk {
            header,
            data: samples.clone(),
        });

        let view = BulkView::parse(&buf).unwrap();
        assert_eq!(view.header, header);
        assert_eq!(view.data_len, 8);
        assert!(view.data_offset >= BULK_PREFIX + 4 + BULK_HEADER_ROOM);
        assert_eq!(&buf[view.data_offset..], &samples[..]);
    }

    #[test]
    fn test_pulse_doppler_byte_fields() {
        let header = BulkHeader::PulseDopplerByte {
            noisemap: true,
            params: PulseDopplerParams {
                frequency_count: 3,
                fps: 17.0,
                ..Default::default()
            },
            step_start: -10.0,
            step_size: 0.5,
        };
        let content = Content::Bulk {
            header,
            data: vec![1, 2, 3],
        };
        let buf = encode(&content);
        assert_eq!(ContentRef::peek(&buf), Some(ContentRef::NoisemapByte));
        assert_eq!(Content::decode(&buf).unwrap(), content);
    }

    #[test]
    fn test_app_data_opaque() {
        let content = Content::AppData {
            kind: ContentRef::VitalSigns,
            data: vec![9, 8, 7],
        };
        assert_eq!(Content::decode(&encode(&content)).unwrap(), content);
    }

    #[test]
    fn test_encode_too_small() {
        let mut buf = [0u8; 6];
        assert!(Content::Error { code: 1 }.encode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_truncated() {
        let mut buf = encode(&Content::DataFloat {
            content_id: 1,
            info: 2,
            data: vec![1.0, 2.0],
        });
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            Content::decode(&buf),
            Err(DispatchError::Malformed(_))
        ));
    }
}
