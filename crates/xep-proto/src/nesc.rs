//! No-escape packets for bulk data.
//!
//! The sample data is already in the outgoing buffer; only the header is
//! written, directly in front of it. The link sends
//! `buffer[start..data_offset + data_len]` as is.

use crate::error::{McpError, McpResult};
use crate::mcp::{
    DataType, APPDATA_BASEBAND_AP, APPDATA_BASEBAND_IQ, APPDATA_NOISEMAP_BYTE,
    APPDATA_NOISEMAP_FLOAT, APPDATA_PD_BYTE, APPDATA_PD_FLOAT, RESP_APPDATA, RESP_DATA,
};
use std::ops::Range;

/// Token that opens a no-escape packet.
pub const NOESCAPE_FLAG: u32 = 0x7c7c_7c7c;

/// Flag, length and crc bytes.
pub const PREFIX_LEN: usize = 9;

/// Longest header [`inject`] can write.
pub const MAX_HEADER_LEN: usize = PREFIX_LEN + 57;

/// Record header of a no-escape packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoEscapeHeader {
    /// `[DATA, FLOAT, content_id, info, count]`
    DataFloat {
        /// Host-visible content id
        content_id: u32,
        /// Info word
        info: u32,
        /// Number of floats
        count: u32,
    },
    /// `[DATA, BYTE, content_id, info, count]`
    DataByte {
        /// Host-visible content id
        content_id: u32,
        /// Info word
        info: u32,
        /// Number of bytes
        count: u32,
    },
    /// `[APPDATA, id, counter, bins, bin_length, fs, fc, range_offset]`
    Baseband {
        /// IQ (`true`) or amplitude/phase
        iq: bool,
        /// Frame counter
        counter: u32,
        /// Number of bins
        num_bins: u32,
        /// Bin length in metres
        bin_length: f32,
        /// Sampling frequency
        sampling_frequency: f32,
        /// Carrier frequency
        carrier_frequency: f32,
        /// Range offset in metres
        range_offset: f32,
    },
    /// Pulse-Doppler or noise-map matrix row.
    PulseDoppler {
        /// Noise map instead of pulse-Doppler
        noisemap: bool,
        /// Quantisation for byte rows, `None` for float rows
        byte_step: Option<(f32, f32)>,
        /// Integer fields in wire order: counter, matrix_counter, range_idx,
        /// range_bins, freq_count, pd_instance
        ints: [u32; 6],
        /// Float fields in wire order: fps, fps_decimated, freq_start,
        /// freq_step, range
        floats: [f32; 5],
    },
}

impl NoEscapeHeader {
    /// Header length including the no-escape prefix.
    #[must_use]
    pub fn len(&self) -> usize {
        PREFIX_LEN
            + match self {
                Self::DataFloat { .. } | Self::DataByte { .. } => 14,
                Self::Baseband { .. } => 33,
                Self::PulseDoppler {
                    byte_step: None, ..
                } => 49,
                Self::PulseDoppler {
                    byte_step: Some(_),
                    ..
                } => 57,
            }
    }

    /// Always `false`; a header has at least the prefix.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    fn write(&self, payload_len: u32, out: &mut HeaderBuf) {
        out.u32(NOESCAPE_FLAG);
        out.u32(payload_len);
        out.u8(0);
        match *self {
            Self::DataFloat {
                content_id,
                info,
                count,
            } => {
                out.u8(RESP_DATA);
                out.u8(DataType::Float as u8);
                out.u32(content_id);
                out.u32(info);
                out.u32(count);
            }
            Self::DataByte {
                content_id,
                info,
                count,
            } => {
                out.u8(RESP_DATA);
                out.u8(DataType::Byte as u8);
                out.u32(content_id);
                out.u32(info);
                out.u32(count);
            }
            Self::Baseband {
                iq,
                counter,
                num_bins,
                bin_length,
                sampling_frequency,
                carrier_frequency,
                range_offset,
            } => {
                out.u8(RESP_APPDATA);
                out.u32(if iq {
                    APPDATA_BASEBAND_IQ
                } else {
                    APPDATA_BASEBAND_AP
                });
                out.u32(counter);
                out.u32(num_bins);
                out.f32(bin_length);
                out.f32(sampling_frequency);
                out.f32(carrier_frequency);
                out.f32(range_offset);
            }
            Self::PulseDoppler {
                noisemap,
                byte_step,
                ints,
                floats,
            } => {
                out.u8(RESP_APPDATA);
                out.u32(match (noisemap, byte_step.is_some()) {
                    (false, false) => APPDATA_PD_FLOAT,
                    (false, true) => APPDATA_PD_BYTE,
                    (true, false) => APPDATA_NOISEMAP_FLOAT,
                    (true, true) => APPDATA_NOISEMAP_BYTE,
                });
                for v in ints {
                    out.u32(v);
                }
                if let Some((step_start, step_size)) = byte_step {
                    out.f32(step_start);
                    out.f32(step_size);
                }
                for v in floats {
                    out.f32(v);
                }
            }
        }
    }
}

/// Write `header` immediately before `buf[data_offset..data_offset + data_len]`.
///
/// Returns the byte range of the complete packet.
pub fn inject(
    buf: &mut [u8],
    data_offset: usize,
    data_len: usize,
    header: &NoEscapeHeader,
) -> McpResult<Range<usize>> {
    let end = data_offset + data_len;
    if end > buf.len() {
        return Err(McpError::OutOfBounds {
            start: data_offset,
            end,
            len: buf.len(),
        });
    }

    let header_len = header.len();
    if data_offset < header_len {
        return Err(McpError::HeaderRoom {
            needed: header_len,
            available: data_offset,
        });
    }

    let payload_len = header_len - PREFIX_LEN + data_len;
    let mut out = HeaderBuf::default();
    header.write(
        u32::try_from(payload_len).unwrap_or(u32::MAX),
        &mut out,
    );
    debug_assert_eq!(out.len, header_len);

    let start = data_offset - header_len;
    buf[start..data_offset].copy_from_slice(&out.bytes[..out.len]);
    Ok(start..end)
}

struct HeaderBuf {
    bytes: [u8; MAX_HEADER_LEN],
    len: usize,
}

impl Default for HeaderBuf {
    fn default() -> Self {
        Self {
            bytes: [0; MAX_HEADER_LEN],
            len: 0,
        }
    }
}

impl HeaderBuf {
    fn put(&mut self, data: &[u8]) {
        self.bytes[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
    }

    fn u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    fn u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.put(&v.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_float_header() {
        let bins = 186usize;
        let data_offset = 64;
        let mut buf = vec![0u8; data_offset + bins * 4];
        let header = NoEscapeHeader::DataFloat {
            content_id: 0,
            info: 1,
            count: bins as u32,
        };

        let range = inject(&mut buf, data_offset, bins * 4, &header).unwrap();
        assert_eq!(range.end - range.start, 9 + 14 + 4 * bins);

        let packet = &buf[range];
        assert_eq!(&packet[0..4], &NOESCAPE_FLAG.to_le_bytes());
        assert_eq!(&packet[4..8], &((14 + 4 * bins) as u32).to_le_bytes());
        assert_eq!(packet[8], 0);
        assert_eq!(&packet[9..11], &[RESP_DATA, DataType::Float as u8]);
        assert_eq!(&packet[15..19], &1u32.to_le_bytes());
        assert_eq!(&packet[19..23], &(bins as u32).to_le_bytes());
    }

    #[test]
    fn test_pd_byte_field_order() {
        let mut buf = vec![0u8; 100];
        let header = NoEscapeHeader::PulseDoppler {
            noisemap: true,
            byte_step: Some((1.5, 2.5)),
            ints: [1, 2, 3, 4, 5, 6],
            floats: [10.0, 11.0, 12.0, 13.0, 14.0],
        };
        assert_eq!(header.len(), MAX_HEADER_LEN);

        let range = inject(&mut buf, 70, 5, &header).unwrap();
        let packet = &buf[range];
        assert_eq!(packet[9], RESP_APPDATA);
        assert_eq!(&packet[10..14], &APPDATA_NOISEMAP_BYTE.to_le_bytes());
        assert_eq!(&packet[34..38], &6u32.to_le_bytes());
        assert_eq!(&packet[38..42], &1.5f32.to_le_bytes());
        assert_eq!(&packet[46..50], &10.0f32.to_le_bytes());
    }

    #[test]
    fn test_header_room_too_small() {
        let mut buf = vec![0u8; 40];
        let header = NoEscapeHeader::DataByte {
            content_id: 1,
            info: 0,
            count: 4,
        };
        assert_eq!(
            inject(&mut buf, 10, 4, &header),
            Err(McpError::HeaderRoom {
                needed: 23,
                available: 10
            })
        );
    }

    #[test]
    fn test_data_out_of_bounds() {
        let mut buf = vec![0u8; 40];
        let header = NoEscapeHeader::DataByte {
            content_id: 1,
            info: 0,
            count: 40,
        };
        assert!(matches!(
            inject(&mut buf, 30, 40, &header),
            Err(McpError::OutOfBounds { .. })
        ));
    }
}
