use crate::mcp::{END, ESC, START};
use crate::nesc::NOESCAPE_FLAG;
use tracing::{debug, trace};

/// Outcome of feeding bytes to the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserEvent {
    /// A complete packet payload (escape bytes and crc removed).
    Packet(Vec<u8>),
    /// A packet failed its crc check and was dropped.
    CrcError,
    /// A new start flag arrived in the middle of a packet.
    LostBytes,
    /// A packet exceeded the buffer and was dropped.
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Escaped,
    NoEscape,
}

/// Byte-stream parser for both framings.
///
/// Outside a packet, four consecutive `0x7c` bytes switch the parser into
/// no-escape mode for exactly one packet.
#[derive(Debug)]
pub struct McpParser {
    buf: Vec<u8>,
    max_size: usize,
    mode: Mode,
    escaped: bool,
    flag_run: usize,
}

impl McpParser {
    /// Create a parser that accepts packets up to `max_size` bytes.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_size),
            max_size,
            mode: Mode::Idle,
            escaped: false,
            flag_run: 0,
        }
    }

    /// `true` while inside a no-escape packet.
    #[must_use]
    pub fn in_no_escape(&self) -> bool {
        self.mode == Mode::NoEscape
    }

    /// Feed received bytes; returns the events they completed.
    pub fn feed(&mut self, data: &[u8]) -> Vec<ParserEvent> {
        let mut events = Vec::new();
        for &byte in data {
            if let Some(event) = self.push(byte) {
                events.push(event);
            }
        }
        events
    }

    fn reset(&mut self, mode: Mode) {
        self.buf.clear();
        self.escaped = false;
        self.mode = mode;
    }

    fn push(&mut self, byte: u8) -> Option<ParserEvent> {
        match self.mode {
            Mode::NoEscape => self.push_no_escape(byte),
            Mode::Idle | Mode::Escaped => self.push_escaped(byte),
        }
    }

    fn push_no_escape(&mut self, byte: u8) -> Option<ParserEvent> {
        self.buf.push(byte);
        if self.buf.len() < 4 {
            return None;
        }

        // u32 length, u8 crc, then data
        let data_len =
            u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if data_len + 5 > self.max_size {
            debug!(data_len, max = self.max_size, "No-escape packet too large");
            self.reset(Mode::Idle);
            return Some(ParserEvent::Overflow);
        }
        if self.buf.len() == data_len + 5 {
            let packet = self.buf[5..].to_vec();
            self.reset(Mode::Idle);
            return Some(ParserEvent::Packet(packet));
        }
        None
    }

    fn push_escaped(&mut self, byte: u8) -> Option<ParserEvent> {
        let in_packet = self.mode == Mode::Escaped;

        if self.escaped {
            self.escaped = false;
            return in_packet.then(|| self.append(byte)).flatten();
        }

        if byte == NOESCAPE_FLAG.to_le_bytes()[0] {
            self.flag_run += 1;
        } else {
            self.flag_run = 0;
        }

        match byte {
            ESC => {
                self.escaped = true;
                None
            }
            START => {
                let lost = in_packet && !self.buf.is_empty();
                self.reset(Mode::Escaped);
                lost.then_some(ParserEvent::LostBytes)
            }
            END if in_packet => {
                let event = self.complete();
                self.reset(Mode::Idle);
                event
            }
            _ if in_packet => self.append(byte),
            _ => {
                if self.flag_run >= 4 {
                    trace!("No-escape flag detected");
                    self.flag_run = 0;
                    self.reset(Mode::NoEscape);
                }
                None
            }
        }
    }

    fn append(&mut self, byte: u8) -> Option<ParserEvent> {
        if self.buf.len() >= self.max_size {
            debug!(max = self.max_size, "Packet overflow");
            self.reset(Mode::Idle);
            return Some(ParserEvent::Overflow);
        }
        self.buf.push(byte);
        None
    }

    fn complete(&mut self) -> Option<ParserEvent> {
        let (&crc, payload) = self.buf.split_last()?;
        let computed = payload.iter().fold(START, |acc, b| acc ^ b);
        if computed != crc {
            debug!(computed, received = crc, "Packet crc mismatch");
            return Some(ParserEvent::CrcError);
        }
        Some(ParserEvent::Packet(payload.to_vec()))
    }
}

impl Default for McpParser {
    fn default() -> Self {
        Self::new(1024)
    }
}
