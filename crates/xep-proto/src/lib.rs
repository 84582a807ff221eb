//! Wire codec for the host link.
//!
//! Two framings share the link:
//!
//! - **Escaped packets** for commands and small records:
//!   `START payload crc END`, where `START`/`END`/`ESC` bytes inside the
//!   payload or crc are prefixed with `ESC` and the crc is the XOR of `START`
//!   and every payload byte. Built with [`PacketBuilder`].
//! - **No-escape packets** for bulk numeric data:
//!   `u32 0x7c7c7c7c, u32 length, u8 crc(0), payload`. The header is written
//!   backwards into spare room in front of data that is already in place, see
//!   [`nesc::inject`].
//!
//! [`McpParser`] turns a byte stream back into packets, and [`Request`]
//! decodes host commands.

mod error;
pub mod mcp;
pub mod nesc;
mod parser;
mod request;

pub use error::{McpError, McpResult};
pub use mcp::{DataType, PacketBuilder, RecordKind};
pub use nesc::NoEscapeHeader;
pub use parser::{McpParser, ParserEvent};
pub use request::{direct, x4id, DirectCommand, Request, X4Parameter, X4Setting};
