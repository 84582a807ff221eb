use crate::error::{McpError, McpResult};

const CMD_PING: u8 = 0x01;
const CMD_START_BOOTLOADER: u8 = 0x02;
const CMD_MOD_RESET: u8 = 0x22;
const CMD_X4DRIVER: u8 = 0x50;
const CMD_DIR_COMMAND: u8 = 0x90;

const X4_SET: u8 = 0x10;
const X4_GET: u8 = 0x11;
const X4_INIT: u8 = 0x20;

/// X4 parameter ids shared by set and get.
#[allow(missing_docs)]
pub mod x4id {
    pub const FPS: u32 = 0x10;
    pub const PULSES_PER_STEP: u32 = 0x11;
    pub const ITERATIONS: u32 = 0x12;
    pub const DOWNCONVERSION: u32 = 0x13;
    pub const FRAME_AREA: u32 = 0x14;
    pub const DAC_STEP: u32 = 0x15;
    pub const DAC_MIN: u32 = 0x16;
    pub const DAC_MAX: u32 = 0x17;
    pub const FRAME_AREA_OFFSET: u32 = 0x18;
    pub const ENABLE: u32 = 0x19;
    pub const TX_CENTER_FREQUENCY: u32 = 0x20;
    pub const TX_POWER: u32 = 0x21;
    pub const SPI_REGISTER: u32 = 0x22;
    pub const PIF_REGISTER: u32 = 0x23;
    pub const XIF_REGISTER: u32 = 0x24;
    pub const PRF_DIV: u32 = 0x25;
    pub const FRAME_BIN_COUNT: u32 = 0x26;
}

/// Direct command sub-codes.
#[allow(missing_docs)]
pub mod direct {
    pub const SYSTEM_TEST: u8 = 0x50;
    pub const GET_SYSTEM_INFO: u8 = 0x58;
    pub const GET_CRASH_DUMP_LENGTH: u8 = 0x61;
    pub const CLEAR_CRASH_DUMP: u8 = 0x62;
    pub const GET_CRASH_DUMP: u8 = 0x63;
    pub const SEARCH_FILE_TYPE: u8 = 0x64;
    pub const FIND_ALL_FILES: u8 = 0x65;
    pub const CREATE_NEW_FILE: u8 = 0x66;
    pub const SET_FILE_DATA: u8 = 0x67;
    pub const CLOSE_FILE: u8 = 0x68;
    pub const GET_FILE_LENGTH: u8 = 0x69;
    pub const DELETE_FILE: u8 = 0x70;
    pub const GET_FILE_DATA: u8 = 0x71;
    pub const OPEN_FILE: u8 = 0x72;
    pub const FORMAT_FILESYSTEM: u8 = 0x73;
    pub const SET_BAUDRATE: u8 = 0x80;
}

/// Value written by an X4 driver set command.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub enum X4Setting {
    Fps(f32),
    PulsesPerStep(u32),
    Iterations(u32),
    Downconversion(u8),
    FrameArea { start: f32, end: f32 },
    DacStep(u32),
    DacMin(u32),
    DacMax(u32),
    FrameAreaOffset(f32),
    Enable(u8),
    TxCenterFrequency(u8),
    TxPower(u8),
    SpiRegister { address: u8, value: u8 },
    PifRegister { address: u8, value: u8 },
    XifRegister { address: u8, value: u8 },
    PrfDiv(u8),
}

/// Value read by an X4 driver get command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum X4Parameter {
    Fps,
    PulsesPerStep,
    Iterations,
    Downconversion,
    FrameArea,
    DacStep,
    DacMin,
    DacMax,
    FrameAreaOffset,
    TxCenterFrequency,
    TxPower,
    SpiRegister { address: u8 },
    PifRegister { address: u8 },
    XifRegister { address: u8 },
    PrfDiv,
    FrameBinCount,
}

impl X4Parameter {
    /// Wire id, echoed as the reply content id.
    #[must_use]
    pub fn id(self) -> u32 {
        match self {
            Self::Fps => x4id::FPS,
            Self::PulsesPerStep => x4id::PULSES_PER_STEP,
            Self::Iterations => x4id::ITERATIONS,
            Self::Downconversion => x4id::DOWNCONVERSION,
            Self::FrameArea => x4id::FRAME_AREA,
            Self::DacStep => x4id::DAC_STEP,
            Self::DacMin => x4id::DAC_MIN,
            Self::DacMax => x4id::DAC_MAX,
            Self::FrameAreaOffset => x4id::FRAME_AREA_OFFSET,
            Self::TxCenterFrequency => x4id::TX_CENTER_FREQUENCY,
            Self::TxPower => x4id::TX_POWER,
            Self::SpiRegister { .. } => x4id::SPI_REGISTER,
            Self::PifRegister { .. } => x4id::PIF_REGISTER,
            Self::XifRegister { .. } => x4id::XIF_REGISTER,
            Self::PrfDiv => x4id::PRF_DIV,
            Self::FrameBinCount => x4id::FRAME_BIN_COUNT,
        }
    }
}

/// Direct (system-level) commands.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DirectCommand {
    SetBaudrate { baudrate: u32 },
    SystemTest { code: u8 },
    GetSystemInfo { code: u8 },
    GetCrashDumpLength,
    ClearCrashDump,
    GetCrashDump { offset: u32, length: u32 },
    SearchFileType { file_type: u32 },
    FindAllFiles,
    CreateNewFile { file_type: u32, identifier: u32, length: u32 },
    SetFileData { file_type: u32, identifier: u32, offset: u32, data: Vec<u8> },
    CloseFile { file_type: u32, identifier: u32, commit: bool },
    GetFileLength { file_type: u32, identifier: u32 },
    DeleteFile { file_type: u32, identifier: u32 },
    GetFileData { file_type: u32, identifier: u32, offset: u32, length: u32 },
    OpenFile { file_type: u32, identifier: u32 },
    FormatFilesystem { key: u32 },
}

impl DirectCommand {
    /// Sub-code on the wire.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Self::SetBaudrate { .. } => direct::SET_BAUDRATE,
            Self::SystemTest { .. } => direct::SYSTEM_TEST,
            Self::GetSystemInfo { .. } => direct::GET_SYSTEM_INFO,
            Self::GetCrashDumpLength => direct::GET_CRASH_DUMP_LENGTH,
            Self::ClearCrashDump => direct::CLEAR_CRASH_DUMP,
            Self::GetCrashDump { .. } => direct::GET_CRASH_DUMP,
            Self::SearchFileType { .. } => direct::SEARCH_FILE_TYPE,
            Self::FindAllFiles => direct::FIND_ALL_FILES,
            Self::CreateNewFile { .. } => direct::CREATE_NEW_FILE,
            Self::SetFileData { .. } => direct::SET_FILE_DATA,
            Self::CloseFile { .. } => direct::CLOSE_FILE,
            Self::GetFileLength { .. } => direct::GET_FILE_LENGTH,
            Self::DeleteFile { .. } => direct::DELETE_FILE,
            Self::GetFileData { .. } => direct::GET_FILE_DATA,
            Self::OpenFile { .. } => direct::OPEN_FILE,
            Self::FormatFilesystem { .. } => direct::FORMAT_FILESYSTEM,
        }
    }
}

/// A decoded host command.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Liveness check
    Ping {
        /// Echo value
        value: u32,
    },
    /// Jump to the bootloader
    StartBootloader {
        /// Guard key
        key: u32,
    },
    /// Reset the module
    ModuleReset,
    /// System-level command
    Direct(DirectCommand),
    /// Initialise the radar chip
    X4Init,
    /// Write a radar setting
    X4Set(X4Setting),
    /// Read a radar setting
    X4Get(X4Parameter),
    /// Anything the firmware does not implement
    Unknown {
        /// Command byte
        command: u8,
    },
}

impl Request {
    /// Decode a packet payload.
    ///
    /// Unknown command bytes and sub-commands decode to [`Request::Unknown`];
    /// truncated fields are an error.
    pub fn parse(payload: &[u8]) -> McpResult<Self> {
        let mut r = Reader::new(payload);
        let command = r.u8().map_err(|_| McpError::Empty)?;
        Ok(match command {
            CMD_PING => Self::Ping { value: r.u32()? },
            CMD_START_BOOTLOADER => Self::StartBootloader { key: r.u32()? },
            CMD_MOD_RESET => Self::ModuleReset,
            CMD_DIR_COMMAND => match parse_direct(&mut r)? {
                Some(direct) => Self::Direct(direct),
                None => Self::Unknown { command },
            },
            CMD_X4DRIVER => match r.u8()? {
                X4_INIT => Self::X4Init,
                X4_SET => match parse_x4_set(&mut r)? {
                    Some(setting) => Self::X4Set(setting),
                    None => Self::Unknown { command },
                },
                X4_GET => match parse_x4_get(&mut r)? {
                    Some(parameter) => Self::X4Get(parameter),
                    None => Self::Unknown { command },
                },
                _ => Self::Unknown { command },
            },
            _ => Self::Unknown { command },
        })
    }
}

fn parse_direct(r: &mut Reader<'_>) -> McpResult<Option<DirectCommand>> {
    use DirectCommand::*;
    Ok(Some(match r.u8()? {
        direct::SET_BAUDRATE => SetBaudrate { baudrate: r.u32()? },
        direct::SYSTEM_TEST => SystemTest { code: r.u8()? },
        direct::GET_SYSTEM_INFO => GetSystemInfo { code: r.u8()? },
        direct::GET_CRASH_DUMP_LENGTH => GetCrashDumpLength,
        direct::CLEAR_CRASH_DUMP => ClearCrashDump,
        direct::GET_CRASH_DUMP => GetCrashDump {
            offset: r.u32()?,
            length: r.u32()?,
        },
        direct::SEARCH_FILE_TYPE => SearchFileType {
            file_type: r.u32()?,
        },
        direct::FIND_ALL_FILES => FindAllFiles,
        direct::CREATE_NEW_FILE => CreateNewFile {
            file_type: r.u32()?,
            identifier: r.u32()?,
            length: r.u32()?,
        },
        direct::SET_FILE_DATA => {
            let file_type = r.u32()?;
            let identifier = r.u32()?;
            let offset = r.u32()?;
            let len = r.u32()? as usize;
            SetFileData {
                file_type,
                identifier,
                offset,
                data: r.bytes(len)?.to_vec(),
            }
        }
        direct::CLOSE_FILE => CloseFile {
            file_type: r.u32()?,
            identifier: r.u32()?,
            commit: r.u32()? != 0,
        },
        direct::GET_FILE_LENGTH => GetFileLength {
            file_type: r.u32()?,
            identifier: r.u32()?,
        },
        direct::DELETE_FILE => DeleteFile {
            file_type: r.u32()?,
            identifier: r.u32()?,
        },
        direct::GET_FILE_DATA => GetFileData {
            file_type: r.u32()?,
            identifier: r.u32()?,
            offset: r.u32()?,
            length: r.u32()?,
        },
        direct::OPEN_FILE => OpenFile {
            file_type: r.u32()?,
            identifier: r.u32()?,
        },
        direct::FORMAT_FILESYSTEM => FormatFilesystem { key: r.u32()? },
        _ => return Ok(None),
    }))
}

fn parse_x4_set(r: &mut Reader<'_>) -> McpResult<Option<X4Setting>> {
    use X4Setting::*;
    Ok(Some(match r.u32()? {
        x4id::FPS => Fps(r.f32()?),
        x4id::PULSES_PER_STEP => PulsesPerStep(r.u32()?),
        x4id::ITERATIONS => Iterations(r.u32()?),
        x4id::DOWNCONVERSION => Downconversion(r.u8()?),
        x4id::FRAME_AREA => FrameArea {
            start: r.f32()?,
            end: r.f32()?,
        },
        x4id::DAC_STEP => DacStep(r.u32()?),
        x4id::DAC_MIN => DacMin(r.u32()?),
        x4id::DAC_MAX => DacMax(r.u32()?),
        x4id::FRAME_AREA_OFFSET => FrameAreaOffset(r.f32()?),
        x4id::ENABLE => Enable(r.u8()?),
        x4id::TX_CENTER_FREQUENCY => TxCenterFrequency(r.u8()?),
        x4id::TX_POWER => TxPower(r.u8()?),
        x4id::SPI_REGISTER => SpiRegister {
            address: r.u8()?,
            value: r.u8()?,
        },
        x4id::PIF_REGISTER => PifRegister {
            address: r.u8()?,
            value: r.u8()?,
        },
        x4id::XIF_REGISTER => XifRegister {
            address: r.u8()?,
            value: r.u8()?,
        },
        x4id::PRF_DIV => PrfDiv(r.u8()?),
        _ => return Ok(None),
    }))
}

fn parse_x4_get(r: &mut Reader<'_>) -> McpResult<Option<X4Parameter>> {
    use X4Parameter::*;
    Ok(Some(match r.u32()? {
        x4id::FPS => Fps,
        x4id::PULSES_PER_STEP => PulsesPerStep,
        x4id::ITERATIONS => Iterations,
        x4id::DOWNCONVERSION => Downconversion,
        x4id::FRAME_AREA => FrameArea,
        x4id::DAC_STEP => DacStep,
        x4id::DAC_MIN => DacMin,
        x4id::DAC_MAX => DacMax,
        x4id::FRAME_AREA_OFFSET => FrameAreaOffset,
        x4id::TX_CENTER_FREQUENCY => TxCenterFrequency,
        x4id::TX_POWER => TxPower,
        x4id::SPI_REGISTER => SpiRegister { address: r.u8()? },
        x4id::PIF_REGISTER => PifRegister { address: r.u8()? },
        x4id::XIF_REGISTER => XifRegister { address: r.u8()? },
        x4id::PRF_DIV => PrfDiv,
        x4id::FRAME_BIN_COUNT => FrameBinCount,
        _ => return Ok(None),
    }))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> McpResult<&'a [u8]> {
        let out = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or(McpError::Truncated {
                offset: self.pos,
                needed: len,
            })?;
        self.pos += len;
        Ok(out)
    }

    fn u8(&mut self) -> McpResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> McpResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> McpResult<f32> {
        Ok(f32::from_bits(self.u32()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    #[test]
    fn test_parse_ping() {
        let p = packet(&[&[CMD_PING], &0xeeaa_eaaeu32.to_le_bytes()]);
        assert_eq!(
            Request::parse(&p).unwrap(),
            Request::Ping { value: 0xeeaa_eaae }
        );
    }

    #[test]
    fn test_parse_set_fps() {
        let p = packet(&[
            &[CMD_X4DRIVER, X4_SET],
            &x4id::FPS.to_le_bytes(),
            &17.0f32.to_le_bytes(),
        ]);
        assert_eq!(
            Request::parse(&p).unwrap(),
            Request::X4Set(X4Setting::Fps(17.0))
        );
    }

    #[test]
    fn test_parse_get_register() {
        let p = packet(&[
            &[CMD_X4DRIVER, X4_GET],
            &x4id::XIF_REGISTER.to_le_bytes(),
            &[0x3a],
        ]);
        assert_eq!(
            Request::parse(&p).unwrap(),
            Request::X4Get(X4Parameter::XifRegister { address: 0x3a })
        );
    }

    #[test]
    fn test_parse_set_file_data() {
        let p = packet(&[
            &[CMD_DIR_COMMAND, direct::SET_FILE_DATA],
            &0x8000_0000u32.to_le_bytes(),
            &7u32.to_le_bytes(),
            &4u32.to_le_bytes(),
            &3u32.to_le_bytes(),
            &[1, 2, 3],
        ]);
        assert_eq!(
            Request::parse(&p).unwrap(),
            Request::Direct(DirectCommand::SetFileData {
                file_type: 0x8000_0000,
                identifier: 7,
                offset: 4,
                data: vec![1, 2, 3],
            })
        );
    }

    #[test]
    fn test_unknown_commands() {
        assert_eq!(
            Request::parse(&[0x42]).unwrap(),
            Request::Unknown { command: 0x42 }
        );
        assert_eq!(
            Request::parse(&[CMD_DIR_COMMAND, 0x01]).unwrap(),
            Request::Unknown {
                command: CMD_DIR_COMMAND
            }
        );
        let p = packet(&[&[CMD_X4DRIVER, X4_GET], &0x99u32.to_le_bytes()]);
        assert_eq!(
            Request::parse(&p).unwrap(),
            Request::Unknown {
                command: CMD_X4DRIVER
            }
        );
    }

    #[test]
    fn test_truncated() {
        assert_eq!(Request::parse(&[]), Err(McpError::Empty));
        assert!(matches!(
            Request::parse(&[CMD_PING, 1, 2]),
            Err(McpError::Truncated { offset: 1, needed: 4 })
        ));
    }
}
