//! Frame encoding/decoding
//!
//! Every frame on the link, in both directions, has the same fixed layout:
//!
//! - 1 byte: start marker (`0xA5`)
//! - 1 byte: command code (responses set bit 7 for a NACK)
//! - 4 bytes: yaw, `f32` little-endian
//! - 4 bytes: pitch, `f32` little-endian
//! - 1 byte: CRC-8 over start marker, command code and payload
//! - 1 byte: end marker (`0x5A`)
//!
//! The fixed length lets a receiver skip garbage and pick up the next frame.

use byteorder::{ByteOrder, LittleEndian};

use super::{
    commands::{Command, CommandTable},
    error::Axis,
    LinkError, END_BYTE, FRAME_LEN, NACK_FLAG, START_BYTE,
};
use crate::config::AngleLimits;

const CODE_OFFSET: usize = 1;
const YAW_OFFSET: usize = 2;
const PITCH_OFFSET: usize = 6;
const CRC_OFFSET: usize = 10;
const END_OFFSET: usize = 11;

/// A single decoded frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Raw command byte, including the NACK flag if set
    pub code: u8,
    /// Yaw in degrees
    pub yaw: f32,
    /// Pitch in degrees
    pub pitch: f32,
}

impl Frame {
    /// Encode the frame to its wire bytes
    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = START_BYTE;
        bytes[CODE_OFFSET] = self.code;
        LittleEndian::write_f32(&mut bytes[YAW_OFFSET..PITCH_OFFSET], self.yaw);
        LittleEndian::write_f32(&mut bytes[PITCH_OFFSET..CRC_OFFSET], self.pitch);
        bytes[CRC_OFFSET] = crc8(&bytes[..CRC_OFFSET]);
        bytes[END_OFFSET] = END_BYTE;
        bytes
    }

    /// Decode a frame from raw bytes
    ///
    /// Markers are checked before the checksum, so a corrupted marker is a
    /// framing error and any other corruption is a checksum error.
    pub fn from_bytes(data: &[u8]) -> Result<Self, LinkError> {
        if data.len() != FRAME_LEN {
            return Err(LinkError::FramingError(format!(
                "expected {} bytes, got {}",
                FRAME_LEN,
                data.len()
            )));
        }
        if data[0] != START_BYTE {
            return Err(LinkError::FramingError(format!(
                "missing start marker (got {:#04x})",
                data[0]
            )));
        }
        if data[END_OFFSET] != END_BYTE {
            return Err(LinkError::FramingError(format!(
                "missing end marker (got {:#04x})",
                data[END_OFFSET]
            )));
        }

        let expected = crc8(&data[..CRC_OFFSET]);
        let actual = data[CRC_OFFSET];
        if expected != actual {
            return Err(LinkError::ChecksumError { expected, actual });
        }

        Ok(Self {
            code: data[CODE_OFFSET],
            yaw: LittleEndian::read_f32(&data[YAW_OFFSET..PITCH_OFFSET]),
            pitch: LittleEndian::read_f32(&data[PITCH_OFFSET..CRC_OFFSET]),
        })
    }
}

/// Gimbal pose echoed back by the microcontroller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GimbalState {
    /// Current yaw in degrees
    pub yaw: f32,
    /// Current pitch in degrees
    pub pitch: f32,
}

/// Outcome of one acknowledged command
#[derive(Debug, Clone, PartialEq)]
pub struct AckResult {
    /// False if the microcontroller answered with a NACK
    pub success: bool,
    /// Echoed command code, NACK flag stripped
    pub code: u8,
    /// Echoed command, if the code is in the table
    pub command: Option<Command>,
    /// Echoed pose; `None` when the firmware reports NaN for "unknown"
    pub state: Option<GimbalState>,
}

/// Encodes commands and decodes responses using an injected command table
#[derive(Debug, Clone, Default)]
pub struct Codec {
    table: CommandTable,
    limits: Option<AngleLimits>,
}

impl Codec {
    /// Create a codec for the given table and optional angle limits
    pub fn new(table: CommandTable, limits: Option<AngleLimits>) -> Self {
        Self { table, limits }
    }

    /// The command table this codec encodes with
    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Check a command and pose without encoding it, returning the wire code
    pub fn validate(&self, command: Command, yaw: f32, pitch: f32) -> Result<u8, LinkError> {
        let code = self.table.code(command)?;
        check_axis(Axis::Yaw, yaw, self.limits.map(|l| l.yaw))?;
        check_axis(Axis::Pitch, pitch, self.limits.map(|l| l.pitch))?;
        Ok(code)
    }

    /// Encode a command frame
    pub fn encode(
        &self,
        command: Command,
        yaw: f32,
        pitch: f32,
    ) -> Result<[u8; FRAME_LEN], LinkError> {
        let code = self.validate(command, yaw, pitch)?;
        Ok(Frame { code, yaw, pitch }.to_bytes())
    }

    /// Decode a response frame
    pub fn decode(&self, data: &[u8]) -> Result<AckResult, LinkError> {
        let frame = Frame::from_bytes(data)?;
        let code = frame.code & !NACK_FLAG;
        let state = (frame.yaw.is_finite() && frame.pitch.is_finite()).then_some(GimbalState {
            yaw: frame.yaw,
            pitch: frame.pitch,
        });

        Ok(AckResult {
            success: frame.code & NACK_FLAG == 0,
            code,
            command: self.table.command(code),
            state,
        })
    }
}

fn check_axis(axis: Axis, value: f32, range: Option<(f32, f32)>) -> Result<(), LinkError> {
    let (min, max) = range.unwrap_or((f32::MIN, f32::MAX));
    if !value.is_finite() || value < min || value > max {
        return Err(LinkError::OutOfRange {
            axis,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// CRC-8 (polynomial 0x07, init 0x00, no reflection, no final xor)
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |mut crc, &byte| {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// Offset of the first start marker in `buf`, used to realign a misaligned read
pub fn start_offset(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == START_BYTE)
}
