//! Binary audio framing for the WebSocket transport.
//!
//! * v1: raw Opus bytes
//! * v2: 16-byte header `version:u16 | type:u16 | reserved:u32 | timestamp:u32 | payload_len:u32`
//! * v3: 4-byte header `type:u8 | reserved:u8 | payload_len:u16`
//!
//! All multi-byte fields are big-endian. Frames that fail validation are
//! dropped by the caller; they never close the connection.

use crate::error::FrameError;

pub const V2_HEADER_LEN: usize = 16;
pub const V3_HEADER_LEN: usize = 4;
pub const V2_MAX_PAYLOAD: usize = 1024 * 1024;
pub const V3_MAX_PAYLOAD: usize = u16::MAX as usize;

const OPUS_FRAME_TYPE: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1,
    V2,
    V3,
}

impl ProtocolVersion {
    /// Unknown versions fall back to raw frames
    pub fn from_number(version: u32) -> Self {
        match version {
            2 => ProtocolVersion::V2,
            3 => ProtocolVersion::V3,
            _ => ProtocolVersion::V1,
        }
    }

    pub fn number(self) -> u32 {
        match self {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
            ProtocolVersion::V3 => 3,
        }
    }

    pub fn header_len(self) -> usize {
        match self {
            ProtocolVersion::V1 => 0,
            ProtocolVersion::V2 => V2_HEADER_LEN,
            ProtocolVersion::V3 => V3_HEADER_LEN,
        }
    }

    pub fn max_payload(self) -> usize {
        match self {
            ProtocolVersion::V1 | ProtocolVersion::V2 => V2_MAX_PAYLOAD,
            ProtocolVersion::V3 => V3_MAX_PAYLOAD,
        }
    }
}

/// Wrap one Opus frame for the wire
pub fn encode_audio(
    version: ProtocolVersion,
    opus: &[u8],
    timestamp: u32,
) -> Result<Vec<u8>, FrameError> {
    if opus.is_empty() {
        return Err(FrameError::Empty);
    }
    if opus.len() > version.max_payload() {
        return Err(FrameError::ImplausibleLength(opus.len()));
    }

    let mut frame = Vec::with_capacity(version.header_len() + opus.len());
    match version {
        ProtocolVersion::V1 => {}
        ProtocolVersion::V2 => {
            frame.extend_from_slice(&2u16.to_be_bytes());
            frame.extend_from_slice(&u16::from(OPUS_FRAME_TYPE).to_be_bytes());
            frame.extend_from_slice(&0u32.to_be_bytes());
            frame.extend_from_slice(&timestamp.to_be_bytes());
            frame.extend_from_slice(&(opus.len() as u32).to_be_bytes());
        }
        ProtocolVersion::V3 => {
            frame.push(OPUS_FRAME_TYPE);
            frame.push(0);
            frame.extend_from_slice(&(opus.len() as u16).to_be_bytes());
        }
    }
    frame.extend_from_slice(opus);

    Ok(frame)
}

/// Extract the Opus payload from a received binary frame
pub fn decode_audio(version: ProtocolVersion, frame: &[u8]) -> Result<&[u8], FrameError> {
    if frame.is_empty() {
        return Err(FrameError::Empty);
    }

    let header_len = version.header_len();
    if frame.len() < header_len {
        return Err(FrameError::TooShort {
            expected: header_len,
            actual: frame.len(),
        });
    }

    let declared = match version {
        ProtocolVersion::V1 => return Ok(frame),
        ProtocolVersion::V2 => {
            u32::from_be_bytes([frame[12], frame[13], frame[14], frame[15]]) as usize
        }
        ProtocolVersion::V3 => u16::from_be_bytes([frame[2], frame[3]]) as usize,
    };

    if declared == 0 || declared > version.max_payload() {
        return Err(FrameError::ImplausibleLength(declared));
    }

    let body = &frame[header_len..];
    if body.len() != declared {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }

    Ok(body)
}
