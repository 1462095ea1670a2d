//! Error taxonomy for the device link.
//!
//! Errors fall into the categories the session layer reacts to differently:
//! resolution (bootstrap), handshake, connection, packet-level and
//! programming/invariant errors. Packet-level errors never tear a channel down.

use thiserror::Error;

pub type LinkResult<T> = std::result::Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Bootstrap HTTP exchange or response parsing failed
    #[error("bootstrap resolution failed: {0}")]
    Resolution(String),

    /// Credentials rejected, hello timeout, unsupported transport
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Socket/broker connection could not be established or was lost
    #[error("connection failed: {0}")]
    Connection(String),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("no active session")]
    NoSession,

    #[error("media channel is not ready")]
    MediaNotReady,

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Capture/render collaborator failed
    #[error("audio device error: {0}")]
    Device(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LinkError {
    /// Short human-readable status line for the UI collaborator
    pub fn status_text(&self) -> String {
        match self {
            LinkError::Resolution(msg) => format!("Could not reach the server: {}", msg),
            LinkError::Handshake(msg) => format!("Server handshake failed: {}", msg),
            LinkError::Connection(msg) => format!("Connection failed: {}", msg),
            LinkError::NoSession => "Session not established yet".to_string(),
            LinkError::MediaNotReady => {
                "Audio channel is still being set up, try again shortly".to_string()
            }
            LinkError::InvalidState(msg) => msg.clone(),
            LinkError::Device(msg) => format!("Audio device error: {}", msg),
            LinkError::Config(msg) => format!("Configuration error: {}", msg),
            other => other.to_string(),
        }
    }

    /// Packet-level errors are expected on a lossy media path
    pub fn is_packet_level(&self) -> bool {
        matches!(
            self,
            LinkError::Packet(_) | LinkError::Frame(_) | LinkError::Codec(CodecError::Decode(_))
        )
    }
}

/// Encrypted datagram errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("invalid cipher material: {0}")]
    InvalidKey(String),

    #[error("packet too short: {actual} bytes, need at least {expected}")]
    TooShort { expected: usize, actual: usize },

    #[error("unexpected packet type 0x{0:02x}")]
    WrongType(u8),

    #[error("payload of {0} bytes does not fit the header length field")]
    PayloadTooLarge(usize),

    #[error("empty payload")]
    EmptyPayload,
}

/// WebSocket binary framing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {actual} bytes, header needs {expected}")]
    TooShort { expected: usize, actual: usize },

    #[error("implausible payload length {0}")]
    ImplausibleLength(usize),

    #[error("declared payload length {declared} does not match {actual} remaining bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("empty frame")]
    Empty,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("pcm block has {actual} samples, encoder frame is {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("opus init failed: {0}")]
    Init(String),

    #[error("opus encode failed: {0}")]
    Encode(String),

    #[error("opus decode failed: {0}")]
    Decode(String),
}

impl From<opus::Error> for CodecError {
    fn from(e: opus::Error) -> Self {
        CodecError::Init(e.to_string())
    }
}
