//! Transport B: encrypted WebSocket carrying both control and media.

pub mod client;
pub mod framing;

pub use client::WebSocketTransport;
pub use framing::{decode_audio, encode_audio, ProtocolVersion};
