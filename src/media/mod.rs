//! Encrypted datagram media path: frame header, packet cipher, UDP transport.

pub mod cipher;
pub mod header;
pub mod udp;

pub use cipher::{DecryptedPacket, PacketCipher};
pub use header::{AudioFrameHeader, HEADER_LEN, MEDIA_FRAME_TYPE};
pub use udp::MediaTransport;
