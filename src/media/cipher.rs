use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use tracing::{debug, warn};

use super::header::{AudioFrameHeader, HEADER_LEN, MEDIA_FRAME_TYPE};
use crate::error::PacketError;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Plaintext recovered from a media datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedPacket {
    pub timestamp: u32,
    pub sequence: u32,
    pub payload: Vec<u8>,
}

/// Per-packet AES-128-CTR for media datagrams.
///
/// Each packet's header is built from the session nonce with the payload
/// length, timestamp and sequence patched in, and those 16 header bytes are
/// the IV for that packet. Sequence state is per instance: clone one for
/// each direction.
#[derive(Clone)]
pub struct PacketCipher {
    key: [u8; 16],
    nonce: [u8; 16],
    local_sequence: u32,
    remote_sequence: u32,
}

impl PacketCipher {
    pub fn new(key_hex: &str, nonce_hex: &str) -> Result<Self, PacketError> {
        Ok(Self {
            key: decode_hex16(key_hex, "key")?,
            nonce: decode_hex16(nonce_hex, "nonce")?,
            local_sequence: 0,
            remote_sequence: 0,
        })
    }

    /// Stream id taken from nonce bytes 4..8
    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.nonce[4], self.nonce[5], self.nonce[6], self.nonce[7]])
    }

    pub fn local_sequence(&self) -> u32 {
        self.local_sequence
    }

    pub fn remote_sequence(&self) -> u32 {
        self.remote_sequence
    }

    pub fn reset_sequence(&mut self) {
        self.local_sequence = 0;
        self.remote_sequence = 0;
        debug!("Packet cipher sequence reset");
    }

    /// Encrypt one Opus frame; returns header + ciphertext
    pub fn encrypt(&mut self, payload: &[u8], timestamp: u32) -> Result<Vec<u8>, PacketError> {
        if payload.is_empty() {
            return Err(PacketError::EmptyPayload);
        }
        let payload_len =
            u16::try_from(payload.len()).map_err(|_| PacketError::PayloadTooLarge(payload.len()))?;

        self.local_sequence = self.local_sequence.wrapping_add(1);

        let mut header = self.nonce;
        header[2..4].copy_from_slice(&payload_len.to_be_bytes());
        header[8..12].copy_from_slice(&timestamp.to_be_bytes());
        header[12..16].copy_from_slice(&self.local_sequence.to_be_bytes());

        let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(payload);

        let mut cipher = Aes128Ctr::new(&self.key.into(), &header.into());
        cipher.apply_keystream(&mut packet[HEADER_LEN..]);

        Ok(packet)
    }

    /// Decrypt a received datagram using its own header bytes as the IV.
    ///
    /// Sequence gaps and payload-length disagreements are logged, not
    /// rejected. A zero length field means the peer left it unset.
    pub fn decrypt(&mut self, packet: &[u8]) -> Result<DecryptedPacket, PacketError> {
        let header = AudioFrameHeader::parse(packet)?;
        if header.kind != MEDIA_FRAME_TYPE {
            return Err(PacketError::WrongType(header.kind));
        }

        if self.remote_sequence > 0 && header.sequence != self.remote_sequence.wrapping_add(1) {
            warn!(
                "Media sequence gap: expected {}, got {}",
                self.remote_sequence.wrapping_add(1),
                header.sequence
            );
        }
        self.remote_sequence = header.sequence;

        let body = &packet[HEADER_LEN..];
        if header.payload_len != 0 && usize::from(header.payload_len) != body.len() {
            debug!(
                "Media payload length mismatch: header={}, actual={}",
                header.payload_len,
                body.len()
            );
        }

        let mut iv = [0u8; HEADER_LEN];
        iv.copy_from_slice(&packet[..HEADER_LEN]);

        let mut payload = body.to_vec();
        let mut cipher = Aes128Ctr::new(&self.key.into(), &iv.into());
        cipher.apply_keystream(&mut payload);

        Ok(DecryptedPacket {
            timestamp: header.timestamp,
            sequence: header.sequence,
            payload,
        })
    }
}

fn decode_hex16(input: &str, what: &str) -> Result<[u8; 16], PacketError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let padded;
    let digits = if digits.len() % 2 == 1 {
        padded = format!("0{}", digits);
        padded.as_str()
    } else {
        digits
    };

    let bytes = hex::decode(digits)
        .map_err(|e| PacketError::InvalidKey(format!("{} is not valid hex: {}", what, e)))?;

    <[u8; 16]>::try_from(bytes.as_slice()).map_err(|_| {
        PacketError::InvalidKey(format!("{} must be 16 bytes, got {}", what, bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "00112233445566778899aabbccddeeff";
    const NONCE: &str = "01000000aabbccdd0000000000000000";

    #[test]
    fn accepts_prefixed_and_padded_hex() {
        assert!(PacketCipher::new(&format!("  0x{}  ", KEY), NONCE).is_ok());
        assert!(PacketCipher::new(&KEY.to_uppercase(), NONCE).is_ok());
    }

    #[test]
    fn rejects_wrong_length_material() {
        assert!(matches!(
            PacketCipher::new("0011", NONCE),
            Err(PacketError::InvalidKey(_))
        ));
        assert!(matches!(
            PacketCipher::new(KEY, "zz"),
            Err(PacketError::InvalidKey(_))
        ));
    }

    #[test]
    fn ssrc_from_nonce() {
        let cipher = PacketCipher::new(KEY, NONCE).unwrap();
        assert_eq!(cipher.ssrc(), 0xaabbccdd);
    }

    #[test]
    fn rejects_empty_and_oversized_payloads() {
        let mut cipher = PacketCipher::new(KEY, NONCE).unwrap();
        assert_eq!(cipher.encrypt(&[], 0), Err(PacketError::EmptyPayload));
        assert_eq!(
            cipher.encrypt(&vec![0u8; 65536], 0),
            Err(PacketError::PayloadTooLarge(65536))
        );
        assert_eq!(cipher.local_sequence(), 0);
    }

    #[test]
    fn decrypt_uses_received_header_as_iv() {
        // A peer that leaves payload_len unset encrypts under that zeroed header
        let cipher = PacketCipher::new(KEY, NONCE).unwrap();
        let mut header = cipher.nonce;
        header[8..12].copy_from_slice(&42u32.to_be_bytes());
        header[12..16].copy_from_slice(&1u32.to_be_bytes());

        let mut body = b"opus-frame".to_vec();
        Aes128Ctr::new(&cipher.key.into(), &header.into()).apply_keystream(&mut body);
        let mut packet = header.to_vec();
        packet.extend_from_slice(&body);

        let mut rx = cipher.clone();
        let decrypted = rx.decrypt(&packet).unwrap();
        assert_eq!(decrypted.payload, b"opus-frame");
        assert_eq!(decrypted.timestamp, 42);
        assert_eq!(decrypted.sequence, 1);
    }

    #[test]
    fn sequence_gap_is_not_rejected() {
        let mut tx = PacketCipher::new(KEY, NONCE).unwrap();
        let mut rx = tx.clone();

        let first = tx.encrypt(b"one", 1).unwrap();
        let _lost = tx.encrypt(b"two", 2).unwrap();
        let third = tx.encrypt(b"three", 3).unwrap();

        assert_eq!(rx.decrypt(&first).unwrap().sequence, 1);
        let late = rx.decrypt(&third).unwrap();
        assert_eq!(late.sequence, 3);
        assert_eq!(late.payload, b"three");
        assert_eq!(rx.remote_sequence(), 3);
    }

    #[test]
    fn decrypt_rejects_wrong_type() {
        let mut tx = PacketCipher::new(KEY, NONCE).unwrap();
        let mut rx = tx.clone();
        let mut packet = tx.encrypt(b"abc", 1).unwrap();
        packet[0] = 0x02;

        assert_eq!(rx.decrypt(&packet), Err(PacketError::WrongType(0x02)));
    }
}
