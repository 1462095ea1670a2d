use crate::error::PacketError;

/// Type byte carried by every media datagram
pub const MEDIA_FRAME_TYPE: u8 = 0x01;

/// Wire size of [`AudioFrameHeader`]
pub const HEADER_LEN: usize = 16;

/// 16-byte media datagram header; its wire bytes double as the CTR IV.
///
/// Layout (multi-byte fields big-endian):
///
/// | offset | size | field       |
/// |--------|------|-------------|
/// | 0      | 1    | type        |
/// | 1      | 1    | flags       |
/// | 2      | 2    | payload_len |
/// | 4      | 4    | ssrc        |
/// | 8      | 4    | timestamp   |
/// | 12     | 4    | sequence    |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFrameHeader {
    pub kind: u8,
    pub flags: u8,
    pub payload_len: u16,
    pub ssrc: u32,
    pub timestamp: u32,
    pub sequence: u32,
}

impl AudioFrameHeader {
    /// Decode the first 16 bytes of `buf`
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TooShort {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }

        Ok(Self {
            kind: buf[0],
            flags: buf[1],
            payload_len: u16::from_be_bytes([buf[2], buf[3]]),
            ssrc: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            timestamp: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            sequence: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.kind;
        out[1] = self.flags;
        out[2..4].copy_from_slice(&self.payload_len.to_be_bytes());
        out[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        out[8..12].copy_from_slice(&self.timestamp.to_be_bytes());
        out[12..16].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }

    pub fn is_media(&self) -> bool {
        self.kind == MEDIA_FRAME_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_big_endian_fields() {
        let bytes = [
            0x01, 0x00, 0x00, 0x0a, 0xaa, 0xbb, 0xcc, 0xdd, 0x00, 0x00, 0x03, 0xe8, 0x00, 0x00,
            0x00, 0x07,
        ];
        let header = AudioFrameHeader::parse(&bytes).unwrap();

        assert!(header.is_media());
        assert_eq!(header.payload_len, 10);
        assert_eq!(header.ssrc, 0xaabbccdd);
        assert_eq!(header.timestamp, 1000);
        assert_eq!(header.sequence, 7);
        assert_eq!(header.to_bytes(), bytes);
    }

    #[test]
    fn parse_rejects_short_buffer() {
        assert_eq!(
            AudioFrameHeader::parse(&[0x01; 15]),
            Err(PacketError::TooShort {
                expected: 16,
                actual: 15
            })
        );
    }
}
