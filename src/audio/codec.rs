use opus::{Application, Bitrate, Channels, Decoder, Encoder};
use tracing::{debug, info};

use crate::error::CodecError;
use crate::protocol::AudioParams;

pub const ENCODER_SAMPLE_RATE: u32 = 16000;
pub const ENCODER_CHANNELS: u16 = 1;
pub const FRAME_DURATION_MS: u32 = 60;
/// 60 ms at 16 kHz mono
pub const ENCODER_FRAME_SAMPLES: usize = 960;
const ENCODER_BITRATE: i32 = 24_000;
const MAX_PACKET_BYTES: usize = 4000;
/// Per-channel decode ceiling (120 ms at 48 kHz fits)
const MAX_DECODE_SAMPLES: usize = 6000;

/// Opus encoder fixed at 16 kHz mono 60 ms, plus a decoder configured from
/// the server's parameters.
pub struct OpusCodec {
    encoder: Encoder,
    decoder: Decoder,
    decoder_rate: u32,
    decoder_channels: u16,
}

impl OpusCodec {
    pub fn new(server: &AudioParams) -> Result<Self, CodecError> {
        let mut encoder = Encoder::new(ENCODER_SAMPLE_RATE, Channels::Mono, Application::Voip)?;
        encoder.set_bitrate(Bitrate::Bits(ENCODER_BITRATE))?;

        let decoder = build_decoder(server.sample_rate, server.channels)?;

        info!(
            "Opus codec ready: encode {} Hz mono, decode {} Hz {} ch",
            ENCODER_SAMPLE_RATE, server.sample_rate, server.channels
        );

        Ok(Self {
            encoder,
            decoder,
            decoder_rate: server.sample_rate,
            decoder_channels: server.channels,
        })
    }

    pub fn frame_samples(&self) -> usize {
        ENCODER_FRAME_SAMPLES
    }

    pub fn decoder_sample_rate(&self) -> u32 {
        self.decoder_rate
    }

    pub fn decoder_channels(&self) -> u16 {
        self.decoder_channels
    }

    /// Encode exactly one 960-sample block
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, CodecError> {
        if pcm.len() != ENCODER_FRAME_SAMPLES {
            return Err(CodecError::FrameSize {
                expected: ENCODER_FRAME_SAMPLES,
                actual: pcm.len(),
            });
        }

        self.encoder
            .encode_vec(pcm, MAX_PACKET_BYTES)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode one frame; empty or corrupt input yields no samples
    pub fn decode(&mut self, frame: &[u8]) -> Vec<i16> {
        if frame.is_empty() {
            return Vec::new();
        }

        let channels = usize::from(self.decoder_channels.max(1));
        let mut pcm = vec![0i16; MAX_DECODE_SAMPLES * channels];
        match self.decoder.decode(frame, &mut pcm, false) {
            Ok(samples_per_channel) => {
                pcm.truncate(samples_per_channel * channels);
                pcm
            }
            Err(e) => {
                debug!("Dropping undecodable opus frame ({} bytes): {}", frame.len(), e);
                Vec::new()
            }
        }
    }

    /// Rebuild the decoder only when the rate actually changes.
    /// Returns whether a rebuild happened.
    pub fn set_decoder_sample_rate(&mut self, sample_rate: u32) -> Result<bool, CodecError> {
        if sample_rate == self.decoder_rate {
            return Ok(false);
        }

        self.decoder = build_decoder(sample_rate, self.decoder_channels)?;
        info!(
            "Opus decoder rebuilt: {} Hz -> {} Hz",
            self.decoder_rate, sample_rate
        );
        self.decoder_rate = sample_rate;
        Ok(true)
    }

    /// Apply new server parameters; rebuilds on a rate or channel change
    pub fn configure_decoder(&mut self, server: &AudioParams) -> Result<bool, CodecError> {
        if server.channels != self.decoder_channels {
            self.decoder = build_decoder(server.sample_rate, server.channels)?;
            self.decoder_rate = server.sample_rate;
            self.decoder_channels = server.channels;
            return Ok(true);
        }
        self.set_decoder_sample_rate(server.sample_rate)
    }

    /// Clear decoder history between synthesized segments
    pub fn reset_decoder_state(&mut self) {
        if let Err(e) = self.decoder.reset_state() {
            debug!("Opus decoder reset failed: {}", e);
        }
    }
}

fn build_decoder(sample_rate: u32, channels: u16) -> Result<Decoder, CodecError> {
    let layout = match channels {
        1 => Channels::Mono,
        2 => Channels::Stereo,
        other => {
            return Err(CodecError::Init(format!(
                "unsupported channel count {}",
                other
            )))
        }
    };
    Ok(Decoder::new(sample_rate, layout)?)
}
