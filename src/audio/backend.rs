use anyhow::Result;
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// PCM layout for capture or playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// What the encoder consumes: 16 kHz mono
    pub fn capture() -> Self {
        Self::new(16000, 1)
    }
}

/// Capture source and render sink for raw PCM.
///
/// Implementations:
/// - `WavFileDevice`: WAV file in, WAV file out (headless runs, tests)
/// - anything wrapping real hardware lives outside this crate
#[async_trait::async_trait]
pub trait AudioDevice: Send {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive frames in
    /// [`PcmFormat::capture`] layout
    async fn start_capture(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop_capture(&mut self) -> Result<()>;

    /// Set the layout of PCM passed to [`AudioDevice::play`]
    fn configure_playback(&mut self, format: PcmFormat) -> Result<()>;

    /// Queue decoded PCM for rendering
    fn play(&mut self, pcm: &[i16]) -> Result<()>;

    /// Stop rendering and drop anything queued
    fn stop_playback(&mut self) -> Result<()>;

    fn is_capturing(&self) -> bool;

    /// Get device name for logging
    fn name(&self) -> &str;
}
