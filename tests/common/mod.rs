// Shared fakes for integration tests: an in-memory audio device and a
// control link that records what it was asked to send.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use voxlink::audio::{AudioDevice, AudioFrame, PcmFormat};
use voxlink::conversation::ControlLink;
use voxlink::error::{LinkError, LinkResult};
use voxlink::protocol::ClientMessage;

#[derive(Debug, Default)]
pub struct DeviceLog {
    pub capture_starts: usize,
    pub capture_stops: usize,
    pub capturing: bool,
    pub playback_format: Option<PcmFormat>,
    pub played: Vec<i16>,
    pub playback_stops: usize,
}

/// Audio device whose capture frames are pushed by the test
pub struct MemoryDevice {
    log: Arc<Mutex<DeviceLog>>,
    capture_tx: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

#[derive(Clone)]
pub struct MemoryDeviceProbe {
    pub log: Arc<Mutex<DeviceLog>>,
    capture_tx: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

impl MemoryDevice {
    pub fn new() -> (Self, MemoryDeviceProbe) {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let capture_tx = Arc::new(Mutex::new(None));
        let probe = MemoryDeviceProbe {
            log: log.clone(),
            capture_tx: capture_tx.clone(),
        };
        (Self { log, capture_tx }, probe)
    }
}

impl MemoryDeviceProbe {
    /// Push one capture frame; false when capture is not running
    pub async fn push(&self, samples: Vec<i16>, sample_rate: u32, channels: u16) -> bool {
        let tx = self.capture_tx.lock().clone();
        match tx {
            Some(tx) => tx
                .send(AudioFrame {
                    samples,
                    sample_rate,
                    channels,
                    timestamp_ms: 0,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Close the capture channel as a drained source would
    pub fn end_capture(&self) {
        self.capture_tx.lock().take();
    }
}

#[async_trait]
impl AudioDevice for MemoryDevice {
    async fn start_capture(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(16);
        *self.capture_tx.lock() = Some(tx);
        let mut log = self.log.lock();
        log.capture_starts += 1;
        log.capturing = true;
        Ok(rx)
    }

    async fn stop_capture(&mut self) -> Result<()> {
        self.capture_tx.lock().take();
        let mut log = self.log.lock();
        log.capture_stops += 1;
        log.capturing = false;
        Ok(())
    }

    fn configure_playback(&mut self, format: PcmFormat) -> Result<()> {
        self.log.lock().playback_format = Some(format);
        Ok(())
    }

    fn play(&mut self, pcm: &[i16]) -> Result<()> {
        self.log.lock().played.extend_from_slice(pcm);
        Ok(())
    }

    fn stop_playback(&mut self) -> Result<()> {
        self.log.lock().playback_stops += 1;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.log.lock().capturing
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Control link that records outgoing messages and audio
pub struct RecordingLink {
    pub session: Option<String>,
    pub media_ready: bool,
    pub sent: Mutex<Vec<ClientMessage>>,
    pub audio: Mutex<Vec<Vec<u8>>>,
}

impl RecordingLink {
    pub fn connected() -> Self {
        Self {
            session: Some("session-1".to_string()),
            media_ready: true,
            sent: Mutex::new(Vec::new()),
            audio: Mutex::new(Vec::new()),
        }
    }

    pub fn without_session() -> Self {
        Self {
            session: None,
            media_ready: false,
            ..Self::connected()
        }
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_types(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(ClientMessage::type_name).collect()
    }
}

#[async_trait]
impl ControlLink for RecordingLink {
    fn session_id(&self) -> Option<String> {
        self.session.clone()
    }

    fn media_ready(&self) -> bool {
        self.media_ready
    }

    async fn send_control(&self, message: &ClientMessage) -> LinkResult<()> {
        if self.session.is_none() {
            return Err(LinkError::NoSession);
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }

    async fn send_audio(&self, opus: &[u8]) -> LinkResult<()> {
        if !self.media_ready {
            return Err(LinkError::MediaNotReady);
        }
        self.audio.lock().push(opus.to_vec());
        Ok(())
    }
}
