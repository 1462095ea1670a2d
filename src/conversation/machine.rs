use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::events::{ChatEvent, MonotonicClock};
use super::state::{ConversationMode, ConversationState};
use crate::audio::{AudioDevice, AudioFrame, OpusCodec, PcmFormat, ENCODER_FRAME_SAMPLES};
use crate::error::{LinkError, LinkResult};
use crate::protocol::{AudioParams, ClientMessage, ServerMessage};

/// What the state machine needs from the session: the handle, readiness of
/// the media path, and the two send paths.
#[async_trait]
pub trait ControlLink: Send + Sync {
    fn session_id(&self) -> Option<String>;

    fn media_ready(&self) -> bool;

    async fn send_control(&self, message: &ClientMessage) -> LinkResult<()>;

    async fn send_audio(&self, opus: &[u8]) -> LinkResult<()>;
}

struct Segment {
    id: u64,
    text: String,
    started_ms: u64,
    pcm: Vec<i16>,
}

/// Idle / Listening / Speaking driven by user commands, server control
/// messages, captured PCM and received Opus frames.
pub struct ConversationMachine {
    state: ConversationState,
    mode: ConversationMode,
    codec: OpusCodec,
    device: Box<dyn AudioDevice>,
    capture: Option<mpsc::Receiver<AudioFrame>>,
    pending: Vec<i16>,
    segment: Option<Segment>,
    segments_opened: u64,
    playing: bool,
    clock: MonotonicClock,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl ConversationMachine {
    pub fn new(
        codec: OpusCodec,
        device: Box<dyn AudioDevice>,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> Self {
        Self {
            state: ConversationState::Idle,
            mode: ConversationMode::default(),
            codec,
            device,
            capture: None,
            pending: Vec::new(),
            segment: None,
            segments_opened: 0,
            playing: false,
            clock: MonotonicClock::new(),
            events,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn mode(&self) -> ConversationMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ConversationMode) {
        if self.mode != mode {
            info!("Conversation mode: {}", mode);
            self.mode = mode;
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Samples buffered toward the next encoder frame
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Apply server audio parameters to the decoder; returns whether it was rebuilt.
    ///
    /// Playback follows the new layout right away when the assistant is speaking.
    pub fn configure_decoder(&mut self, params: &AudioParams) -> LinkResult<bool> {
        let rebuilt = self.codec.configure_decoder(params)?;
        if rebuilt && self.state == ConversationState::Speaking {
            if let Err(e) = self.device.configure_playback(self.playback_format()) {
                warn!("Failed to reconfigure playback: {}", e);
            }
        }
        Ok(rebuilt)
    }

    /// Emit a human-readable notice to collaborators
    pub fn notify(&mut self, message: impl Into<String>) {
        let timestamp_ms = self.clock.now_ms();
        self.emit(ChatEvent::Status {
            message: message.into(),
            timestamp_ms,
        });
    }

    /// Idle → Listening
    pub async fn start_recording<L: ControlLink + ?Sized>(&mut self, link: &L) -> LinkResult<()> {
        match self.state {
            ConversationState::Listening => {
                debug!("Already listening");
                Ok(())
            }
            ConversationState::Speaking => Err(LinkError::InvalidState(
                "The assistant is speaking; abort it first".into(),
            )),
            ConversationState::Idle => self.enter_listening(link).await,
        }
    }

    /// Listening → Idle; a no-op in any other state
    pub async fn stop_recording<L: ControlLink + ?Sized>(&mut self, link: &L) -> LinkResult<()> {
        if self.state != ConversationState::Listening {
            debug!("stop_recording ignored in state {}", self.state);
            return Ok(());
        }

        info!("Stopping recording");
        self.stop_capture().await;
        self.pending.clear();
        self.set_state(ConversationState::Idle);

        match link.session_id() {
            Some(session) => link.send_control(&ClientMessage::listen_stop(&session)).await,
            None => Ok(()),
        }
    }

    /// Speaking → Listening, interrupting the assistant
    pub async fn abort_speaking<L: ControlLink + ?Sized>(&mut self, link: &L) -> LinkResult<()> {
        if self.state != ConversationState::Speaking {
            return Err(LinkError::InvalidState(
                "Nothing to abort: the assistant is not speaking".into(),
            ));
        }
        let session = link.session_id().ok_or(LinkError::NoSession)?;

        info!("Aborting speech");
        self.stop_playback();
        link.send_control(&ClientMessage::abort(&session, Some("user_interrupted")))
            .await?;

        if let Err(e) = self.enter_listening(link).await {
            self.set_state(ConversationState::Idle);
            return Err(e);
        }
        Ok(())
    }

    pub async fn send_text<L: ControlLink + ?Sized>(&mut self, link: &L, text: &str) -> LinkResult<()> {
        let session = link.session_id().ok_or(LinkError::NoSession)?;
        if text.trim().is_empty() {
            return Err(LinkError::InvalidState("Message is empty".into()));
        }

        link.send_control(&ClientMessage::Text {
            session_id: session,
            text: text.to_string(),
        })
        .await
    }

    /// Dispatch one JSON control message from the server
    pub async fn handle_control<L: ControlLink + ?Sized>(
        &mut self,
        link: &L,
        value: &Value,
    ) -> LinkResult<()> {
        match ServerMessage::parse(value) {
            ServerMessage::Stt { text, is_final } => {
                info!("STT: {} (final={})", text, is_final);
                if !text.is_empty() {
                    let timestamp_ms = self.clock.now_ms();
                    self.emit(ChatEvent::RecognizedText {
                        text,
                        is_final,
                        timestamp_ms,
                    });
                }
            }
            ServerMessage::Tts { state, text } => {
                if state.opens_segment() {
                    info!("TTS: {}", text);
                    self.open_segment(text).await;
                } else if state.closes_segment() {
                    self.complete_segment();
                } else {
                    debug!("Ignoring tts state {:?}", state);
                }
            }
            ServerMessage::Llm { emotion, .. } => {
                if let Some(emotion) = emotion {
                    info!("LLM emotion: {}", emotion);
                }
            }
            ServerMessage::System { action } if action == "audio_end" => {
                return self.audio_end(link).await;
            }
            ServerMessage::System { action } => debug!("Ignoring system action {}", action),
            ServerMessage::Goodbye => {
                info!("Server ended the session");
                self.session_ended().await;
            }
            ServerMessage::Iot(command) => debug!("IoT command: {}", command),
            // Only a hello that names its audio parameters changes the decoder
            ServerMessage::Hello(hello) if value.get("audio_params").is_some() => {
                if self.configure_decoder(&hello.audio_params)? {
                    info!(
                        "Server audio now {} Hz {} ch",
                        hello.audio_params.sample_rate, hello.audio_params.channels
                    );
                }
            }
            ServerMessage::Hello(_) | ServerMessage::Ping => {}
            ServerMessage::Other(other) => debug!("Unhandled control message: {}", other),
        }
        Ok(())
    }

    /// Decode one received Opus frame; ignored unless speaking
    pub fn handle_audio(&mut self, opus: &[u8]) {
        if self.state != ConversationState::Speaking {
            return;
        }

        let pcm = self.codec.decode(opus);
        if pcm.is_empty() {
            return;
        }

        if let Some(segment) = &mut self.segment {
            segment.pcm.extend_from_slice(&pcm);
        }

        self.playing = true;
        if let Err(e) = self.device.play(&pcm) {
            warn!("Playback failed on {}: {}", self.device.name(), e);
        }
    }

    /// Slice captured PCM into encoder frames and send them
    pub async fn handle_capture<L: ControlLink + ?Sized>(&mut self, link: &L, frame: AudioFrame) {
        if self.state != ConversationState::Listening {
            return;
        }

        let expected = PcmFormat::capture();
        if frame.sample_rate != expected.sample_rate || frame.channels != expected.channels {
            warn!(
                "Dropping capture frame in {} Hz/{} ch, encoder needs {} Hz/{} ch",
                frame.sample_rate, frame.channels, expected.sample_rate, expected.channels
            );
            return;
        }

        self.pending.extend_from_slice(&frame.samples);

        while self.pending.len() >= ENCODER_FRAME_SAMPLES {
            let block: Vec<i16> = self.pending.drain(..ENCODER_FRAME_SAMPLES).collect();
            let opus = match self.codec.encode(&block) {
                Ok(opus) => opus,
                Err(e) => {
                    warn!("Opus encode failed: {}", e);
                    continue;
                }
            };
            if let Err(e) = link.send_audio(&opus).await {
                if e.is_packet_level() {
                    debug!("Audio frame dropped: {}", e);
                } else {
                    warn!("Audio send failed: {}", e);
                }
            }
        }
    }

    /// Next captured frame; pending forever while not capturing
    pub async fn recv_capture(&mut self) -> Option<AudioFrame> {
        match &mut self.capture {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// The capture source ran dry; treat it like the user letting go
    pub async fn capture_ended<L: ControlLink + ?Sized>(&mut self, link: &L) -> LinkResult<()> {
        info!("Capture source on {} ended", self.device.name());
        self.capture = None;
        self.stop_recording(link).await
    }

    /// Transport gone: drop everything back to Idle
    pub async fn session_ended(&mut self) {
        self.stop_capture().await;
        self.pending.clear();
        self.stop_playback();
        self.complete_segment();
        self.set_state(ConversationState::Idle);
    }

    async fn enter_listening<L: ControlLink + ?Sized>(&mut self, link: &L) -> LinkResult<()> {
        let session = link.session_id().ok_or(LinkError::NoSession)?;
        if !link.media_ready() {
            return Err(LinkError::MediaNotReady);
        }

        if self.capture.is_none() {
            let rx = self
                .device
                .start_capture()
                .await
                .map_err(|e| LinkError::Device(e.to_string()))?;
            self.capture = Some(rx);
        }
        self.pending.clear();

        info!("Start listening (mode: {})", self.mode);
        if let Err(e) = link
            .send_control(&ClientMessage::listen_start(&session, self.mode))
            .await
        {
            self.stop_capture().await;
            return Err(e);
        }

        self.set_state(ConversationState::Listening);
        Ok(())
    }

    async fn open_segment(&mut self, text: String) {
        // A new sentence before the previous one closed still keeps its audio
        self.complete_segment();
        self.codec.reset_decoder_state();

        self.segments_opened += 1;
        let started_ms = self.clock.now_ms();
        self.segment = Some(Segment {
            id: self.segments_opened,
            text: text.clone(),
            started_ms,
            pcm: Vec::new(),
        });
        self.emit(ChatEvent::SegmentStarted {
            segment_id: self.segments_opened,
            text,
            started_ms,
        });

        if self.state != ConversationState::Speaking {
            self.stop_capture().await;
            self.pending.clear();

            if let Err(e) = self.device.configure_playback(self.playback_format()) {
                warn!("Failed to configure playback: {}", e);
            }
            self.set_state(ConversationState::Speaking);
        }
    }

    fn complete_segment(&mut self) {
        let Some(segment) = self.segment.take() else {
            return;
        };

        let timestamp_ms = self.clock.now_ms();
        debug!(
            "Segment {} complete: {} samples",
            segment.id,
            segment.pcm.len()
        );
        self.emit(ChatEvent::SegmentCompleted {
            segment_id: segment.id,
            text: segment.text,
            pcm: segment.pcm,
            sample_rate: self.codec.decoder_sample_rate(),
            channels: self.codec.decoder_channels(),
            started_ms: segment.started_ms,
            timestamp_ms,
        });
    }

    async fn audio_end<L: ControlLink + ?Sized>(&mut self, link: &L) -> LinkResult<()> {
        if self.state != ConversationState::Speaking {
            debug!("audio_end ignored in state {}", self.state);
            return Ok(());
        }

        self.stop_playback();
        self.complete_segment();

        if self.mode == ConversationMode::Auto {
            if let Err(e) = self.enter_listening(link).await {
                self.set_state(ConversationState::Idle);
                return Err(e);
            }
            Ok(())
        } else {
            self.set_state(ConversationState::Idle);
            Ok(())
        }
    }

    fn playback_format(&self) -> PcmFormat {
        PcmFormat::new(self.codec.decoder_sample_rate(), self.codec.decoder_channels())
    }

    async fn stop_capture(&mut self) {
        if self.capture.take().is_some() || self.device.is_capturing() {
            if let Err(e) = self.device.stop_capture().await {
                warn!("Failed to stop capture on {}: {}", self.device.name(), e);
            }
        }
    }

    fn stop_playback(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        if let Err(e) = self.device.stop_playback() {
            warn!("Failed to stop playback on {}: {}", self.device.name(), e);
        }
    }

    fn set_state(&mut self, state: ConversationState) {
        if self.state == state {
            return;
        }
        info!("Conversation state: {} -> {}", self.state, state);
        self.state = state;
        let timestamp_ms = self.clock.now_ms();
        self.emit(ChatEvent::StateChanged {
            state,
            timestamp_ms,
        });
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }
}
