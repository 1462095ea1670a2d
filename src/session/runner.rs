use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::orchestrator::SessionOrchestrator;
use super::transport::{TransportEvent, TransportKind};
use crate::audio::{MessageStore, SegmentAudio};
use crate::conversation::{ChatEvent, ConversationMachine, ConversationMode, ConversationState};
use crate::error::{LinkError, LinkResult};
use crate::protocol::ServerMessage;

const COMMAND_CAPACITY: usize = 32;
const CHAT_EVENT_CAPACITY: usize = 128;

/// What a user (CLI, HTTP) can ask of a running session
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    StartRecording,
    StopRecording,
    AbortSpeaking,
    SetMode(ConversationMode),
    SendText(String),
    Shutdown,
}

struct CommandRequest {
    command: UserCommand,
    reply: oneshot::Sender<LinkResult<()>>,
}

/// Point-in-time view of the conversation for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSnapshot {
    pub state: ConversationState,
    pub mode: ConversationMode,
    pub session_id: Option<String>,
    pub transport: Option<TransportKind>,
    pub capturing: bool,
    pub playing: bool,
    pub device: String,
}

/// Cloneable handle for driving a `SessionRunner` from other tasks
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::Sender<CommandRequest>,
    chat_events: broadcast::Sender<ChatEvent>,
}

impl SessionController {
    pub async fn start_recording(&self) -> LinkResult<()> {
        self.request(UserCommand::StartRecording).await
    }

    pub async fn stop_recording(&self) -> LinkResult<()> {
        self.request(UserCommand::StopRecording).await
    }

    pub async fn abort_speaking(&self) -> LinkResult<()> {
        self.request(UserCommand::AbortSpeaking).await
    }

    pub async fn set_mode(&self, mode: ConversationMode) -> LinkResult<()> {
        self.request(UserCommand::SetMode(mode)).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> LinkResult<()> {
        self.request(UserCommand::SendText(text.into())).await
    }

    /// Say goodbye and stop the runner loop
    pub async fn shutdown(&self) -> LinkResult<()> {
        self.request(UserCommand::Shutdown).await
    }

    /// Chat events (recognized text, segments, state changes, notices)
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.chat_events.subscribe()
    }

    pub async fn request(&self, command: UserCommand) -> LinkResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(CommandRequest { command, reply })
            .await
            .map_err(|_| LinkError::InvalidState("Session has shut down".into()))?;
        response
            .await
            .map_err(|_| LinkError::InvalidState("Session has shut down".into()))?
    }
}

/// Single consumer of user commands, transport events and captured audio.
///
/// All conversation transitions happen on this loop, so the machine and the
/// orchestrator never see concurrent callers.
pub struct SessionRunner {
    orchestrator: SessionOrchestrator,
    machine: ConversationMachine,
    commands: mpsc::Receiver<CommandRequest>,
    machine_events: mpsc::UnboundedReceiver<ChatEvent>,
    chat_events: broadcast::Sender<ChatEvent>,
    snapshots: watch::Sender<ConversationSnapshot>,
    store: Option<Arc<dyn MessageStore>>,
    device_id: String,
}

impl SessionRunner {
    /// `machine_events` is the receiving end of the channel the machine emits on
    pub fn new(
        orchestrator: SessionOrchestrator,
        machine: ConversationMachine,
        machine_events: mpsc::UnboundedReceiver<ChatEvent>,
    ) -> (Self, SessionController) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (chat_events, _) = broadcast::channel(CHAT_EVENT_CAPACITY);
        let device_id = orchestrator.identity().mac_address().to_string();
        let (snapshots, _) = watch::channel(snapshot_of(&orchestrator, &machine));

        let controller = SessionController {
            commands: commands_tx,
            chat_events: chat_events.clone(),
        };

        let runner = Self {
            orchestrator,
            machine,
            commands,
            machine_events,
            chat_events,
            snapshots,
            store: None,
            device_id,
        };
        (runner, controller)
    }

    /// Persist final recognized text and completed speech segments
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn snapshots(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshots.subscribe()
    }

    pub async fn run(mut self) {
        info!(
            "Session runner started (device {}, audio device {})",
            self.device_id,
            self.machine.device_name()
        );
        self.publish();

        loop {
            let keep_going = tokio::select! {
                request = self.commands.recv() => match request {
                    Some(request) => self.handle_command(request).await,
                    None => {
                        info!("All controllers dropped");
                        self.shutdown().await;
                        false
                    }
                },
                event = self.orchestrator.next_event() => {
                    self.handle_transport_event(event).await;
                    true
                }
                frame = self.machine.recv_capture() => {
                    match frame {
                        Some(frame) => self.machine.handle_capture(&self.orchestrator, frame).await,
                        None => {
                            if let Err(e) = self.machine.capture_ended(&self.orchestrator).await {
                                warn!("Failed to stop after capture ended: {}", e);
                                self.machine.notify(e.status_text());
                            }
                        }
                    }
                    true
                }
            };

            self.forward_chat_events();
            self.publish();

            if !keep_going {
                break;
            }
        }

        info!("Session runner stopped");
    }

    async fn handle_command(&mut self, request: CommandRequest) -> bool {
        let CommandRequest { command, reply } = request;
        debug!("User command: {:?}", command);

        let mut keep_going = true;
        let result = match command {
            UserCommand::StartRecording => self.machine.start_recording(&self.orchestrator).await,
            UserCommand::StopRecording => self.machine.stop_recording(&self.orchestrator).await,
            UserCommand::AbortSpeaking => self.machine.abort_speaking(&self.orchestrator).await,
            UserCommand::SetMode(mode) => {
                self.machine.set_mode(mode);
                Ok(())
            }
            UserCommand::SendText(text) => self.machine.send_text(&self.orchestrator, &text).await,
            UserCommand::Shutdown => {
                self.shutdown().await;
                keep_going = false;
                Ok(())
            }
        };

        if let Err(e) = &result {
            warn!("Command failed: {}", e);
            self.machine.notify(e.status_text());
        }
        let _ = reply.send(result);
        keep_going
    }

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Control(value)) => {
                let goodbye = matches!(ServerMessage::parse(&value), ServerMessage::Goodbye);
                if let Err(e) = self.machine.handle_control(&self.orchestrator, &value).await {
                    warn!("Control message handling failed: {}", e);
                    self.machine.notify(e.status_text());
                }
                if goodbye {
                    self.orchestrator.teardown().await;
                    self.machine.notify("The server ended the session");
                }
            }
            Some(TransportEvent::Audio(opus)) => self.machine.handle_audio(&opus),
            Some(TransportEvent::Disconnected { clean }) => {
                let retrying = !clean && self.orchestrator.transport_kind() == Some(TransportKind::MqttUdp);
                self.machine.session_ended().await;
                if retrying {
                    self.machine.notify("Connection lost, reconnecting");
                } else {
                    self.orchestrator.teardown().await;
                    self.machine.notify("Disconnected from the server");
                }
            }
            Some(TransportEvent::Reconnected) => {
                info!("Control channel is back");
                self.machine.notify("Reconnected to the server");
            }
            Some(TransportEvent::Failed(status)) => {
                error!("Transport failed: {}", status);
                self.machine.session_ended().await;
                self.orchestrator.teardown().await;
                self.machine.notify(status);
            }
            None => {
                self.machine.session_ended().await;
                self.orchestrator.teardown().await;
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down session");
        self.machine.session_ended().await;
        self.orchestrator.disconnect().await;
    }

    fn forward_chat_events(&mut self) {
        while let Ok(event) = self.machine_events.try_recv() {
            self.persist(&event);
            let _ = self.chat_events.send(event);
        }
    }

    fn persist(&self, event: &ChatEvent) {
        if let Some(store) = &self.store {
            if let Err(e) = archive_event(store.as_ref(), &self.device_id, event) {
                warn!("Failed to archive message: {:#}", e);
            }
        }
    }

    fn publish(&self) {
        let snapshot = snapshot_of(&self.orchestrator, &self.machine);
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// Store recognized text, final or not, and completed speech segments
fn archive_event(store: &dyn MessageStore, device_id: &str, event: &ChatEvent) -> anyhow::Result<()> {
    match event {
        ChatEvent::RecognizedText {
            text, timestamp_ms, ..
        } if !text.trim().is_empty() => {
            store.save_message(device_id, "stt", text, None, *timestamp_ms)?;
        }
        ChatEvent::SegmentCompleted {
            text,
            pcm,
            sample_rate,
            channels,
            timestamp_ms,
            ..
        } => {
            let audio = (!pcm.is_empty()).then_some(SegmentAudio {
                pcm,
                sample_rate: *sample_rate,
                channels: *channels,
            });
            store.save_message(device_id, "tts", text, audio, *timestamp_ms)?;
        }
        _ => {}
    }
    Ok(())
}

fn snapshot_of(orchestrator: &SessionOrchestrator, machine: &ConversationMachine) -> ConversationSnapshot {
    ConversationSnapshot {
        state: machine.state(),
        mode: machine.mode(),
        session_id: orchestrator.session().map(|s| s.as_str().to_string()),
        transport: orchestrator.transport_kind(),
        capturing: machine.is_capturing(),
        playing: machine.is_playing(),
        device: machine.device_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SegmentArchive;

    #[test]
    fn non_final_recognized_text_is_archived() {
        let dir = tempfile::tempdir().unwrap();
        let archive = SegmentArchive::open(dir.path()).unwrap();

        let events = [
            ChatEvent::RecognizedText {
                text: "turn on the light".into(),
                is_final: false,
                timestamp_ms: 10,
            },
            ChatEvent::RecognizedText {
                text: "  ".into(),
                is_final: true,
                timestamp_ms: 11,
            },
            ChatEvent::StateChanged {
                state: ConversationState::Speaking,
                timestamp_ms: 12,
            },
            ChatEvent::SegmentCompleted {
                segment_id: 1,
                text: "Done".into(),
                pcm: vec![0; 480],
                sample_rate: 24000,
                channels: 1,
                started_ms: 12,
                timestamp_ms: 13,
            },
        ];
        for event in &events {
            archive_event(&archive, "aa:bb:cc:dd:ee:ff", event).unwrap();
        }

        let records = archive.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message_type, "stt");
        assert_eq!(records[0].text, "turn on the light");
        assert!(records[0].audio_path.is_none());
        assert_eq!(records[1].message_type, "tts");
        assert!(records[1].audio_path.is_some());
    }
}
