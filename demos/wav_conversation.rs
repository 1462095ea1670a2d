// WAV conversation: one full turn against a live server, headless.
//
// This example:
// - Resolves the device and connects over the preferred transport
// - Streams a WAV file as the user's utterance
// - Writes the assistant's reply to WAV files and archives the turn
//
// Usage:
//   cargo run --example wav_conversation -- <bootstrap-url> <question.wav> [--websocket]

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};
use voxlink::audio::{OpusCodec, SegmentArchive, WavFileDevice};
use voxlink::config::NetworkConfig;
use voxlink::mqtt::PortProtocolCache;
use voxlink::protocol::AudioParams;
use voxlink::{
    BootstrapResolver, ChatEvent, ConversationMachine, ConversationState, DeviceIdentity,
    SessionOrchestrator, SessionRunner, TransportPreference,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (Some(url), Some(wav)) = (args.first(), args.get(1)) else {
        anyhow::bail!("usage: wav_conversation <bootstrap-url> <question.wav> [--websocket]");
    };
    let preference = if args.iter().any(|a| a == "--websocket") {
        TransportPreference::WebSocket
    } else {
        TransportPreference::MqttUdp
    };

    println!("=== WAV conversation ===\n");

    let network = NetworkConfig::default();
    let identity = DeviceIdentity::generate();
    let bootstrap = BootstrapResolver::new(url, "wav-conversation", &network)?
        .resolve(&identity)
        .await?;
    if let Some(notice) = bootstrap.activation_notice() {
        println!("{}\n", notice);
    }

    let mut orchestrator =
        SessionOrchestrator::new(identity, network, Arc::new(PortProtocolCache::in_memory()));
    let session = orchestrator.connect(&bootstrap, preference).await?;
    println!("Session {} over {:?}", session, orchestrator.transport_kind());

    let server_audio = orchestrator
        .audio_params()
        .cloned()
        .unwrap_or_else(AudioParams::server_default);
    let out_dir = PathBuf::from("wav-conversation-output");
    let device = WavFileDevice::new(Some(PathBuf::from(wav)), Some(out_dir.join("playback")))?;
    let archive = SegmentArchive::open(out_dir.join("archive"))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let machine = ConversationMachine::new(OpusCodec::new(&server_audio)?, Box::new(device), tx);
    let (runner, controller) = SessionRunner::new(orchestrator, machine, rx);
    let runner = runner.with_store(Arc::new(archive));
    let mut events = controller.subscribe();
    let runner_task = tokio::spawn(runner.run());

    controller.start_recording().await?;
    println!("Streaming {} ...", wav);

    // The file running dry stops listening; wait for the reply to finish
    let finished = timeout(Duration::from_secs(60), async {
        let mut spoke = false;
        loop {
            match events.recv().await {
                Ok(ChatEvent::RecognizedText { text, .. }) => println!("you:       {}", text),
                Ok(ChatEvent::SegmentStarted { text, .. }) => {
                    spoke = true;
                    println!("assistant: {}", text);
                }
                Ok(ChatEvent::StateChanged { state: ConversationState::Idle, .. }) if spoke => break,
                Ok(ChatEvent::Status { message, .. }) => println!("[{}]", message),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await;

    if finished.is_err() {
        println!("No complete reply within 60 s");
    }

    controller.shutdown().await?;
    runner_task.await.context("Session runner panicked")?;
    println!("\nOutput written to {}", out_dir.display());

    Ok(())
}
