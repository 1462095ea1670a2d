use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voxlink::audio::{OpusCodec, SegmentArchive, WavFileDevice};
use voxlink::config::expand_path;
use voxlink::mqtt::PortProtocolCache;
use voxlink::protocol::AudioParams;
use voxlink::{
    create_router, AppState, BootstrapResolver, ChatEvent, Config, ConversationMachine,
    DeviceIdentity, SessionOrchestrator, SessionRunner, TransportPreference,
};

#[derive(Debug, Parser)]
#[command(name = "voxlink", version, about = "Voice-assistant device client")]
struct Args {
    /// Config file, extension optional
    #[arg(short, long, default_value = "config/voxlink")]
    config: String,

    /// Prefer the WebSocket transport when the server offers it
    #[arg(long)]
    websocket: bool,

    /// Hardware address to identify as (overrides the config file)
    #[arg(long)]
    mac: Option<String>,

    /// Do not start the local HTTP control API
    #[arg(long)]
    no_http: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("voxlink v{}", env!("CARGO_PKG_VERSION"));
    info!("Device: {}", cfg.device.name);

    let identity = match args.mac.as_deref().or(cfg.device.mac_address.as_deref()) {
        Some(mac) => DeviceIdentity::from_mac(mac).context("Invalid MAC address")?,
        None => {
            let identity = DeviceIdentity::generate();
            warn!(
                "No MAC address configured, using generated {}; save it as device.mac_address to keep this identity",
                identity.mac_address()
            );
            identity
        }
    };
    info!("MAC {} / client id {}", identity.mac_address(), identity.client_id());

    let resolver = BootstrapResolver::new(&cfg.device.bootstrap_url, &cfg.device.name, &cfg.network)
        .context("Failed to build bootstrap client")?;
    let bootstrap = resolver
        .resolve(&identity)
        .await
        .context("Bootstrap resolution failed")?;

    if let Some(notice) = bootstrap.activation_notice() {
        println!("\n{}\n", notice);
    }

    let preference = if args.websocket {
        TransportPreference::WebSocket
    } else {
        cfg.device.transport
    };

    let cache = Arc::new(match cfg.storage.port_cache_path() {
        Some(path) => PortProtocolCache::load(path),
        None => PortProtocolCache::in_memory(),
    });

    let mut orchestrator = SessionOrchestrator::new(identity, cfg.network.clone(), cache);
    let session = orchestrator
        .connect(&bootstrap, preference)
        .await
        .context("Failed to connect to the server")?;
    info!("Session {} is up", session);

    let server_audio = orchestrator
        .audio_params()
        .cloned()
        .unwrap_or_else(AudioParams::server_default);
    let codec = OpusCodec::new(&server_audio).context("Failed to create Opus codec")?;

    let device = WavFileDevice::new(
        cfg.audio.input_wav.as_deref().map(expand_path),
        cfg.audio.output_dir.as_deref().map(expand_path),
    )?;
    let archive = SegmentArchive::open(cfg.storage.archive_dir())?;

    let (machine_tx, machine_rx) = mpsc::unbounded_channel();
    let machine = ConversationMachine::new(codec, Box::new(device), machine_tx);

    let (runner, controller) = SessionRunner::new(orchestrator, machine, machine_rx);
    let runner = runner.with_store(Arc::new(archive));
    let snapshots = runner.snapshots();

    tokio::spawn(print_chat_events(controller.subscribe()));
    let runner_task = tokio::spawn(runner.run());

    if args.no_http {
        info!("HTTP API disabled, press Ctrl-C to quit");
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    } else {
        let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP API on {}", addr))?;
        info!("HTTP API listening on {}", addr);

        let app = create_router(AppState::new(controller.clone(), snapshots));
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .context("HTTP server failed")?;
    }

    info!("Shutting down");
    if let Err(e) = controller.shutdown().await {
        warn!("Shutdown request failed: {}", e);
    }
    runner_task.await.context("Session runner panicked")?;

    Ok(())
}

async fn print_chat_events(mut events: broadcast::Receiver<ChatEvent>) {
    loop {
        match events.recv().await {
            Ok(ChatEvent::RecognizedText { text, is_final: true, .. }) => println!("you: {}", text),
            Ok(ChatEvent::SegmentStarted { text, .. }) => println!("assistant: {}", text),
            Ok(ChatEvent::StateChanged { state, .. }) => info!("state: {}", state),
            Ok(ChatEvent::Status { message, .. }) => println!("[{}]", message),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Chat event printer skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
