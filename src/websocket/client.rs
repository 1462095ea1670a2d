use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::framing::{decode_audio, encode_audio, ProtocolVersion};
use crate::bootstrap::WebSocketParams;
use crate::error::{LinkError, LinkResult};
use crate::identity::DeviceIdentity;
use crate::protocol::{AudioParams, ClientMessage, ServerHello};
use crate::session::TransportEvent;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTGOING_CAPACITY: usize = 64;

/// Transport B: one WebSocket carrying JSON control frames and versioned
/// binary audio frames.
pub struct WebSocketTransport {
    outgoing: mpsc::Sender<Message>,
    version: ProtocolVersion,
    session_id: String,
    audio_params: AudioParams,
    closed: Arc<AtomicBool>,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    started: Instant,
}

impl WebSocketTransport {
    pub async fn connect(
        params: &WebSocketParams,
        identity: &DeviceIdentity,
        connect_timeout: Duration,
        hello_timeout: Duration,
        events: mpsc::Sender<TransportEvent>,
    ) -> LinkResult<Self> {
        if !params.is_valid() {
            return Err(LinkError::Config("websocket section has no url".into()));
        }

        let version = ProtocolVersion::from_number(params.version);
        let request = build_request(params, identity)?;

        info!("Connecting to WebSocket {} (protocol v{})", params.url, version.number());

        let (socket, _response) = match tokio::time::timeout(connect_timeout, connect_async(request)).await
        {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(map_connect_error(e)),
            Err(_) => {
                return Err(LinkError::Connection(format!(
                    "websocket connect timed out after {:?}",
                    connect_timeout
                )))
            }
        };

        let (mut sink, mut stream) = socket.split();

        let hello = ClientMessage::Hello {
            version: version.number(),
            transport: "websocket".to_string(),
            features: Some(json!({ "aec": false, "mcp": true })),
            audio_params: AudioParams::upstream(),
        };
        sink.send(Message::Text(hello.to_json()?))
            .await
            .map_err(|e| LinkError::Connection(format!("failed to send hello: {e}")))?;

        let server_hello =
            match tokio::time::timeout(hello_timeout, wait_for_hello(&mut stream, &events)).await {
                Ok(Ok(hello)) => hello,
                Ok(Err(e)) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Err(e);
                }
                Err(_) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Err(LinkError::Handshake(format!(
                        "no server hello within {:?}",
                        hello_timeout
                    )));
                }
            };

        info!(
            "WebSocket session {} ready (server audio {} Hz, {} ch, {} ms)",
            server_hello.session_id,
            server_hello.audio_params.sample_rate,
            server_hello.audio_params.channels,
            server_hello.audio_params.frame_duration
        );

        let closed = Arc::new(AtomicBool::new(false));
        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let writer = tokio::spawn(write_loop(sink, outgoing_rx));
        let reader = tokio::spawn(read_loop(stream, version, events, closed.clone()));

        Ok(Self {
            outgoing,
            version,
            session_id: server_hello.session_id,
            audio_params: server_hello.audio_params,
            closed,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            started: Instant::now(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn audio_params(&self) -> &AudioParams {
        &self.audio_params
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    pub async fn send_control(&self, message: &ClientMessage) -> LinkResult<()> {
        self.enqueue(Message::Text(message.to_json()?)).await?;
        debug!("Sent {} over WebSocket", message.type_name());
        Ok(())
    }

    pub async fn send_audio(&self, opus: &[u8]) -> LinkResult<()> {
        let timestamp = self.started.elapsed().as_millis() as u32;
        let frame = encode_audio(self.version, opus, timestamp)?;
        self.enqueue(Message::Binary(frame)).await
    }

    async fn enqueue(&self, message: Message) -> LinkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::MediaNotReady);
        }
        self.outgoing
            .send(message)
            .await
            .map_err(|_| LinkError::Connection("websocket writer has stopped".into()))
    }

    /// Send a close frame and stop both tasks. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing WebSocket session {}", self.session_id);

        let _ = self.outgoing.try_send(Message::Close(None));

        let writer = self.writer.lock().take();
        if let Some(mut writer) = writer {
            if tokio::time::timeout(Duration::from_secs(2), &mut writer)
                .await
                .is_err()
            {
                writer.abort();
            }
        }

        let reader = self.reader.lock().take();
        if let Some(mut reader) = reader {
            if tokio::time::timeout(Duration::from_secs(2), &mut reader)
                .await
                .is_err()
            {
                reader.abort();
            }
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        for slot in [&self.writer, &self.reader] {
            if let Some(task) = slot.lock().take() {
                task.abort();
            }
        }
    }
}

fn build_request(
    params: &WebSocketParams,
    identity: &DeviceIdentity,
) -> LinkResult<tungstenite::handshake::client::Request> {
    let mut request = params
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| LinkError::Config(format!("invalid websocket url: {e}")))?;

    let header = |value: &str| {
        HeaderValue::from_str(value)
            .map_err(|e| LinkError::Config(format!("invalid header value: {e}")))
    };

    let headers = request.headers_mut();
    if !params.token.is_empty() {
        let auth = if params.token.contains(' ') {
            params.token.clone()
        } else {
            format!("Bearer {}", params.token)
        };
        headers.insert("Authorization", header(&auth)?);
    }
    headers.insert("Protocol-Version", header(&params.version.to_string())?);
    headers.insert("Device-Id", header(identity.mac_address())?);
    headers.insert("Client-Id", header(&identity.client_id_string())?);

    Ok(request)
}

fn map_connect_error(e: tungstenite::Error) -> LinkError {
    match e {
        tungstenite::Error::Http(response)
            if matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) =>
        {
            LinkError::Handshake(format!("server rejected credentials ({})", response.status()))
        }
        other => LinkError::Connection(other.to_string()),
    }
}

/// Read until the server hello arrives; control frames that come first are
/// still forwarded.
async fn wait_for_hello(
    stream: &mut SplitStream<WsStream>,
    events: &mpsc::Sender<TransportEvent>,
) -> LinkResult<ServerHello> {
    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| LinkError::Connection(e.to_string()))?;
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                return Err(LinkError::Connection("server closed before hello".into()))
            }
            _ => continue,
        };

        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring invalid JSON frame: {}", e);
                continue;
            }
        };

        if value.get("type").and_then(Value::as_str) != Some("hello") {
            let _ = events.send(TransportEvent::Control(value)).await;
            continue;
        }

        let hello: ServerHello = serde_json::from_value(value)
            .map_err(|e| LinkError::Handshake(format!("malformed server hello: {e}")))?;
        if hello.transport != "websocket" {
            return Err(LinkError::Handshake(format!(
                "unsupported transport '{}'",
                hello.transport
            )));
        }
        return Ok(hello);
    }

    Err(LinkError::Connection("server closed before hello".into()))
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outgoing: mpsc::Receiver<Message>,
) {
    while let Some(message) = outgoing.recv().await {
        let is_close = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!("WebSocket send failed: {}", e);
            break;
        }
        if is_close {
            break;
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    version: ProtocolVersion,
    events: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
) {
    let clean = loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                if !closed.load(Ordering::SeqCst) {
                    warn!("WebSocket read failed: {}", e);
                }
                break closed.load(Ordering::SeqCst);
            }
            None => break closed.load(Ordering::SeqCst),
        };

        let event = match message {
            Message::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value) => TransportEvent::Control(value),
                Err(e) => {
                    warn!("Ignoring invalid JSON frame: {}", e);
                    continue;
                }
            },
            Message::Binary(frame) => match decode_audio(version, &frame) {
                Ok(opus) => TransportEvent::Audio(opus.to_vec()),
                Err(e) => {
                    debug!("Dropping audio frame: {}", e);
                    continue;
                }
            },
            Message::Close(frame) => {
                info!("WebSocket closed by server: {:?}", frame);
                break true;
            }
            _ => continue,
        };

        if events.send(event).await.is_err() {
            break true;
        }
    };

    let _ = events.send(TransportEvent::Disconnected { clean }).await;
}
