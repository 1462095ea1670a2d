use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::bootstrap::BootstrapConfig;
use crate::error::{LinkError, LinkResult};
use crate::mqtt::MqttUdpTransport;
use crate::protocol::{AudioParams, ClientMessage};
use crate::websocket::WebSocketTransport;

/// Which transport family a session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Broker control channel plus encrypted UDP media
    MqttUdp,
    /// Single WebSocket for control and media
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::MqttUdp => f.write_str("mqtt+udp"),
            TransportKind::WebSocket => f.write_str("websocket"),
        }
    }
}

/// User preference from configuration or the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportPreference {
    #[default]
    MqttUdp,
    WebSocket,
}

/// Pick the transport for a resolved configuration.
///
/// A WebSocket preference wins only when the WebSocket section is usable;
/// otherwise whichever section is valid is used, MQTT first.
pub fn select_transport(
    config: &BootstrapConfig,
    preference: TransportPreference,
) -> LinkResult<TransportKind> {
    if preference == TransportPreference::WebSocket && config.has_websocket() {
        return Ok(TransportKind::WebSocket);
    }
    if config.has_mqtt() {
        return Ok(TransportKind::MqttUdp);
    }
    if config.has_websocket() {
        return Ok(TransportKind::WebSocket);
    }
    Err(LinkError::Resolution(
        "server offered neither an MQTT nor a WebSocket section".into(),
    ))
}

/// Everything a transport reports back to the session, merged into one stream
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// JSON control message from the server
    Control(Value),
    /// One Opus frame, already decrypted or unframed
    Audio(Vec<u8>),
    /// `clean` is true only for disconnects we initiated
    Disconnected { clean: bool },
    Reconnected,
    /// The transport gave up; carries a human-readable status
    Failed(String),
}

/// The live transport of a session
pub enum ActiveTransport {
    MqttUdp(MqttUdpTransport),
    WebSocket(WebSocketTransport),
}

impl ActiveTransport {
    pub fn kind(&self) -> TransportKind {
        match self {
            ActiveTransport::MqttUdp(_) => TransportKind::MqttUdp,
            ActiveTransport::WebSocket(_) => TransportKind::WebSocket,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            ActiveTransport::MqttUdp(t) => t.session_id(),
            ActiveTransport::WebSocket(t) => t.session_id(),
        }
    }

    pub fn audio_params(&self) -> &AudioParams {
        match self {
            ActiveTransport::MqttUdp(t) => t.audio_params(),
            ActiveTransport::WebSocket(t) => t.audio_params(),
        }
    }

    pub async fn send_control(&self, message: &ClientMessage) -> LinkResult<()> {
        match self {
            ActiveTransport::MqttUdp(t) => t.send_control(message).await,
            ActiveTransport::WebSocket(t) => t.send_control(message).await,
        }
    }

    pub async fn send_audio(&self, opus: &[u8]) -> LinkResult<()> {
        match self {
            ActiveTransport::MqttUdp(t) => t.send_audio(opus).await,
            ActiveTransport::WebSocket(t) => t.send_audio(opus).await,
        }
    }

    pub async fn close(&self) {
        match self {
            ActiveTransport::MqttUdp(t) => t.close().await,
            ActiveTransport::WebSocket(t) => t.close().await,
        }
    }
}
