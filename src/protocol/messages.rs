use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::conversation::ConversationMode;

/// Opus stream parameters exchanged in hello messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_server_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_frame_duration")]
    pub frame_duration: u32,
}

fn default_format() -> String {
    "opus".to_string()
}

fn default_server_sample_rate() -> u32 {
    24000
}

fn default_channels() -> u16 {
    1
}

fn default_frame_duration() -> u32 {
    60
}

impl AudioParams {
    /// What this client sends: 16 kHz mono, 60 ms frames
    pub fn upstream() -> Self {
        Self {
            format: default_format(),
            sample_rate: 16000,
            channels: 1,
            frame_duration: 60,
        }
    }

    /// Assumed downstream parameters when the server omits them
    pub fn server_default() -> Self {
        Self {
            format: default_format(),
            sample_rate: default_server_sample_rate(),
            channels: default_channels(),
            frame_duration: default_frame_duration(),
        }
    }
}

/// Encrypted datagram endpoint and cipher material
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UdpParams {
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_udp_port")]
    pub port: u16,
    /// 16-byte AES key, hex encoded
    #[serde(default)]
    pub key: String,
    /// 16-byte nonce template, hex encoded
    #[serde(default)]
    pub nonce: String,
}

fn default_udp_port() -> u16 {
    8080
}

impl UdpParams {
    pub fn is_valid(&self) -> bool {
        !self.server.is_empty() && self.port > 0
    }
}

// Key material stays out of logs
impl fmt::Debug for UdpParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpParams")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("key", &"<redacted>")
            .field("nonce", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenState {
    Start,
    Stop,
}

/// Messages sent by this client on either control channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Hello {
        version: u32,
        transport: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        features: Option<Value>,
        audio_params: AudioParams,
    },
    Listen {
        session_id: String,
        state: ListenState,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<ConversationMode>,
    },
    Abort {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Goodbye {
        session_id: String,
    },
    Pong {
        timestamp: i64,
        client_id: String,
    },
    Text {
        session_id: String,
        text: String,
    },
    Iot {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        descriptors: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        update: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        states: Option<Value>,
    },
}

impl ClientMessage {
    pub fn listen_start(session_id: &str, mode: ConversationMode) -> Self {
        ClientMessage::Listen {
            session_id: session_id.to_string(),
            state: ListenState::Start,
            mode: Some(mode),
        }
    }

    pub fn listen_stop(session_id: &str) -> Self {
        ClientMessage::Listen {
            session_id: session_id.to_string(),
            state: ListenState::Stop,
            mode: None,
        }
    }

    pub fn abort(session_id: &str, reason: Option<&str>) -> Self {
        ClientMessage::Abort {
            session_id: session_id.to_string(),
            reason: reason.map(str::to_string),
        }
    }

    pub fn goodbye(session_id: &str) -> Self {
        ClientMessage::Goodbye {
            session_id: session_id.to_string(),
        }
    }

    /// Device capability description: a speaker with a settable volume
    pub fn iot_descriptors(session_id: &str) -> Self {
        let speaker = json!({
            "name": "Speaker",
            "description": "Speaker",
            "properties": {
                "volume": {
                    "name": "volume",
                    "description": "Current volume",
                    "type": "number",
                    "min": 0,
                    "max": 100
                }
            },
            "methods": {
                "SetVolume": {
                    "name": "SetVolume",
                    "description": "Set the volume",
                    "parameters": {
                        "volume": {
                            "name": "volume",
                            "description": "Integer between 0 and 100",
                            "type": "number",
                            "required": true
                        }
                    }
                }
            }
        });

        ClientMessage::Iot {
            session_id: session_id.to_string(),
            descriptors: Some(Value::Array(vec![speaker])),
            update: None,
            states: None,
        }
    }

    pub fn iot_states(session_id: &str, volume: u8) -> Self {
        ClientMessage::Iot {
            session_id: session_id.to_string(),
            descriptors: None,
            update: Some(true),
            states: Some(json!([{ "name": "Speaker", "state": { "volume": volume } }])),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "hello",
            ClientMessage::Listen { .. } => "listen",
            ClientMessage::Abort { .. } => "abort",
            ClientMessage::Goodbye { .. } => "goodbye",
            ClientMessage::Pong { .. } => "pong",
            ClientMessage::Text { .. } => "text",
            ClientMessage::Iot { .. } => "iot",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Server's reply to our hello
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerHello {
    #[serde(default)]
    pub transport: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default = "AudioParams::server_default")]
    pub audio_params: AudioParams,
    #[serde(default)]
    pub udp: Option<UdpParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsState {
    Start,
    SentenceStart,
    SentenceEnd,
    Stop,
    Other,
}

impl TtsState {
    fn parse(s: &str) -> Self {
        match s {
            "start" => TtsState::Start,
            "sentence_start" => TtsState::SentenceStart,
            "sentence_end" => TtsState::SentenceEnd,
            "stop" | "end" => TtsState::Stop,
            _ => TtsState::Other,
        }
    }

    pub fn opens_segment(self) -> bool {
        matches!(self, TtsState::Start | TtsState::SentenceStart)
    }

    pub fn closes_segment(self) -> bool {
        matches!(self, TtsState::SentenceEnd | TtsState::Stop)
    }
}

/// Messages received from the server, classified by their `type` field
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Hello(ServerHello),
    Stt { text: String, is_final: bool },
    Tts { state: TtsState, text: String },
    Llm { emotion: Option<String>, text: Option<String> },
    System { action: String },
    Iot(Value),
    Ping,
    Goodbye,
    Other(Value),
}

impl ServerMessage {
    pub fn parse(value: &Value) -> Self {
        let text_field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        match value.get("type").and_then(Value::as_str) {
            Some("hello") => match serde_json::from_value::<ServerHello>(value.clone()) {
                Ok(hello) => ServerMessage::Hello(hello),
                Err(_) => ServerMessage::Other(value.clone()),
            },
            Some("stt") => ServerMessage::Stt {
                text: text_field("text").unwrap_or_default(),
                is_final: value.get("is_final").and_then(Value::as_bool).unwrap_or(true),
            },
            Some("tts") => ServerMessage::Tts {
                state: TtsState::parse(&text_field("state").unwrap_or_default()),
                text: text_field("text").unwrap_or_default(),
            },
            Some("llm") => ServerMessage::Llm {
                emotion: text_field("emotion"),
                text: text_field("text"),
            },
            Some("system") => ServerMessage::System {
                action: text_field("action").unwrap_or_default(),
            },
            Some("iot") => ServerMessage::Iot(value.clone()),
            Some("ping") => ServerMessage::Ping,
            Some("goodbye") => ServerMessage::Goodbye,
            _ => ServerMessage::Other(value.clone()),
        }
    }

    pub fn parse_str(text: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::parse(&value))
    }
}
