//! Control-channel JSON messages shared by the MQTT and WebSocket transports.

pub mod messages;

pub use messages::{
    AudioParams, ClientMessage, ListenState, ServerHello, ServerMessage, TtsState, UdpParams,
};
