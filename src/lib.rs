pub mod audio;
pub mod bootstrap;
pub mod config;
pub mod conversation;
pub mod error;
pub mod http;
pub mod identity;
pub mod media;
pub mod mqtt;
pub mod protocol;
pub mod session;
pub mod websocket;

pub use audio::{AudioDevice, AudioFile, AudioFrame, MessageStore, OpusCodec, SegmentArchive, WavFileDevice};
pub use bootstrap::{BootstrapConfig, BootstrapResolver};
pub use config::Config;
pub use conversation::{ChatEvent, ConversationMachine, ConversationMode, ConversationState};
pub use error::{LinkError, LinkResult};
pub use http::{create_router, AppState};
pub use identity::DeviceIdentity;
pub use session::{
    ConversationSnapshot, SessionController, SessionOrchestrator, SessionRunner, TransportEvent,
    TransportKind, TransportPreference,
};
