//! Session management
//!
//! This module ties the transports to the conversation:
//! - Transport selection from the bootstrap configuration
//! - `SessionOrchestrator`, owner of the single live transport and session handle
//! - `SessionRunner`, the one loop that applies user commands, transport
//!   events and captured audio to the conversation machine
//! - `SessionController`, the cloneable handle other tasks drive it with

mod orchestrator;
mod runner;
mod transport;

pub use orchestrator::{SessionHandle, SessionOrchestrator};
pub use runner::{ConversationSnapshot, SessionController, SessionRunner, UserCommand};
pub use transport::{select_transport, ActiveTransport, TransportEvent, TransportKind, TransportPreference};
