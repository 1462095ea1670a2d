//! Conversation state machine and the chat events it emits.

pub mod events;
pub mod machine;
pub mod state;

pub use events::{ChatEvent, MonotonicClock};
pub use machine::{ControlLink, ConversationMachine};
pub use state::{ConversationMode, ConversationState};
