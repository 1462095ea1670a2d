use crate::session::{ConversationSnapshot, SessionController};
use tokio::sync::watch;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Command handle of the running session
    pub controller: SessionController,

    /// Latest conversation snapshot published by the runner
    pub snapshots: watch::Receiver<ConversationSnapshot>,
}

impl AppState {
    pub fn new(controller: SessionController, snapshots: watch::Receiver<ConversationSnapshot>) -> Self {
        Self {
            controller,
            snapshots,
        }
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.snapshots.borrow().clone()
    }
}
