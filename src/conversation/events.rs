use serde::Serialize;

use super::state::ConversationState;

/// Chat-level events for collaborators (UI, persistence).
///
/// A completed segment carries the same `segment_id` and `started_ms` as the
/// `SegmentStarted` that announced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChatEvent {
    RecognizedText {
        text: String,
        is_final: bool,
        timestamp_ms: u64,
    },
    SegmentStarted {
        segment_id: u64,
        text: String,
        started_ms: u64,
    },
    SegmentCompleted {
        segment_id: u64,
        text: String,
        #[serde(skip)]
        pcm: Vec<i16>,
        sample_rate: u32,
        channels: u16,
        started_ms: u64,
        timestamp_ms: u64,
    },
    StateChanged {
        state: ConversationState,
        timestamp_ms: u64,
    },
    /// Human-readable notice: failures, activation instructions
    Status { message: String, timestamp_ms: u64 },
}

impl ChatEvent {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            ChatEvent::RecognizedText { timestamp_ms, .. }
            | ChatEvent::SegmentCompleted { timestamp_ms, .. }
            | ChatEvent::StateChanged { timestamp_ms, .. }
            | ChatEvent::Status { timestamp_ms, .. } => *timestamp_ms,
            ChatEvent::SegmentStarted { started_ms, .. } => *started_ms,
        }
    }
}

/// Wall-clock milliseconds that never repeat or go backwards
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&mut self) -> u64 {
        let wall = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.last = wall.max(self.last + 1);
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_strictly_increasing() {
        let mut clock = MonotonicClock::new();
        let mut previous = clock.now_ms();
        for _ in 0..1000 {
            let next = clock.now_ms();
            assert!(next > previous);
            previous = next;
        }
    }
}
