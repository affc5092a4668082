use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{Situation, TurnPhase};

pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Per-turn notification delivered to the transport bridge of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Chunk {
        text: String,
        index: usize,
    },
    ToolStart {
        name: String,
    },
    ToolDone {
        name: String,
        result: Value,
    },
    AudioChunk {
        index: usize,
        /// Base64-encoded audio bytes.
        audio: String,
        text: String,
        duration_ms: u64,
    },
    Complete {
        full_text: String,
        duration_ms: u64,
    },
    Interrupted {
        reason: String,
    },
    Error {
        message: String,
    },
}

/// Cross-cutting lifecycle and domain notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StateChanged {
        session_id: String,
        from: TurnPhase,
        to: TurnPhase,
        forced: bool,
    },
    StateEntered {
        session_id: String,
        state: TurnPhase,
    },
    Interrupted {
        session_id: String,
        reason: String,
    },
    SessionStarted {
        tenant_id: String,
        session_id: String,
    },
    TurnProcessed {
        tenant_id: String,
        session_id: String,
        situation: Situation,
        tool_used: Option<String>,
        duration_ms: u64,
        interrupted: bool,
        audio_segments: usize,
    },
    ToolUsed {
        tenant_id: String,
        session_id: String,
        tool: String,
    },
    JobStarted {
        job_id: String,
        tenant_id: String,
        session_id: String,
    },
    JobCompleted {
        job_id: String,
        duration_ms: u64,
    },
    JobFailed {
        job_id: String,
        error: String,
    },
    TourBooked {
        tenant_id: String,
        tour_id: String,
        customer_name: String,
        tour_date: String,
        location: String,
    },
    NoteCreated {
        tenant_id: String,
        note_id: String,
    },
    ContactUpdated {
        tenant_id: String,
        contact_id: String,
        name: String,
    },
}

/// Clonable handle to the process event bus.
///
/// Built once by the composition root and passed to every component that
/// publishes. Publishing without subscribers is silently dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: AgentEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}
