use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::Value;
use tokio::sync::broadcast;
use types::{AudioSegment, TurnEvent};

/// Per-turn event emitter bound to one session's subscribers.
///
/// Tracks the text streamed so far so `complete` can report it, and numbers
/// chunks from zero. Both reset after `complete` and `interrupted`. Sends
/// without a live subscriber are dropped.
#[derive(Debug)]
pub struct EventChannel {
    session_id: String,
    sender: broadcast::Sender<TurnEvent>,
    buffer: String,
    chunk_index: usize,
}

impl EventChannel {
    pub fn new(session_id: impl Into<String>, sender: broadcast::Sender<TurnEvent>) -> Self {
        Self {
            session_id: session_id.into(),
            sender,
            buffer: String::new(),
            chunk_index: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn buffered_text(&self) -> &str {
        &self.buffer
    }

    pub fn chunk(&mut self, text: &str) {
        self.buffer.push_str(text);
        let index = self.chunk_index;
        self.chunk_index += 1;
        self.send(TurnEvent::Chunk {
            text: text.to_owned(),
            index,
        });
    }

    pub fn tool_start(&self, name: &str) {
        self.send(TurnEvent::ToolStart {
            name: name.to_owned(),
        });
    }

    pub fn tool_done(&self, name: &str, result: &Value) {
        self.send(TurnEvent::ToolDone {
            name: name.to_owned(),
            result: result.clone(),
        });
    }

    pub fn audio_chunk(&self, segment: &AudioSegment) {
        self.send(TurnEvent::AudioChunk {
            index: segment.index,
            audio: STANDARD.encode(&segment.audio),
            text: segment.text.clone(),
            duration_ms: segment.duration_ms,
        });
    }

    pub fn complete(&mut self, duration_ms: u64) {
        let full_text = std::mem::take(&mut self.buffer);
        self.chunk_index = 0;
        self.send(TurnEvent::Complete {
            full_text,
            duration_ms,
        });
    }

    pub fn interrupted(&mut self, reason: &str) {
        self.buffer.clear();
        self.chunk_index = 0;
        self.send(TurnEvent::Interrupted {
            reason: reason.to_owned(),
        });
    }

    pub fn error(&self, message: &str) {
        self.send(TurnEvent::Error {
            message: message.to_owned(),
        });
    }

    fn send(&self, event: TurnEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!(session_id = %self.session_id, "turn event dropped without subscribers");
        }
    }
}
