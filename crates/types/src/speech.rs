use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::SpeechError;

/// Raw caller audio as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInput {
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl AudioInput {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            mime_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub transcript: String,
    pub confidence: f64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSegment {
    pub index: usize,
    pub audio: Vec<u8>,
    pub text: String,
    pub duration_ms: u64,
}

/// Lazily produced segments. Dropping the receiver ends synthesis.
pub type SpeechStream = mpsc::Receiver<Result<AudioSegment, SpeechError>>;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcription, SpeechError>;
}

/// Each call starts again from segment zero.
pub trait TextToSpeech: Send + Sync {
    fn synthesize(&self, text: &str) -> SpeechStream;
}
