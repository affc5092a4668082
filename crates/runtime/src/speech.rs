use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use types::{
    AudioInput, AudioSegment, SpeechError, SpeechStream, SpeechToText, TextToSpeech, Transcription,
};

use crate::LatencySimulator;

const MAX_CONFIDENCE: f64 = 0.98;
const WORDS_PER_SECOND: f64 = 12.0;
const FALLBACK_WORDS_PER_SEGMENT: usize = 6;

/// Treats the audio payload as UTF-8 text. Stands in for a real recognizer.
#[derive(Debug, Clone)]
pub struct MockSpeechToText {
    latency: LatencySimulator,
}

impl MockSpeechToText {
    pub fn new(latency: LatencySimulator) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl SpeechToText for MockSpeechToText {
    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcription, SpeechError> {
        let started = Instant::now();
        self.latency.stt_delay().await;

        let decoded = String::from_utf8_lossy(&audio.payload);
        let transcript = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
        let tokens = transcript.split(' ').filter(|word| !word.is_empty()).count();
        let confidence = if tokens == 0 {
            0.0
        } else {
            (0.75 + 0.01 * tokens as f64).min(MAX_CONFIDENCE)
        };

        Ok(Transcription {
            transcript,
            confidence,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Emits one placeholder segment per phrase.
#[derive(Debug, Clone)]
pub struct MockTextToSpeech {
    latency: LatencySimulator,
}

impl MockTextToSpeech {
    pub fn new(latency: LatencySimulator) -> Self {
        Self { latency }
    }
}

impl TextToSpeech for MockTextToSpeech {
    fn synthesize(&self, text: &str) -> SpeechStream {
        let (sender, receiver) = mpsc::channel(1);
        let segments = split_segments(text);
        let latency = self.latency.clone();
        tokio::spawn(async move {
            for (index, segment) in segments.into_iter().enumerate() {
                latency.tts_delay(segment.chars().count()).await;
                let item = AudioSegment {
                    index,
                    audio: format!("[AUDIO:{index}] {segment}").into_bytes(),
                    duration_ms: estimate_duration_ms(&segment),
                    text: segment,
                };
                if sender.send(Ok(item)).await.is_err() {
                    break;
                }
            }
        });
        receiver
    }
}

/// Splits after sentence or clause punctuation followed by whitespace. Text
/// without such breaks is grouped into fixed-size word runs.
pub fn split_segments(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '?' | '!' | ',' | ';')
            && chars.peek().is_some_and(|next| next.is_whitespace())
        {
            push_trimmed(&mut pieces, &current);
            current.clear();
        }
    }
    push_trimmed(&mut pieces, &current);

    if pieces.len() > 1 {
        return pieces;
    }
    text.split_whitespace()
        .collect::<Vec<_>>()
        .chunks(FALLBACK_WORDS_PER_SEGMENT)
        .map(|words| words.join(" "))
        .collect()
}

fn push_trimmed(pieces: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        pieces.push(piece.to_owned());
    }
}

pub fn estimate_duration_ms(text: &str) -> u64 {
    let words = text.split_whitespace().count() as f64;
    (words / WORDS_PER_SECOND * 1000.0).ceil() as u64
}

