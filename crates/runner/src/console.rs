use runtime::{TurnInput, TurnResult};
use types::{AudioInput, TurnEvent};

pub const INTERRUPT_COMMAND: &str = "/interrupt";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Skip,
    Interrupt,
    Utterance(TurnInput),
}

/// Interprets one stdin line. In audio mode the line bytes stand in for the
/// caller's audio payload.
pub fn parse_line(line: &str, audio: bool) -> ConsoleCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ConsoleCommand::Skip;
    }
    if trimmed == INTERRUPT_COMMAND {
        return ConsoleCommand::Interrupt;
    }
    if audio {
        ConsoleCommand::Utterance(TurnInput::Audio(AudioInput::new(trimmed.as_bytes())))
    } else {
        ConsoleCommand::Utterance(TurnInput::Text(trimmed.to_owned()))
    }
}

/// Console text for a streamed turn event, or `None` when it prints nothing.
pub fn render_event(event: &TurnEvent) -> Option<String> {
    match event {
        TurnEvent::Chunk { text, .. } => Some(text.clone()),
        TurnEvent::ToolStart { name } => Some(format!("\n[tool {name}]\n")),
        TurnEvent::ToolDone { .. } => None,
        TurnEvent::AudioChunk {
            index,
            text,
            duration_ms,
            ..
        } => Some(format!("[audio {index} {duration_ms}ms] {text}\n")),
        TurnEvent::Complete { .. } => Some("\n".to_owned()),
        TurnEvent::Interrupted { reason } => Some(format!("\n[interrupted: {reason}]\n")),
        TurnEvent::Error { message } => Some(format!("\n[error: {message}]\n")),
    }
}

pub fn summarize(result: &TurnResult) -> String {
    let mut line = format!(
        "situation={} tool={} interrupted={} api_calls={} duration_ms={}",
        result.situation,
        result.tool_used.as_deref().unwrap_or("-"),
        result.interrupted,
        result.api_calls,
        result.duration_ms,
    );
    if let Some(transcript) = &result.transcript {
        line.push_str(&format!(" confidence={:.2}", transcript.confidence));
    }
    line
}
