use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, time::Instant};
use chrono::Utc;
use types::{
    AgentEvent, AudioInput, ConversationLog, ConversationRecord, EventBus, HistoryEntry,
    RuntimeError, SessionState, Situation, SpeechToText, TextToSpeech, Transcription, TurnEvent,
    TurnPhase,
};

use crate::{
    EventChannel, InterruptSignal, InterruptWatch, PromptBuilder, SessionMutex,
    SessionRepository, TurnOrchestrator, TurnPlan, TurnStateMachine,
};

pub const BARGE_IN_SPEECH: &str = "barge-in during speech";

#[derive(Debug, Clone, PartialEq)]
pub enum TurnInput {
    Text(String),
    Audio(AudioInput),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub tenant_id: String,
    pub session_id: String,
    pub input: TurnInput,
}

impl TurnRequest {
    pub fn text(
        tenant_id: impl Into<String>,
        session_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id: session_id.into(),
            input: TurnInput::Text(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub session_id: String,
    pub response: String,
    pub situation: Situation,
    pub tool_used: Option<String>,
    pub interrupted: bool,
    pub api_calls: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Transcription>,
    pub audio_segments: usize,
}

/// Collaborators shared by every turn in the process.
pub struct TurnDependencies {
    pub interrupts: Arc<InterruptSignal>,
    pub session_mutex: SessionMutex,
    pub sessions: SessionRepository,
    pub conversations: Arc<dyn ConversationLog>,
    pub prompts: Arc<dyn PromptBuilder>,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub speech_to_text: Arc<dyn SpeechToText>,
    pub text_to_speech: Arc<dyn TextToSpeech>,
    pub events: EventBus,
}

struct Spoken {
    segments: usize,
    interrupted: bool,
}

/// One end-to-end turn for a session: lock, load, think, speak, persist.
pub struct TurnProcess {
    id: String,
    request: TurnRequest,
    deps: Arc<TurnDependencies>,
    state: TurnStateMachine,
}

impl TurnProcess {
    pub fn new(request: TurnRequest, deps: Arc<TurnDependencies>) -> Self {
        let state = TurnStateMachine::new(request.session_id.clone(), deps.events.clone());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            deps,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.request.session_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.request.tenant_id
    }

    pub fn phase(&self) -> TurnPhase {
        self.state.current()
    }

    /// Raises the session's interrupt flag. In-flight work stops at its next
    /// check point.
    pub fn interrupt(&self, reason: &str) -> bool {
        self.deps.interrupts.signal(&self.request.session_id, reason)
    }

    pub async fn run(
        &self,
        events: broadcast::Sender<TurnEvent>,
    ) -> Result<TurnResult, RuntimeError> {
        let session_id = self.request.session_id.as_str();
        let mut channel = EventChannel::new(session_id, events);

        let outcome = match self.state.set_state(TurnPhase::Listening) {
            Ok(()) => {
                if self.deps.interrupts.clear(session_id) {
                    tracing::warn!(session_id, "cleared stale interrupt flag before turn");
                }
                self.deps
                    .session_mutex
                    .with_lock(session_id, self.locked_turn(&mut channel))
                    .await
            }
            Err(error) => Err(error),
        };

        if let Err(error) = &outcome {
            tracing::warn!(
                session_id,
                tenant_id = %self.request.tenant_id,
                process_id = %self.id,
                %error,
                "turn failed"
            );
            channel.error(&error.to_string());
        }
        self.state.force_state(TurnPhase::Idle);
        outcome
    }

    /// The flag is watched and retired inside the lock so only the holder
    /// ever owns the session's entry.
    async fn locked_turn(&self, channel: &mut EventChannel) -> Result<TurnResult, RuntimeError> {
        let watch = self.deps.interrupts.watch(&self.request.session_id);
        let outcome = self.turn_body(channel, &watch).await;
        self.deps.interrupts.retire(&watch);
        outcome
    }

    async fn turn_body(
        &self,
        channel: &mut EventChannel,
        watch: &InterruptWatch,
    ) -> Result<TurnResult, RuntimeError> {
        let started = Instant::now();
        let TurnRequest {
            tenant_id,
            session_id,
            input,
        } = &self.request;

        let (mut session, _) = self.deps.sessions.load_or_create(tenant_id, session_id).await?;
        if session.history.is_empty() {
            self.deps.events.publish(AgentEvent::SessionStarted {
                tenant_id: tenant_id.clone(),
                session_id: session_id.clone(),
            });
        }

        let (message, transcript) = match input {
            TurnInput::Text(text) => (text.clone(), None),
            TurnInput::Audio(audio) => {
                let transcription = self.deps.speech_to_text.transcribe(audio).await?;
                tracing::debug!(
                    %session_id,
                    confidence = transcription.confidence,
                    elapsed_ms = transcription.elapsed_ms,
                    "audio transcribed"
                );
                let message = if transcription.transcript.trim().is_empty() {
                    String::from_utf8_lossy(&audio.payload).into_owned()
                } else {
                    transcription.transcript.clone()
                };
                (message, Some(transcription))
            }
        };

        self.state.set_state(TurnPhase::Processing)?;
        let prompt = self
            .deps
            .prompts
            .build(tenant_id, &session, &message)
            .await?;
        let outcome = self
            .deps
            .orchestrator
            .run(
                TurnPlan {
                    session_id: session_id.clone(),
                    tenant_id: tenant_id.clone(),
                    system_prompt: prompt.system_prompt,
                    messages: prompt.messages,
                    situation: session.situation,
                },
                &self.state,
                channel,
                watch,
            )
            .await?;

        let mut interrupted = outcome.interrupted;
        let mut audio_segments = 0;
        if interrupted {
            self.state.force_state(TurnPhase::Interrupted);
        } else {
            self.state.set_state(TurnPhase::Completed)?;
            if !outcome.response.is_empty() {
                self.state.set_state(TurnPhase::Speaking)?;
                let spoken = self.speak(&outcome.response, channel, watch).await?;
                audio_segments = spoken.segments;
                if spoken.interrupted {
                    interrupted = true;
                    channel.interrupted(BARGE_IN_SPEECH);
                    self.state.set_state(TurnPhase::Interrupted)?;
                }
            }
        }

        self.record_exchange(&mut session, &message, &outcome.response, outcome.situation)
            .await;
        self.audit(ConversationRecord {
            tenant_id: tenant_id.clone(),
            session_id: session_id.clone(),
            message: message.clone(),
            response: outcome.response.clone(),
            tool_used: outcome.tool_used.clone(),
            situation: outcome.situation,
            interrupted,
            recorded_at: Utc::now(),
        })
        .await;

        let duration = started.elapsed();
        self.deps.events.publish(AgentEvent::TurnProcessed {
            tenant_id: tenant_id.clone(),
            session_id: session_id.clone(),
            situation: outcome.situation,
            tool_used: outcome.tool_used.clone(),
            duration_ms: millis(duration),
            interrupted,
            audio_segments,
        });
        if let Some(tool) = &outcome.tool_used {
            self.deps.events.publish(AgentEvent::ToolUsed {
                tenant_id: tenant_id.clone(),
                session_id: session_id.clone(),
                tool: tool.clone(),
            });
        }
        tracing::info!(
            %session_id,
            %tenant_id,
            situation = %outcome.situation,
            tool_used = outcome.tool_used.as_deref().unwrap_or("none"),
            api_calls = outcome.api_calls,
            interrupted,
            duration_ms = millis(duration),
            "turn processed"
        );

        Ok(TurnResult {
            session_id: session_id.clone(),
            response: outcome.response,
            situation: outcome.situation,
            tool_used: outcome.tool_used,
            interrupted,
            api_calls: outcome.api_calls,
            duration_ms: millis(duration),
            transcript,
            audio_segments,
        })
    }

    async fn speak(
        &self,
        text: &str,
        channel: &mut EventChannel,
        watch: &InterruptWatch,
    ) -> Result<Spoken, RuntimeError> {
        let mut stream = self.deps.text_to_speech.synthesize(text);
        let mut segments = 0;
        loop {
            if watch.is_interrupted() {
                return Ok(Spoken {
                    segments,
                    interrupted: true,
                });
            }
            let segment = tokio::select! {
                biased;
                _ = watch.interrupted() => {
                    return Ok(Spoken { segments, interrupted: true });
                }
                segment = stream.recv() => segment,
            };
            let Some(segment) = segment else {
                return Ok(Spoken {
                    segments,
                    interrupted: false,
                });
            };
            channel.audio_chunk(&segment?);
            segments += 1;
        }
    }

    /// Persistence failures are logged; the caller already has the answer.
    async fn record_exchange(
        &self,
        session: &mut SessionState,
        message: &str,
        response: &str,
        situation: Situation,
    ) {
        session.history.push(HistoryEntry::user(message));
        session.history.push(HistoryEntry::assistant(response));
        session.situation = situation;
        if let Err(error) = self
            .deps
            .sessions
            .save(&self.request.tenant_id, &self.request.session_id, session)
            .await
        {
            tracing::warn!(
                session_id = %self.request.session_id,
                %error,
                "failed to persist session state"
            );
        }
    }

    async fn audit(&self, record: ConversationRecord) {
        if let Err(error) = self.deps.conversations.append(record).await {
            tracing::warn!(
                session_id = %self.request.session_id,
                tenant_id = %self.request.tenant_id,
                %error,
                "failed to record conversation"
            );
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
