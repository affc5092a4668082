//! Turn engine: phase tracking, barge-in, per-session exclusion and the
//! two-pass model/tool orchestration behind every caller turn.

mod channel;
mod interrupt;
mod latency;
mod orchestrator;
mod prompt;
mod session;
mod session_mutex;
mod speech;
mod state_machine;
mod stream_assembler;
mod turn_process;

pub use channel::EventChannel;
pub use interrupt::{
    DEFAULT_INTERRUPT_REASON, DEFAULT_STALE_FLAG_TTL, InterruptSignal, InterruptWatch,
};
pub use latency::LatencySimulator;
pub use orchestrator::{
    BARGE_IN_FIRST_PASS, BARGE_IN_SECOND_PASS, BARGE_IN_TOOL, OrchestratorOutcome,
    TurnOrchestrator, TurnPlan, switch_situation,
};
pub use prompt::{
    PromptBuilder, PromptContext, TenantPromptBuilder, compose_system_prompt, history_messages,
};
pub use session::SessionRepository;
pub use session_mutex::{SessionMutex, lock_key};
pub use speech::{MockSpeechToText, MockTextToSpeech, estimate_duration_ms, split_segments};
pub use state_machine::TurnStateMachine;
pub use stream_assembler::{AssembledStream, StreamAssembler};
pub use turn_process::{
    BARGE_IN_SPEECH, TurnDependencies, TurnInput, TurnProcess, TurnRequest, TurnResult,
};

#[cfg(test)]
mod tests;
