mod config;
mod conversation;
mod error;
mod events;
mod model;
mod phase;
mod provider;
mod rate_limit;
mod session;
mod situation;
mod speech;
mod tenant;
mod tool;
mod tracing;

pub use config::{
    AgentConfig, ConfigError, DelayRange, LatencyConfig, OPENAI_DEFAULT_BASE_URL,
    OPENAI_PROVIDER_ID, OpenAIProviderConfig, ProviderConfigs, ProviderSelection,
    RateLimitConfig, RuntimeConfig, SUPPORTED_CONFIG_MAJOR_VERSION, SchedulerConfig,
    SessionConfig, validate_config_version,
};
pub use conversation::{ConversationLog, ConversationRecord};
pub use error::{
    ProviderError, RuntimeError, SpeechError, StoreError, ToolError, UnknownSituation,
};
pub use events::{AgentEvent, DEFAULT_EVENT_BUS_CAPACITY, EventBus, TurnEvent};
pub use model::{
    Context, FINISH_REASON_STOP, FINISH_REASON_TOOL_CALLS, Message, MessageRole, ModelId,
    ProviderId, StreamItem, ToolCall, ToolCallDelta,
};
pub use phase::TurnPhase;
pub use provider::{Provider, ProviderStream};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use session::{
    DEFAULT_HISTORY_LIMIT, HistoryEntry, HistoryRole, LockToken, SessionLock, SessionState,
    SessionStore,
};
pub use situation::{SWITCH_SITUATION_TOOL, Situation};
pub use speech::{AudioInput, AudioSegment, SpeechStream, SpeechToText, TextToSpeech, Transcription};
pub use tenant::{Tenant, TenantDirectory};
pub use tool::{FunctionDecl, Tool, ToolParameterSchema};
pub use tracing::init_tracing;
