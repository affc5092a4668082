use std::time::Duration;

use thiserror::Error;

use crate::{ProviderId, TurnPhase};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing API key for provider `{provider}`")]
    MissingApiKey { provider: ProviderId },
    #[error("provider transport failed for `{provider}`: {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    #[error("provider `{provider}` returned HTTP {status}: {message}")]
    HttpStatus {
        provider: ProviderId,
        status: u16,
        message: String,
    },
    #[error("provider response parsing failed for `{provider}`: {message}")]
    ResponseParse {
        provider: ProviderId,
        message: String,
    },
    #[error("provider request failed for {provider}: {message}")]
    RequestFailed {
        provider: ProviderId,
        message: String,
    },
    #[error("provider serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool `{tool}` is not registered")]
    UnknownTool { tool: String },
    #[error("invalid arguments for tool {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool execution failed for {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("tool {tool} timed out after {timeout:?}")]
    TimedOut { tool: String, timeout: Duration },
    #[error("tool serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend unavailable: {message}")]
    Unavailable { message: String },
    #[error("store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech-to-text failed: {message}")]
    Transcription { message: String },
    #[error("text-to-speech failed: {message}")]
    Synthesis { message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown situation `{name}`")]
pub struct UnknownSituation {
    pub name: String,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Speech(#[from] SpeechError),
    #[error("illegal transition {from:?} -> {to:?} for session `{session_id}`")]
    IllegalTransition {
        session_id: String,
        from: TurnPhase,
        to: TurnPhase,
    },
    #[error("session `{session_id}` is currently being processed; retry shortly")]
    SessionBusy {
        session_id: String,
        retry_after: Duration,
    },
    #[error("rate limit exceeded for tenant `{tenant_id}`; retry after {}s", retry_after.as_secs())]
    RateLimitExceeded {
        tenant_id: String,
        retry_after: Duration,
    },
    #[error("job cancelled by shutdown")]
    ShutdownCancelled,
    #[error("job `{job_id}` ended without reporting a result")]
    JobAborted { job_id: String },
    #[error("tenant `{tenant_id}` not found")]
    UnknownTenant { tenant_id: String },
    #[error("model stream lost: {0}")]
    ConnectionLost(String),
}

impl RuntimeError {
    /// Busy and rate-limited turns may be resubmitted; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SessionBusy { .. } | Self::RateLimitExceeded { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::SessionBusy { retry_after, .. } | Self::RateLimitExceeded { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}
