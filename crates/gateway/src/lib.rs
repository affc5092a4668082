//! Admission and fan-out layer in front of the turn engine.
//!
//! [`TurnGateway`] is what transport bridges talk to: it rate-limits and
//! schedules submissions, routes per-session turn events to subscribers and
//! answers interrupt and status requests.

use std::sync::Arc;

use runtime::{
    DEFAULT_INTERRUPT_REASON, InterruptSignal, TurnDependencies, TurnInput, TurnRequest,
    TurnResult,
};
use tokio::sync::broadcast;
use types::{RateLimiter, RuntimeError, SchedulerConfig, TurnEvent, TurnPhase};

mod scheduler;
mod session;
mod turn_runner;

pub use scheduler::{Job, JobOutcome, JobRunner, JobScheduler};
pub use turn_runner::{ProcessJobRunner, SUPERSEDED_REASON};

use session::SessionRegistry;

const EVENT_BUFFER_CAPACITY: usize = 256;

/// Caller-facing turn submission. A missing session id starts a new session.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSubmission {
    pub tenant_id: String,
    pub session_id: Option<String>,
    pub input: TurnInput,
}

impl TurnSubmission {
    pub fn text(
        tenant_id: impl Into<String>,
        session_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session_id,
            input: TurnInput::Text(message.into()),
        }
    }
}

pub struct TurnGateway {
    scheduler: JobScheduler,
    sessions: Arc<SessionRegistry>,
    interrupts: Arc<InterruptSignal>,
}

impl TurnGateway {
    pub fn new(
        deps: Arc<TurnDependencies>,
        rate_limiter: Arc<dyn RateLimiter>,
        config: &SchedulerConfig,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::default());
        let interrupts = Arc::clone(&deps.interrupts);
        let runner = Arc::new(ProcessJobRunner::new(deps, Arc::clone(&sessions)));
        Self {
            scheduler: JobScheduler::new(runner, rate_limiter, config),
            sessions,
            interrupts,
        }
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub async fn submit(&self, submission: TurnSubmission) -> Result<TurnResult, RuntimeError> {
        let TurnSubmission {
            tenant_id,
            session_id,
            input,
        } = submission;
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.scheduler
            .submit(TurnRequest {
                tenant_id,
                session_id,
                input,
            })
            .await
    }

    /// Turn events for `session_id`, starting with the next one published.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<TurnEvent> {
        self.sessions.subscribe(session_id)
    }

    pub fn interrupt(&self, session_id: &str, reason: Option<&str>) -> bool {
        self.interrupts
            .signal(session_id, reason.unwrap_or(DEFAULT_INTERRUPT_REASON))
    }

    pub fn status(&self, session_id: &str) -> TurnPhase {
        self.sessions.phase(session_id)
    }

    pub fn active_turns(&self, session_id: &str) -> usize {
        self.sessions.active_count(session_id)
    }

    pub async fn shutdown(&self) {
        self.scheduler.drain().await;
    }
}
