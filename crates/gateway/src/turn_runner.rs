use std::sync::Arc;

use async_trait::async_trait;
use runtime::{TurnDependencies, TurnProcess};
use types::AgentEvent;

use crate::{Job, JobOutcome, JobRunner, session::SessionRegistry};

pub const SUPERSEDED_REASON: &str = "new-job";

/// Runs each admitted job as a [`TurnProcess`], interrupting any process
/// still running for the same session.
pub struct ProcessJobRunner {
    deps: Arc<TurnDependencies>,
    sessions: Arc<SessionRegistry>,
}

impl ProcessJobRunner {
    pub(crate) fn new(deps: Arc<TurnDependencies>, sessions: Arc<SessionRegistry>) -> Self {
        Self { deps, sessions }
    }
}

#[async_trait]
impl JobRunner for ProcessJobRunner {
    async fn run(&self, job: Job) -> JobOutcome {
        let Job { id: job_id, request } = job;
        let tenant_id = request.tenant_id.clone();
        let session_id = request.session_id.clone();
        tracing::info!(%job_id, %tenant_id, %session_id, "job started");
        self.deps.events.publish(AgentEvent::JobStarted {
            job_id: job_id.clone(),
            tenant_id: tenant_id.clone(),
            session_id: session_id.clone(),
        });

        let process = Arc::new(TurnProcess::new(request, Arc::clone(&self.deps)));
        for stale in self.sessions.activate(Arc::clone(&process)) {
            tracing::warn!(
                %job_id,
                %session_id,
                stale_process = %stale.id(),
                "interrupting stale process for session"
            );
            stale.interrupt(SUPERSEDED_REASON);
        }

        let outcome = process.run(self.sessions.sender(&session_id)).await;
        self.sessions.deactivate(&session_id, process.id());

        match &outcome {
            Ok(result) => {
                tracing::info!(
                    %job_id,
                    duration_ms = result.duration_ms,
                    situation = %result.situation,
                    audio_segments = result.audio_segments,
                    tool_used = result.tool_used.as_deref().unwrap_or("none"),
                    interrupted = result.interrupted,
                    "job complete"
                );
                self.deps.events.publish(AgentEvent::JobCompleted {
                    job_id,
                    duration_ms: result.duration_ms,
                });
            }
            Err(error) => {
                tracing::error!(%job_id, %error, "job failed");
                self.deps.events.publish(AgentEvent::JobFailed {
                    job_id,
                    error: error.to_string(),
                });
            }
        }
        outcome
    }
}
