use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use runtime::{TurnRequest, TurnResult};
use tokio::sync::oneshot;
use types::{RateLimiter, RuntimeError, SchedulerConfig};

pub type JobOutcome = Result<TurnResult, RuntimeError>;

/// A rate-checked turn request waiting for or holding a concurrency slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub request: TurnRequest,
}

#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: Job) -> JobOutcome;
}

struct Queued {
    job: Job,
    responder: oneshot::Sender<JobOutcome>,
}

#[derive(Default)]
struct SchedulerState {
    active: usize,
    queue: VecDeque<Queued>,
    draining: bool,
}

struct Shared {
    state: Mutex<SchedulerState>,
    max_concurrent_jobs: usize,
    drain_poll_interval: Duration,
    runner: Arc<dyn JobRunner>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Global concurrency ceiling with a FIFO waiting line.
#[derive(Clone)]
pub struct JobScheduler {
    shared: Arc<Shared>,
}

impl JobScheduler {
    pub fn new(
        runner: Arc<dyn JobRunner>,
        rate_limiter: Arc<dyn RateLimiter>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                max_concurrent_jobs: config.max_concurrent_jobs.max(1),
                drain_poll_interval: Duration::from_millis(config.drain_poll_interval_ms.max(1)),
                runner,
                rate_limiter,
            }),
        }
    }

    pub fn active_jobs(&self) -> usize {
        self.shared.lock().active
    }

    pub fn queued_jobs(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_draining(&self) -> bool {
        self.shared.lock().draining
    }

    /// Resolves once the job has run. Rate-limited and post-shutdown
    /// submissions are rejected before a job is created or queued.
    pub async fn submit(&self, request: TurnRequest) -> JobOutcome {
        let decision = self
            .shared
            .rate_limiter
            .check_and_increment(&request.tenant_id)
            .await?;
        if !decision.allowed {
            let retry_after = decision.retry_after.unwrap_or_default();
            tracing::warn!(
                tenant_id = %request.tenant_id,
                retry_after_secs = retry_after.as_secs(),
                "tenant rate limit exceeded"
            );
            return Err(RuntimeError::RateLimitExceeded {
                tenant_id: request.tenant_id,
                retry_after,
            });
        }

        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            request,
        };
        let job_id = job.id.clone();
        let (responder, completion) = oneshot::channel();
        {
            let mut state = self.shared.lock();
            if state.draining {
                return Err(RuntimeError::ShutdownCancelled);
            }
            let queued = Queued { job, responder };
            if state.active < self.shared.max_concurrent_jobs {
                state.active += 1;
                start(Arc::clone(&self.shared), queued);
            } else {
                state.queue.push_back(queued);
                tracing::debug!(
                    %job_id,
                    position = state.queue.len(),
                    active = state.active,
                    "job queued behind concurrency ceiling"
                );
            }
        }

        completion
            .await
            .unwrap_or(Err(RuntimeError::JobAborted { job_id }))
    }

    /// Rejects every queued job, then waits for active jobs to finish.
    pub async fn drain(&self) {
        let rejected = {
            let mut state = self.shared.lock();
            state.draining = true;
            state.queue.drain(..).collect::<Vec<_>>()
        };
        tracing::info!(rejected = rejected.len(), "draining job scheduler");
        for queued in rejected {
            let _ = queued.responder.send(Err(RuntimeError::ShutdownCancelled));
        }

        loop {
            let active = self.active_jobs();
            if active == 0 {
                break;
            }
            tracing::debug!(active, "waiting for active jobs");
            tokio::time::sleep(self.shared.drain_poll_interval).await;
        }
        tracing::info!("job scheduler drained");
    }
}

/// Held by a running job. Dropping it hands the slot to the next queued job
/// or frees it.
struct ActiveSlot {
    shared: Arc<Shared>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let next = {
            let mut state = self.shared.lock();
            let next = state.queue.pop_front();
            if next.is_none() {
                state.active = state.active.saturating_sub(1);
            }
            next
        };
        if let Some(next) = next {
            start(Arc::clone(&self.shared), next);
        }
    }
}

fn start(shared: Arc<Shared>, queued: Queued) {
    tokio::spawn(async move {
        let slot = ActiveSlot {
            shared: Arc::clone(&shared),
        };
        let Queued { job, responder } = queued;
        let outcome = shared.runner.run(job).await;
        let _ = responder.send(outcome);
        drop(slot);
    });
}
