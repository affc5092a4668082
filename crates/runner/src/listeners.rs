//! Process-side consumer of the agent event bus.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::{sync::broadcast, task::JoinHandle};
use types::{AgentEvent, EventBus};

/// Running totals of what the bus has reported since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityTally {
    pub sessions_started: u64,
    pub turns_processed: u64,
    pub turns_interrupted: u64,
    pub tools_used: u64,
    pub tours_booked: u64,
    pub notes_created: u64,
    pub contacts_updated: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

/// Background task that logs domain and lifecycle events and keeps an
/// [`ActivityTally`]. The task stops when the listener is dropped.
#[derive(Debug)]
pub struct ActivityListener {
    tally: Arc<Mutex<ActivityTally>>,
    task: JoinHandle<()>,
}

impl ActivityListener {
    /// Subscribes before returning, so events published afterwards are
    /// never missed. Must be called inside a Tokio runtime.
    pub fn spawn(events: &EventBus) -> Self {
        let receiver = events.subscribe();
        let tally = Arc::new(Mutex::new(ActivityTally::default()));
        let task = tokio::spawn(listen(receiver, Arc::clone(&tally)));
        Self { tally, task }
    }

    pub fn tally(&self) -> ActivityTally {
        *lock(&self.tally)
    }
}

impl Drop for ActivityListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn listen(mut receiver: broadcast::Receiver<AgentEvent>, tally: Arc<Mutex<ActivityTally>>) {
    loop {
        match receiver.recv().await {
            Ok(event) => handle(&event, &mut lock(&tally)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener fell behind the agent event bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::debug!("agent event bus closed; activity listener stopped");
}

fn handle(event: &AgentEvent, tally: &mut ActivityTally) {
    match event {
        AgentEvent::SessionStarted {
            tenant_id,
            session_id,
        } => {
            tally.sessions_started += 1;
            tracing::info!(%tenant_id, %session_id, "session started");
        }
        AgentEvent::TurnProcessed {
            tenant_id,
            session_id,
            situation,
            interrupted,
            duration_ms,
            ..
        } => {
            tally.turns_processed += 1;
            if *interrupted {
                tally.turns_interrupted += 1;
            }
            tracing::debug!(%tenant_id, %session_id, %situation, interrupted, duration_ms, "turn recorded");
        }
        AgentEvent::ToolUsed { .. } => tally.tools_used += 1,
        AgentEvent::TourBooked {
            tenant_id,
            tour_id,
            customer_name,
            tour_date,
            location,
        } => {
            tally.tours_booked += 1;
            tracing::info!(
                %tenant_id,
                %tour_id,
                %customer_name,
                %tour_date,
                %location,
                "queueing CRM sync and confirmation SMS for booked tour"
            );
        }
        AgentEvent::NoteCreated { tenant_id, note_id } => {
            tally.notes_created += 1;
            tracing::info!(%tenant_id, %note_id, "queueing note for search indexing");
        }
        AgentEvent::ContactUpdated {
            tenant_id,
            contact_id,
            name,
        } => {
            tally.contacts_updated += 1;
            tracing::info!(%tenant_id, %contact_id, %name, "queueing contact CRM sync");
        }
        AgentEvent::JobCompleted {
            job_id,
            duration_ms,
        } => {
            tally.jobs_completed += 1;
            tracing::debug!(%job_id, duration_ms, "job completed");
        }
        AgentEvent::JobFailed { job_id, error } => {
            tally.jobs_failed += 1;
            tracing::warn!(%job_id, %error, "job failed");
        }
        AgentEvent::StateChanged { .. }
        | AgentEvent::StateEntered { .. }
        | AgentEvent::Interrupted { .. }
        | AgentEvent::JobStarted { .. } => {}
    }
}

fn lock(tally: &Mutex<ActivityTally>) -> MutexGuard<'_, ActivityTally> {
    tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
