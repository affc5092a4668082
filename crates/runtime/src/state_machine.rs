use std::sync::{Mutex, PoisonError};

use types::{AgentEvent, EventBus, RuntimeError, TurnPhase};

#[derive(Debug, Clone, Copy)]
struct Phases {
    current: TurnPhase,
    previous: Option<TurnPhase>,
}

/// Guards the legal phase transitions of one session's turn.
///
/// Every transition is announced on the bus as `StateChanged` followed by
/// `StateEntered`. Re-entering the current phase is a silent no-op.
#[derive(Debug)]
pub struct TurnStateMachine {
    session_id: String,
    phases: Mutex<Phases>,
    events: EventBus,
}

impl TurnStateMachine {
    pub fn new(session_id: impl Into<String>, events: EventBus) -> Self {
        Self {
            session_id: session_id.into(),
            phases: Mutex::new(Phases {
                current: TurnPhase::Idle,
                previous: None,
            }),
            events,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn current(&self) -> TurnPhase {
        self.lock().current
    }

    pub fn previous(&self) -> Option<TurnPhase> {
        self.lock().previous
    }

    pub fn set_state(&self, next: TurnPhase) -> Result<(), RuntimeError> {
        let from = {
            let mut phases = self.lock();
            let from = phases.current;
            if from == next {
                return Ok(());
            }
            if !from.can_transition_to(next) {
                return Err(RuntimeError::IllegalTransition {
                    session_id: self.session_id.clone(),
                    from,
                    to: next,
                });
            }
            phases.previous = Some(from);
            phases.current = next;
            from
        };
        tracing::debug!(session_id = %self.session_id, ?from, to = ?next, "turn phase changed");
        self.announce(from, next, false);
        Ok(())
    }

    /// Moves to `next` regardless of the transition table. Used for recovery
    /// and for returning to `Idle` at the end of a turn.
    pub fn force_state(&self, next: TurnPhase) {
        let from = {
            let mut phases = self.lock();
            let from = phases.current;
            phases.previous = Some(from);
            phases.current = next;
            from
        };
        tracing::warn!(session_id = %self.session_id, ?from, to = ?next, "turn phase forced");
        self.announce(from, next, true);
    }

    fn announce(&self, from: TurnPhase, to: TurnPhase, forced: bool) {
        self.events.publish(AgentEvent::StateChanged {
            session_id: self.session_id.clone(),
            from,
            to,
            forced,
        });
        self.events.publish(AgentEvent::StateEntered {
            session_id: self.session_id.clone(),
            state: to,
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Phases> {
        self.phases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
