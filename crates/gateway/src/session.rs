use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use runtime::TurnProcess;
use tokio::sync::broadcast;
use types::{TurnEvent, TurnPhase};

use crate::EVENT_BUFFER_CAPACITY;

/// Per-session fan-out channel plus the turn processes currently running
/// for it. A superseded process stays listed until it winds down.
struct SessionSlot {
    events: broadcast::Sender<TurnEvent>,
    active: Vec<Arc<TurnProcess>>,
}

impl SessionSlot {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_CAPACITY);
        Self {
            events,
            active: Vec::new(),
        }
    }
}

#[derive(Default)]
pub(crate) struct SessionRegistry {
    slots: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionRegistry {
    pub(crate) fn sender(&self, session_id: &str) -> broadcast::Sender<TurnEvent> {
        self.lock()
            .entry(session_id.to_owned())
            .or_insert_with(SessionSlot::new)
            .events
            .clone()
    }

    pub(crate) fn subscribe(&self, session_id: &str) -> broadcast::Receiver<TurnEvent> {
        self.sender(session_id).subscribe()
    }

    /// Registers `process` and returns the processes it supersedes.
    pub(crate) fn activate(&self, process: Arc<TurnProcess>) -> Vec<Arc<TurnProcess>> {
        let mut slots = self.lock();
        let slot = slots
            .entry(process.session_id().to_owned())
            .or_insert_with(SessionSlot::new);
        let superseded = slot.active.clone();
        slot.active.push(process);
        superseded
    }

    pub(crate) fn deactivate(&self, session_id: &str, process_id: &str) {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(session_id) else {
            return;
        };
        slot.active.retain(|process| process.id() != process_id);
        if slot.active.is_empty() && slot.events.receiver_count() == 0 {
            slots.remove(session_id);
        }
    }

    /// Phase of the newest process still doing work, `Idle` otherwise.
    pub(crate) fn phase(&self, session_id: &str) -> TurnPhase {
        self.lock()
            .get(session_id)
            .and_then(|slot| {
                slot.active
                    .iter()
                    .rev()
                    .map(|process| process.phase())
                    .find(|phase| *phase != TurnPhase::Idle)
            })
            .unwrap_or(TurnPhase::Idle)
    }

    pub(crate) fn active_count(&self, session_id: &str) -> usize {
        self.lock()
            .get(session_id)
            .map_or(0, |slot| slot.active.len())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
