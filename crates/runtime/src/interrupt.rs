use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use types::{AgentEvent, EventBus};

pub const DEFAULT_INTERRUPT_REASON: &str = "barge-in";
/// How long a raised flag nobody is watching survives before it is swept.
pub const DEFAULT_STALE_FLAG_TTL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct InterruptFlag {
    generation: u64,
    token: CancellationToken,
    reason: Option<String>,
    raised_at: Option<Instant>,
    watched: bool,
}

impl InterruptFlag {
    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        !self.watched
            && self
                .raised_at
                .is_some_and(|raised_at| now.saturating_duration_since(raised_at) >= ttl)
    }
}

/// Handle a running turn holds to observe its session's interrupt flag.
///
/// The handle keeps seeing the flag it was issued for even after the session
/// entry is cleared for a later turn.
#[derive(Debug, Clone)]
pub struct InterruptWatch {
    session_id: String,
    generation: u64,
    token: CancellationToken,
}

impl InterruptWatch {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the flag is set.
    pub async fn interrupted(&self) {
        self.token.cancelled().await;
    }
}

/// Process-wide per-session barge-in flags.
#[derive(Debug)]
pub struct InterruptSignal {
    flags: Mutex<HashMap<String, InterruptFlag>>,
    next_generation: AtomicU64,
    stale_after: Duration,
    events: EventBus,
}

impl InterruptSignal {
    pub fn new(events: EventBus) -> Self {
        Self::with_stale_after(events, DEFAULT_STALE_FLAG_TTL)
    }

    /// Flags raised for sessions with no running turn are dropped once they
    /// are older than `stale_after`.
    pub fn with_stale_after(events: EventBus, stale_after: Duration) -> Self {
        Self {
            flags: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            stale_after,
            events,
        }
    }

    /// Marks the session interrupted. Returns `false` when it already was, in
    /// which case nothing is published.
    pub fn signal(&self, session_id: &str, reason: &str) -> bool {
        {
            let now = Instant::now();
            let mut flags = self.lock();
            flags.retain(|_, flag| !flag.is_stale(now, self.stale_after));
            let flag = flags
                .entry(session_id.to_owned())
                .or_insert_with(|| self.new_flag());
            if flag.token.is_cancelled() {
                return false;
            }
            flag.reason = Some(reason.to_owned());
            flag.raised_at = Some(now);
            flag.token.cancel();
        }
        tracing::info!(session_id, reason, "interrupt signalled");
        self.events.publish(AgentEvent::Interrupted {
            session_id: session_id.to_owned(),
            reason: reason.to_owned(),
        });
        true
    }

    pub fn is_interrupted(&self, session_id: &str) -> bool {
        self.lock()
            .get(session_id)
            .is_some_and(|flag| flag.token.is_cancelled())
    }

    pub fn reason(&self, session_id: &str) -> Option<String> {
        self.lock()
            .get(session_id)
            .and_then(|flag| flag.reason.clone())
    }

    /// Drops the session's flag if it is set. An unset entry is left alone
    /// since it may belong to a turn that is still running. Returns whether
    /// a set flag was removed.
    pub fn clear(&self, session_id: &str) -> bool {
        let mut flags = self.lock();
        if !flags
            .get(session_id)
            .is_some_and(|flag| flag.token.is_cancelled())
        {
            return false;
        }
        flags.remove(session_id);
        tracing::debug!(session_id, "interrupt flag cleared");
        true
    }

    pub fn watch(&self, session_id: &str) -> InterruptWatch {
        let mut flags = self.lock();
        let flag = flags
            .entry(session_id.to_owned())
            .or_insert_with(|| self.new_flag());
        flag.watched = true;
        InterruptWatch {
            session_id: session_id.to_owned(),
            generation: flag.generation,
            token: flag.token.clone(),
        }
    }

    /// Removes the entry `watch` was issued for, unless a newer turn owns it.
    pub fn retire(&self, watch: &InterruptWatch) {
        let mut flags = self.lock();
        if flags
            .get(&watch.session_id)
            .is_some_and(|flag| flag.generation == watch.generation)
        {
            flags.remove(&watch.session_id);
        }
    }

    fn new_flag(&self) -> InterruptFlag {
        InterruptFlag {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
            reason: None,
            raised_at: None,
            watched: false,
        }
    }

    /// Number of sessions with a live flag entry.
    pub fn tracked_sessions(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, InterruptFlag>> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
