use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};
use types::{SessionState, SessionStore, StoreError};

struct StoredSession {
    payload: String,
    expires_at: Instant,
}

/// Process-local [`SessionStore`] that keeps sessions as JSON with an expiry.
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: Mutex<HashMap<String, StoredSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        evict_expired(&mut entries, Instant::now());
        entries.len()
    }

    /// Entry count including expired sessions not yet swept.
    #[cfg(test)]
    pub(crate) async fn stored_entries(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

pub(crate) fn session_key(tenant_id: &str, session_id: &str) -> String {
    format!("session:{tenant_id}:{session_id}")
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionState>, StoreError> {
        let key = session_key(tenant_id, session_id);
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(&key) else {
            return Ok(None);
        };
        if entry.expires_at <= Instant::now() {
            entries.remove(&key);
            tracing::debug!(%key, "session entry expired");
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&entry.payload)?))
    }

    async fn put(
        &self,
        tenant_id: &str,
        session_id: &str,
        state: &SessionState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(state)?;
        let key = session_key(tenant_id, session_id);
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        evict_expired(&mut entries, now);
        entries.insert(
            key,
            StoredSession {
                payload,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

/// Abandoned sessions are never read again, so writes sweep them out.
fn evict_expired(entries: &mut HashMap<String, StoredSession>, now: Instant) {
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    let evicted = before - entries.len();
    if evicted > 0 {
        tracing::debug!(evicted, "evicted expired sessions");
    }
}
