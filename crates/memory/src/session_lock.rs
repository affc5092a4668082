use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};
use types::{LockToken, SessionLock, StoreError};
use uuid::Uuid;

struct LockEntry {
    value: String,
    expires_at: Instant,
}

/// Set-if-absent lock table. Entries past their expiry count as absent, so
/// a holder that never released cannot stall the key forever.
#[derive(Default)]
pub struct InMemorySessionLock {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl InMemorySessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_held(&self, key: &str) -> bool {
        self.entries
            .lock()
            .await
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }
}

#[async_trait]
impl SessionLock for InMemorySessionLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > now {
                return Ok(None);
            }
            tracing::warn!(%key, "reclaiming expired session lock");
        }

        let value = Uuid::new_v4().to_string();
        entries.insert(
            key.to_owned(),
            LockEntry {
                value: value.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(LockToken {
            key: key.to_owned(),
            value,
        }))
    }

    async fn release(&self, token: &LockToken) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        if entries
            .get(&token.key)
            .is_some_and(|entry| entry.value == token.value)
        {
            entries.remove(&token.key);
        } else {
            tracing::debug!(key = %token.key, "lock already expired or taken over");
        }
        Ok(())
    }
}
