use std::{sync::Arc, time::Duration};

use chrono::Utc;
use types::{SessionConfig, SessionState, SessionStore, StoreError};

/// Loads and persists [`SessionState`] with the configured TTL and history
/// window.
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
    history_limit: usize,
}

impl SessionRepository {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration, history_limit: usize) -> Self {
        Self {
            store,
            ttl,
            history_limit,
        }
    }

    pub fn from_config(store: Arc<dyn SessionStore>, config: &SessionConfig) -> Self {
        Self::new(
            store,
            Duration::from_secs(config.ttl_secs),
            config.history_limit,
        )
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Returns the stored state, or persists and returns a fresh one. The
    /// flag is `true` when the state was created by this call.
    pub async fn load_or_create(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<(SessionState, bool), StoreError> {
        if let Some(state) = self.store.get(tenant_id, session_id).await? {
            return Ok((state, false));
        }
        let state = SessionState::new(Utc::now());
        self.store
            .put(tenant_id, session_id, &state, self.ttl)
            .await?;
        tracing::debug!(tenant_id, session_id, "created session state");
        Ok((state, true))
    }

    /// Truncates history to the window and refreshes the TTL.
    pub async fn save(
        &self,
        tenant_id: &str,
        session_id: &str,
        state: &mut SessionState,
    ) -> Result<(), StoreError> {
        state.updated_at = Utc::now();
        state.truncate_history(self.history_limit);
        self.store.put(tenant_id, session_id, state, self.ttl).await
    }
}
