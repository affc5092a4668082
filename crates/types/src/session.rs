use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Situation, StoreError};

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::Assistant,
            content: content.into(),
        }
    }
}

/// Durable conversation state for one tenant + session pair.
///
/// `context` carries auxiliary fields (caller classification and the like)
/// that the turn engine passes through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub situation: Situation,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(now: DateTime<Utc>) -> Self {
        let mut context = Map::new();
        context.insert("caller_type".to_owned(), Value::Null);
        Self {
            situation: Situation::Introduction,
            history: Vec::new(),
            context,
            created_at: now,
            updated_at: now,
        }
    }

    /// Drops the oldest entries until at most `limit` remain.
    pub fn truncate_history(&mut self, limit: usize) {
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }
}

/// TTL-backed key-value store for [`SessionState`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionState>, StoreError>;

    async fn put(
        &self,
        tenant_id: &str,
        session_id: &str,
        state: &SessionState,
        ttl: Duration,
    ) -> Result<(), StoreError>;
}

/// Proof of holding a session lock. Only the matching token releases it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken {
    pub key: String,
    pub value: String,
}

/// Conditional set-if-absent primitive with expiry.
#[async_trait]
pub trait SessionLock: Send + Sync {
    /// Returns `None` when another live holder owns `key`.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError>;

    async fn release(&self, token: &LockToken) -> Result<(), StoreError>;
}
