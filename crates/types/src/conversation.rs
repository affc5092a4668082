use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Situation, StoreError};

/// One completed or interrupted exchange, kept for audit and analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub tenant_id: String,
    pub session_id: String,
    pub message: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_used: Option<String>,
    pub situation: Situation,
    pub interrupted: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only audit trail of turns.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn append(&self, record: ConversationRecord) -> Result<(), StoreError>;
}
