use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;
use types::{ConversationLog, ConversationRecord, StoreError};

pub const DEFAULT_CONVERSATION_LOG_CAPACITY: usize = 10_000;

/// Bounded in-process audit trail. The oldest records are dropped once
/// `capacity` is reached.
#[derive(Debug)]
pub struct InMemoryConversationLog {
    records: Mutex<VecDeque<ConversationRecord>>,
    capacity: usize,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CONVERSATION_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Records for one tenant, oldest first.
    pub async fn for_tenant(&self, tenant_id: &str) -> Vec<ConversationRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|record| record.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryConversationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationLog for InMemoryConversationLog {
    async fn append(&self, record: ConversationRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records.len() == self.capacity {
            records.pop_front();
        }
        tracing::debug!(
            tenant_id = %record.tenant_id,
            session_id = %record.session_id,
            tool_used = record.tool_used.as_deref().unwrap_or("none"),
            "conversation recorded"
        );
        records.push_back(record);
        Ok(())
    }
}
