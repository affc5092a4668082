use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use types::{HistoryRole, Message, RuntimeError, SessionState, TenantDirectory};

#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub system_prompt: String,
    /// History followed by the current user message. Excludes the system
    /// message.
    pub messages: Vec<Message>,
}

#[async_trait]
pub trait PromptBuilder: Send + Sync {
    async fn build(
        &self,
        tenant_id: &str,
        state: &SessionState,
        user_message: &str,
    ) -> Result<PromptContext, RuntimeError>;
}

/// Layers the tenant's base prompt, the active situation and the wall clock.
pub struct TenantPromptBuilder {
    tenants: Arc<dyn TenantDirectory>,
}

impl TenantPromptBuilder {
    pub fn new(tenants: Arc<dyn TenantDirectory>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl PromptBuilder for TenantPromptBuilder {
    async fn build(
        &self,
        tenant_id: &str,
        state: &SessionState,
        user_message: &str,
    ) -> Result<PromptContext, RuntimeError> {
        let tenant = self
            .tenants
            .get(tenant_id)
            .await?
            .ok_or_else(|| RuntimeError::UnknownTenant {
                tenant_id: tenant_id.to_owned(),
            })?;

        let system_prompt = compose_system_prompt(
            &tenant.system_prompt,
            &tenant.name,
            state,
            Utc::now(),
        );
        Ok(PromptContext {
            system_prompt,
            messages: history_messages(state, user_message),
        })
    }
}

pub fn compose_system_prompt(
    base_prompt: &str,
    tenant_name: &str,
    state: &SessionState,
    now: DateTime<Utc>,
) -> String {
    format!(
        "{base}\n\n## Situation Context\nCurrent situation: {situation}\n\n{situation_prompt}\n\n## Runtime Context\nCompany: {tenant_name}\nCurrent date: {date}\nCurrent time (UTC): {time}",
        base = base_prompt.trim_end(),
        situation = state.situation,
        situation_prompt = state.situation.system_prompt(),
        date = now.format("%Y-%m-%d"),
        time = now.format("%H:%M"),
    )
}

pub fn history_messages(state: &SessionState, user_message: &str) -> Vec<Message> {
    state
        .history
        .iter()
        .map(|entry| match entry.role {
            HistoryRole::User => Message::user(entry.content.clone()),
            HistoryRole::Assistant => Message::assistant(entry.content.clone()),
        })
        .chain(std::iter::once(Message::user(user_message.to_owned())))
        .collect()
}
