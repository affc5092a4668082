use std::time::Duration;

use async_trait::async_trait;

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    pub fn deny(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }
}

/// Fixed-window request counter keyed by tenant.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check_and_increment(&self, tenant_id: &str) -> Result<RateLimitDecision, StoreError>;
}
