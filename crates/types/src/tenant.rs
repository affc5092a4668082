use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, StoreError>;
}
