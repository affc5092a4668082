use std::collections::HashMap;

use async_trait::async_trait;
use types::{StoreError, Tenant, TenantDirectory};

#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    tenants: HashMap<String, Tenant>,
}

impl InMemoryTenantDirectory {
    pub fn new(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        Self {
            tenants: tenants
                .into_iter()
                .map(|tenant| (tenant.id.clone(), tenant))
                .collect(),
        }
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>, StoreError> {
        Ok(self.tenants.get(tenant_id).cloned())
    }
}
