//! Tenant and subscription-plan lookups.

use async_trait::async_trait;

use crate::access::models::{PlanId, Tenant, TenantId};
use crate::error::Result;

/// Source of tenant records and plan contents.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>>;

    /// Codes of active modules attached to `plan_id` through an active pivot row.
    async fn plan_module_codes(&self, plan_id: PlanId) -> Result<Vec<String>>;
}
