//! Subscription-plan entitlement.
//!
//! A tenant may use a module when its code is in the union of:
//! - active modules on the tenant's plan (through an active pivot row)
//! - the tenant's custom module-code overrides
//! - every module flagged core and active
//!
//! The set is computed once per tenant and cached. A principal without a
//! tenant, or with an unknown tenant, gets the core modules only.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::models::TenantId;
use crate::cache::{tenant_tag, Cache, CacheKey};
use crate::catalog::CatalogReader;
use crate::error::Result;
use crate::tenancy::TenantDirectory;

const DEFAULT_PLAN_TTL: Duration = Duration::from_secs(3600);

pub struct PlanEntitlementGate {
    tenants: Arc<dyn TenantDirectory>,
    catalog: Arc<dyn CatalogReader>,
    cache: Cache,
    ttl: Duration,
}

impl PlanEntitlementGate {
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        catalog: Arc<dyn CatalogReader>,
        cache: Cache,
    ) -> Self {
        Self {
            tenants,
            catalog,
            cache,
            ttl: DEFAULT_PLAN_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Whether the tenant is entitled to the module with `module_code`.
    #[instrument(level = "debug", skip(self))]
    pub async fn is_allowed(&self, tenant_id: Option<TenantId>, module_code: &str) -> Result<bool> {
        let allowed = self.entitled_modules(tenant_id).await?.contains(module_code);
        if !allowed {
            debug!(?tenant_id, module_code, "Module outside tenant entitlement");
        }
        Ok(allowed)
    }

    /// Every module code the tenant is entitled to.
    pub async fn entitled_modules(&self, tenant_id: Option<TenantId>) -> Result<BTreeSet<String>> {
        match tenant_id {
            None => self.core_modules().await,
            Some(tenant_id) => {
                let key = CacheKey::tenant_modules(tenant_id).with_ttl(self.ttl);
                self.cache
                    .remember(&key, || self.compute(tenant_id))
                    .await
            }
        }
    }

    /// Drop the tenant's cached set after its plan or overrides change.
    pub async fn invalidate(&self, tenant_id: TenantId) -> Result<()> {
        self.cache.forget(&CacheKey::tenant_modules(tenant_id)).await?;
        self.cache.invalidate_by_tag(&tenant_tag(tenant_id)).await?;
        debug!(tenant_id, "Tenant entitlement invalidated");
        Ok(())
    }

    async fn compute(&self, tenant_id: TenantId) -> Result<BTreeSet<String>> {
        let mut codes = self.core_modules().await?;

        let Some(tenant) = self.tenants.find_tenant(tenant_id).await? else {
            debug!(tenant_id, "Unknown tenant, core modules only");
            return Ok(codes);
        };

        if let Some(plan_id) = tenant.plan_id {
            codes.extend(self.tenants.plan_module_codes(plan_id).await?);
        }
        codes.extend(tenant.custom_module_codes);
        Ok(codes)
    }

    async fn core_modules(&self) -> Result<BTreeSet<String>> {
        Ok(self.catalog.core_module_codes().await?.into_iter().collect())
    }
}

impl std::fmt::Debug for PlanEntitlementGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanEntitlementGate")
            .field("cache", &self.cache)
            .field("ttl", &self.ttl)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::models::Tenant;
    use crate::store::{Fixture, MemoryStore, Plan, PlanModule};

    const FIXTURE: &str = r#"{
        "modules": [
            {"id": 1, "code": "hrm", "name": "HRM"},
            {"id": 2, "code": "finance", "name": "Finance"},
            {"id": 3, "code": "dashboard", "name": "Dashboard", "is_core": true},
            {"id": 4, "code": "crm", "name": "CRM"},
            {"id": 5, "code": "old-core", "name": "Old", "is_core": true, "is_active": false}
        ],
        "plans": [{"id": 1, "name": "starter", "modules": [
            {"module_id": 1},
            {"module_id": 2, "is_active": false}
        ]}],
        "tenants": [
            {"id": 10, "plan_id": 1, "custom_module_codes": ["crm"]},
            {"id": 11}
        ]
    }"#;

    fn setup() -> (Arc<MemoryStore>, PlanEntitlementGate) {
        let store = Arc::new(MemoryStore::from_fixture(Fixture::from_json(FIXTURE).unwrap()));
        let gate = PlanEntitlementGate::new(store.clone(), store.clone(), Cache::in_memory(100));
        (store, gate)
    }

    #[tokio::test]
    async fn test_union_of_plan_overrides_and_core() {
        let (_, gate) = setup();
        let codes = gate.entitled_modules(Some(10)).await.unwrap();
        assert_eq!(
            codes.into_iter().collect::<Vec<_>>(),
            vec!["crm", "dashboard", "hrm"]
        );
        assert!(!gate.is_allowed(Some(10), "finance").await.unwrap());
        assert!(!gate.is_allowed(Some(10), "old-core").await.unwrap());
    }

    #[tokio::test]
    async fn test_no_tenant_gets_core_only() {
        let (_, gate) = setup();
        assert!(gate.is_allowed(None, "dashboard").await.unwrap());
        assert!(!gate.is_allowed(None, "hrm").await.unwrap());
        assert!(gate.is_allowed(Some(99), "dashboard").await.unwrap());
        assert!(!gate.is_allowed(Some(99), "hrm").await.unwrap());
        // tenant without a plan
        assert!(!gate.is_allowed(Some(11), "hrm").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_picks_up_plan_change() {
        let (store, gate) = setup();
        assert!(!gate.is_allowed(Some(10), "finance").await.unwrap());

        store.upsert_plan(Plan {
            id: 1,
            name: "starter".into(),
            modules: vec![
                PlanModule { module_id: 1, is_active: true },
                PlanModule { module_id: 2, is_active: true },
            ],
        });
        // cached
        assert!(!gate.is_allowed(Some(10), "finance").await.unwrap());

        gate.invalidate(10).await.unwrap();
        assert!(gate.is_allowed(Some(10), "finance").await.unwrap());
    }

    #[tokio::test]
    async fn test_custom_override_after_invalidate() {
        let (store, gate) = setup();
        assert!(!gate.is_allowed(Some(11), "crm").await.unwrap());
        store.upsert_tenant(Tenant {
            id: 11,
            plan_id: None,
            custom_module_codes: vec!["crm".into()],
        });
        gate.invalidate(11).await.unwrap();
        assert!(gate.is_allowed(Some(11), "crm").await.unwrap());
    }
}
