//! The access decision engine.
//!
//! Every check runs the same pipeline:
//!
//! 1. platform super admin: allow, nothing else is consulted
//! 2. resolve the module by code, else `not_found`
//! 3. plan entitlement, else `plan_restriction`
//! 4. resolve each deeper code under its parent, else `not_found`
//! 5. tenant super admin: allow
//! 6. any role with a grant on the node or an ancestor: allow, else the
//!    level-specific `no_*_access`
//!
//! Denies are returned as [`Decision`] values. Only infrastructure faults
//! become `Err`.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::decision::Decision;
use super::hierarchy::HierarchyResolver;
use super::models::{
    AccessTree, HierarchyLevel, NodeRef, Principal, ResourcePath, RoleId, Scope, TenantId,
};
use super::plan::PlanEntitlementGate;
use super::roles::AdminRoles;
use super::scope::ScopeResolver;
use crate::cache::Cache;
use crate::catalog::{CatalogReader, ModuleSummary};
use crate::config::Config;
use crate::error::{Result, WardenError};
use crate::store::GrantStore;
use crate::telemetry::DecisionMetrics;
use crate::tenancy::TenantDirectory;

/// Combines admin bypass, plan entitlement and role grants into one decision.
#[derive(Clone)]
pub struct AccessDecisionEngine {
    catalog: Arc<dyn CatalogReader>,
    hierarchy: Arc<HierarchyResolver>,
    plans: Arc<PlanEntitlementGate>,
    scopes: ScopeResolver,
    admins: AdminRoles,
}

impl AccessDecisionEngine {
    pub fn new(
        catalog: Arc<dyn CatalogReader>,
        grants: Arc<dyn GrantStore>,
        tenants: Arc<dyn TenantDirectory>,
        cache: Cache,
        config: &Config,
    ) -> Self {
        let hierarchy = Arc::new(
            HierarchyResolver::new(grants, catalog.clone(), cache.clone())
                .with_access_ttl(config.cache.access_ttl)
                .with_invalidation_mode(config.cache.invalidation),
        );
        let plans = Arc::new(
            PlanEntitlementGate::new(tenants, catalog.clone(), cache)
                .with_ttl(config.cache.plan_ttl),
        );

        Self {
            catalog,
            scopes: ScopeResolver::new(hierarchy.clone()),
            hierarchy,
            plans,
            admins: AdminRoles::from(&config.access),
        }
    }

    /// Build from one value that backs the catalog, grants and tenants.
    pub fn from_store<S>(store: Arc<S>, cache: Cache, config: &Config) -> Self
    where
        S: CatalogReader + GrantStore + TenantDirectory + 'static,
    {
        Self::new(store.clone(), store.clone(), store, cache, config)
    }

    pub fn with_admin_roles(mut self, admins: AdminRoles) -> Self {
        self.admins = admins;
        self
    }

    pub fn hierarchy(&self) -> &HierarchyResolver {
        &self.hierarchy
    }

    pub fn plan_gate(&self) -> &PlanEntitlementGate {
        &self.plans
    }

    pub fn admin_roles(&self) -> &AdminRoles {
        &self.admins
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Decisions
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn can_access_module(
        &self,
        principal: &Principal,
        path: &ResourcePath,
    ) -> Result<Decision> {
        self.decide(principal, path, HierarchyLevel::Module).await
    }

    pub async fn can_access_sub_module(
        &self,
        principal: &Principal,
        path: &ResourcePath,
    ) -> Result<Decision> {
        self.decide(principal, path, HierarchyLevel::SubModule).await
    }

    pub async fn can_access_component(
        &self,
        principal: &Principal,
        path: &ResourcePath,
    ) -> Result<Decision> {
        self.decide(principal, path, HierarchyLevel::Component).await
    }

    /// Action check; an allow carries the effective scope.
    pub async fn can_perform_action(
        &self,
        principal: &Principal,
        path: &ResourcePath,
    ) -> Result<Decision> {
        self.decide(principal, path, HierarchyLevel::Action).await
    }

    /// Check at the depth the path names.
    pub async fn check(&self, principal: &Principal, path: &ResourcePath) -> Result<Decision> {
        self.decide(principal, path, path.level()).await
    }

    #[instrument(
        name = "access_decision",
        skip(self, principal, path),
        fields(user_id = principal.user_id, path = %path, level = %level)
    )]
    async fn decide(
        &self,
        principal: &Principal,
        path: &ResourcePath,
        level: HierarchyLevel,
    ) -> Result<Decision> {
        let path = path
            .truncated(level)
            .ok_or_else(|| WardenError::invalid_resource_path(path.to_string()))?;

        let timer = DecisionMetrics::start(level.as_str());
        let decision = self.evaluate(principal, &path, level).await?;
        let elapsed = timer.finish(decision.reason.as_str());

        debug!(
            reason = %decision.reason,
            allowed = decision.allowed,
            elapsed_us = elapsed.as_micros() as u64,
            "Access decision"
        );
        Ok(decision)
    }

    async fn evaluate(
        &self,
        principal: &Principal,
        path: &ResourcePath,
        level: HierarchyLevel,
    ) -> Result<Decision> {
        if self.admins.is_platform_admin(principal) {
            return Ok(Decision::platform_super_admin().with_scope(action_scope(level)));
        }

        let Some(module) = self.catalog.find_module_by_code(&path.module).await? else {
            return Ok(Decision::not_found(HierarchyLevel::Module, path));
        };

        if !self.plans.is_allowed(principal.tenant_id, &module.code).await? {
            return Ok(Decision::plan_restriction(&module.code));
        }

        let Some(node) = self.resolve_below(module.id, path, level).await? else {
            return Ok(Decision::not_found(level, path));
        };

        if self.admins.is_tenant_admin(principal) {
            return Ok(Decision::tenant_super_admin().with_scope(action_scope(level)));
        }

        for role_id in principal.role_ids() {
            if self.hierarchy.can_access(role_id, node.level, node.id).await? {
                let mut decision = Decision::success(level);
                if level == HierarchyLevel::Action {
                    decision = decision.with_scope(self.scopes.resolve(principal, node.id).await?);
                }
                return Ok(decision);
            }
        }

        Ok(Decision::no_access(level, path))
    }

    /// Resolve the codes below the module down to `level`, each under its
    /// parent. `None` when any code is unknown.
    async fn resolve_below(
        &self,
        module_id: i64,
        path: &ResourcePath,
        level: HierarchyLevel,
    ) -> Result<Option<NodeRef>> {
        let mut node = NodeRef::module(module_id);
        if level == HierarchyLevel::Module {
            return Ok(Some(node));
        }

        let Some(code) = path.sub_module.as_deref() else {
            return Ok(None);
        };
        match self.catalog.find_sub_module_by_code(node.id, code).await? {
            Some(sub_module) => node = NodeRef::sub_module(sub_module.id),
            None => return Ok(None),
        }
        if level == HierarchyLevel::SubModule {
            return Ok(Some(node));
        }

        let Some(code) = path.component.as_deref() else {
            return Ok(None);
        };
        match self.catalog.find_component_by_code(node.id, code).await? {
            Some(component) => node = NodeRef::component(component.id),
            None => return Ok(None),
        }
        if level == HierarchyLevel::Component {
            return Ok(Some(node));
        }

        let Some(code) = path.action.as_deref() else {
            return Ok(None);
        };
        Ok(self
            .catalog
            .find_action_by_code(node.id, code)
            .await?
            .map(|action| NodeRef::action(action.id)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Scope & Navigation
    // ═══════════════════════════════════════════════════════════════════════════

    /// Widest scope the principal holds on the action. Administrators get `all`.
    pub async fn get_user_access_scope(
        &self,
        principal: &Principal,
        action_id: i64,
    ) -> Result<Option<Scope>> {
        if self.admins.is_admin(principal) {
            return Ok(Some(Scope::All));
        }
        self.scopes.resolve(principal, action_id).await
    }

    /// Modules to show in navigation, ordered by id.
    ///
    /// Administrators see every active module; everyone else sees the modules
    /// their roles hold grants under. All but platform super admins are then
    /// filtered through the plan gate.
    #[instrument(skip(self, principal), fields(user_id = principal.user_id))]
    pub async fn get_accessible_modules(&self, principal: &Principal) -> Result<Vec<ModuleSummary>> {
        let modules = if self.admins.is_admin(principal) {
            self.catalog.active_modules().await?
        } else {
            let mut ids = BTreeSet::new();
            for role_id in principal.role_ids() {
                ids.extend(self.hierarchy.get_accessible_module_ids(role_id).await?);
            }
            let ids: Vec<i64> = ids.into_iter().collect();
            let mut modules = self.catalog.modules_by_ids(&ids).await?;
            modules.retain(|m| m.is_active);
            modules
        };

        let mut modules = if self.admins.is_platform_admin(principal) {
            modules
        } else {
            let entitled = self.plans.entitled_modules(principal.tenant_id).await?;
            modules
                .into_iter()
                .filter(|m| entitled.contains(&m.code))
                .collect()
        };

        modules.sort_by_key(|m| m.id);
        Ok(modules.iter().map(ModuleSummary::from).collect())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Admin API
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn sync_role_access(&self, role_id: RoleId, tree: &AccessTree) -> Result<()> {
        self.hierarchy.sync_role_access(role_id, tree).await
    }

    pub async fn get_role_access_tree(&self, role_id: RoleId) -> Result<AccessTree> {
        self.hierarchy.get_role_access_tree(role_id).await
    }

    pub async fn grant_module_access(&self, role_id: RoleId, module_id: i64) -> Result<()> {
        self.hierarchy.grant_module_access(role_id, module_id).await
    }

    pub async fn revoke_module_access(&self, role_id: RoleId, module_id: i64) -> Result<u64> {
        self.hierarchy.revoke_module_access(role_id, module_id).await
    }

    pub async fn clear_user_cache(&self, principal: &Principal) -> Result<()> {
        self.hierarchy.clear_user_cache(principal).await
    }

    pub async fn clear_role_cache(&self, role_id: RoleId) -> Result<()> {
        self.hierarchy.clear_role_cache(role_id).await
    }

    pub async fn clear_tenant_cache(&self, tenant_id: TenantId) -> Result<()> {
        self.plans.invalidate(tenant_id).await
    }
}

impl std::fmt::Debug for AccessDecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessDecisionEngine")
            .field("hierarchy", &self.hierarchy)
            .field("plans", &self.plans)
            .field("admins", &self.admins)
            .finish()
    }
}

fn action_scope(level: HierarchyLevel) -> Option<Scope> {
    (level == HierarchyLevel::Action).then_some(Scope::All)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
