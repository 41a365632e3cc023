//! In-memory store backed by a fixture snapshot.
//!
//! Holds the catalog, plans, tenants, roles and grant rows in ordinary maps
//! behind one `parking_lot::RwLock`. Grant rows are kept in their persisted
//! shape so a malformed fixture row is rejected on read, exactly as a corrupt
//! database row would be.
//!
//! Not durable. Every grant mutation swaps the role's rows under a single
//! write lock, so readers see either the old set or the new one.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use super::GrantStore;
use crate::access::models::{
    Grant, GrantRow, HierarchyLevel, ModuleSubtree, NodeRef, PlanId, Role, RoleId, Tenant,
    TenantId,
};
use crate::access::roles::RoleDirectory;
use crate::catalog::{Action, CatalogReader, Component, Module, SubModule};
use crate::error::{ErrorCode, Result, WardenError};
use crate::tenancy::TenantDirectory;

// ═══════════════════════════════════════════════════════════════════════════════
// Fixture
// ═══════════════════════════════════════════════════════════════════════════════

/// One plan row plus its module pivot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub modules: Vec<PlanModule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanModule {
    pub module_id: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Serializable snapshot of everything a [`MemoryStore`] holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub sub_modules: Vec<SubModule>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub plans: Vec<Plan>,
    #[serde(default)]
    pub tenants: Vec<Tenant>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub grants: Vec<GrantRow>,
}

impl Fixture {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load a fixture file; `.toml` files are parsed as TOML, anything else as JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&raw),
            _ => Self::from_json(&raw),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Memory Store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct State {
    modules: BTreeMap<i64, Module>,
    sub_modules: BTreeMap<i64, SubModule>,
    components: BTreeMap<i64, Component>,
    actions: BTreeMap<i64, Action>,
    plans: HashMap<PlanId, Plan>,
    tenants: HashMap<TenantId, Tenant>,
    roles: BTreeMap<RoleId, Role>,
    grants: HashMap<RoleId, Vec<GrantRow>>,
}

/// Fixture-driven implementation of every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
    grant_reads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let mut state = State::default();
        state.modules = fixture.modules.into_iter().map(|m| (m.id, m)).collect();
        state.sub_modules = fixture.sub_modules.into_iter().map(|s| (s.id, s)).collect();
        state.components = fixture.components.into_iter().map(|c| (c.id, c)).collect();
        state.actions = fixture.actions.into_iter().map(|a| (a.id, a)).collect();
        state.plans = fixture.plans.into_iter().map(|p| (p.id, p)).collect();
        state.tenants = fixture.tenants.into_iter().map(|t| (t.id, t)).collect();
        state.roles = fixture.roles.into_iter().map(|r| (r.id, r)).collect();
        for row in fixture.grants {
            state.grants.entry(row.role_id).or_default().push(row);
        }

        debug!(
            modules = state.modules.len(),
            roles = state.roles.len(),
            "Memory store loaded from fixture"
        );

        Self {
            state: RwLock::new(state),
            ..Default::default()
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_fixture(Fixture::from_path(path)?))
    }

    /// Current contents as a fixture.
    pub fn snapshot(&self) -> Fixture {
        let state = self.state.read();
        let mut grants: Vec<GrantRow> = state.grants.values().flatten().cloned().collect();
        grants.sort_by_key(|row| {
            (
                row.role_id,
                row.module_id,
                row.sub_module_id,
                row.component_id,
                row.action_id,
            )
        });

        let mut plans: Vec<Plan> = state.plans.values().cloned().collect();
        plans.sort_by_key(|p| p.id);
        let mut tenants: Vec<Tenant> = state.tenants.values().cloned().collect();
        tenants.sort_by_key(|t| t.id);

        Fixture {
            modules: state.modules.values().cloned().collect(),
            sub_modules: state.sub_modules.values().cloned().collect(),
            components: state.components.values().cloned().collect(),
            actions: state.actions.values().cloned().collect(),
            plans,
            tenants,
            roles: state.roles.values().cloned().collect(),
            grants,
        }
    }

    /// Append a raw grant row, bypassing [`Grant`] validation.
    pub fn insert_grant_row(&self, row: GrantRow) {
        self.state
            .write()
            .grants
            .entry(row.role_id)
            .or_default()
            .push(row);
    }

    pub fn upsert_tenant(&self, tenant: Tenant) {
        self.state.write().tenants.insert(tenant.id, tenant);
    }

    pub fn upsert_plan(&self, plan: Plan) {
        self.state.write().plans.insert(plan.id, plan);
    }

    /// Make every read and write fail, as if the backing database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of grant lookups served so far.
    pub fn grant_reads(&self) -> u64 {
        self.grant_reads.load(Ordering::Relaxed)
    }

    fn catalog_guard(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(WardenError::catalog_unavailable("memory store marked unavailable"));
        }
        Ok(())
    }

    fn grants_guard(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(WardenError::with_internal(
                ErrorCode::GrantStoreUnavailable,
                "Grant store is unavailable",
                "memory store marked unavailable",
            ));
        }
        Ok(())
    }

    fn decode_rows(rows: &[GrantRow]) -> Result<Vec<Grant>> {
        rows.iter().cloned().map(Grant::try_from).collect()
    }
}

/// Whether a stored row references the module or one of its descendants.
fn row_in_subtree(row: &GrantRow, subtree: &ModuleSubtree) -> bool {
    row.module_id == Some(subtree.module_id)
        || row
            .sub_module_id
            .is_some_and(|id| subtree.sub_module_ids.contains(&id))
        || row
            .component_id
            .is_some_and(|id| subtree.component_ids.contains(&id))
        || row
            .action_id
            .is_some_and(|id| subtree.action_ids.contains(&id))
}

// ─── CatalogReader ───────────────────────────────────────────────────────────────

#[async_trait]
impl CatalogReader for MemoryStore {
    async fn find_module(&self, module_id: i64) -> Result<Option<Module>> {
        self.catalog_guard()?;
        Ok(self.state.read().modules.get(&module_id).cloned())
    }

    async fn find_module_by_code(&self, code: &str) -> Result<Option<Module>> {
        self.catalog_guard()?;
        Ok(self
            .state
            .read()
            .modules
            .values()
            .find(|m| m.code == code)
            .cloned())
    }

    async fn find_sub_module_by_code(
        &self,
        module_id: i64,
        code: &str,
    ) -> Result<Option<SubModule>> {
        self.catalog_guard()?;
        Ok(self
            .state
            .read()
            .sub_modules
            .values()
            .find(|s| s.module_id == module_id && s.code == code)
            .cloned())
    }

    async fn find_component_by_code(
        &self,
        sub_module_id: i64,
        code: &str,
    ) -> Result<Option<Component>> {
        self.catalog_guard()?;
        Ok(self
            .state
            .read()
            .components
            .values()
            .find(|c| c.sub_module_id == sub_module_id && c.code == code)
            .cloned())
    }

    async fn find_action_by_code(&self, component_id: i64, code: &str) -> Result<Option<Action>> {
        self.catalog_guard()?;
        Ok(self
            .state
            .read()
            .actions
            .values()
            .find(|a| a.component_id == component_id && a.code == code)
            .cloned())
    }

    async fn parent_id(&self, node: NodeRef) -> Result<Option<i64>> {
        self.catalog_guard()?;
        let state = self.state.read();
        let parent = match node.level {
            HierarchyLevel::Module => None,
            HierarchyLevel::SubModule => state
                .sub_modules
                .get(&node.id)
                .map(|s| s.module_id)
                .filter(|id| state.modules.contains_key(id)),
            HierarchyLevel::Component => state
                .components
                .get(&node.id)
                .map(|c| c.sub_module_id)
                .filter(|id| state.sub_modules.contains_key(id)),
            HierarchyLevel::Action => state
                .actions
                .get(&node.id)
                .map(|a| a.component_id)
                .filter(|id| state.components.contains_key(id)),
        };
        Ok(parent)
    }

    async fn modules_by_ids(&self, ids: &[i64]) -> Result<Vec<Module>> {
        self.catalog_guard()?;
        let state = self.state.read();
        Ok(state
            .modules
            .values()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn active_modules(&self) -> Result<Vec<Module>> {
        self.catalog_guard()?;
        Ok(self
            .state
            .read()
            .modules
            .values()
            .filter(|m| m.is_active)
            .cloned()
            .collect())
    }

    async fn core_module_codes(&self) -> Result<Vec<String>> {
        self.catalog_guard()?;
        Ok(self
            .state
            .read()
            .modules
            .values()
            .filter(|m| m.is_core && m.is_active)
            .map(|m| m.code.clone())
            .collect())
    }

    async fn module_subtree(&self, module_id: i64) -> Result<ModuleSubtree> {
        self.catalog_guard()?;
        let state = self.state.read();

        let sub_module_ids: Vec<i64> = state
            .sub_modules
            .values()
            .filter(|s| s.module_id == module_id)
            .map(|s| s.id)
            .collect();
        let component_ids: Vec<i64> = state
            .components
            .values()
            .filter(|c| sub_module_ids.contains(&c.sub_module_id))
            .map(|c| c.id)
            .collect();
        let action_ids: Vec<i64> = state
            .actions
            .values()
            .filter(|a| component_ids.contains(&a.component_id))
            .map(|a| a.id)
            .collect();

        Ok(ModuleSubtree {
            module_id,
            sub_module_ids,
            component_ids,
            action_ids,
        })
    }
}

// ─── GrantStore ──────────────────────────────────────────────────────────────────

#[async_trait]
impl GrantStore for MemoryStore {
    async fn role_grants(&self, role_id: RoleId) -> Result<Vec<Grant>> {
        self.grants_guard()?;
        self.grant_reads.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read();
        match state.grants.get(&role_id) {
            Some(rows) => Self::decode_rows(rows),
            None => Ok(Vec::new()),
        }
    }

    async fn find_grant(&self, role_id: RoleId, node: NodeRef) -> Result<Option<Grant>> {
        self.grants_guard()?;
        self.grant_reads.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read();
        let Some(rows) = state.grants.get(&role_id) else {
            return Ok(None);
        };
        Ok(Self::decode_rows(rows)?
            .into_iter()
            .find(|grant| grant.node == node))
    }

    async fn replace_role_grants(&self, role_id: RoleId, grants: &[Grant]) -> Result<()> {
        self.grants_guard()?;
        let rows: Vec<GrantRow> = grants.iter().map(Grant::to_row).collect();
        self.state.write().grants.insert(role_id, rows);
        Ok(())
    }

    async fn revoke_subtree(&self, role_id: RoleId, subtree: &ModuleSubtree) -> Result<u64> {
        self.grants_guard()?;
        let mut state = self.state.write();
        let Some(rows) = state.grants.get_mut(&role_id) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !row_in_subtree(row, subtree));
        Ok((before - rows.len()) as u64)
    }

    async fn grant_module(&self, role_id: RoleId, subtree: &ModuleSubtree) -> Result<()> {
        self.grants_guard()?;
        let mut state = self.state.write();
        let rows = state.grants.entry(role_id).or_default();
        rows.retain(|row| !row_in_subtree(row, subtree));
        rows.push(Grant::module(role_id, subtree.module_id).to_row());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ─── TenantDirectory ─────────────────────────────────────────────────────────────

#[async_trait]
impl TenantDirectory for MemoryStore {
    async fn find_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>> {
        self.catalog_guard()?;
        Ok(self.state.read().tenants.get(&tenant_id).cloned())
    }

    async fn plan_module_codes(&self, plan_id: PlanId) -> Result<Vec<String>> {
        self.catalog_guard()?;
        let state = self.state.read();
        let Some(plan) = state.plans.get(&plan_id) else {
            return Ok(Vec::new());
        };
        Ok(plan
            .modules
            .iter()
            .filter(|pm| pm.is_active)
            .filter_map(|pm| state.modules.get(&pm.module_id))
            .filter(|m| m.is_active)
            .map(|m| m.code.clone())
            .collect())
    }
}

// ─── RoleDirectory ───────────────────────────────────────────────────────────────

#[async_trait]
impl RoleDirectory for MemoryStore {
    async fn find_role(&self, role_id: RoleId) -> Result<Option<Role>> {
        self.catalog_guard()?;
        Ok(self.state.read().roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        self.catalog_guard()?;
        Ok(self
            .state
            .read()
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::models::Scope;
    use crate::catalog::owning_module_id;

    const FIXTURE: &str = r#"{
        "modules": [
            {"id": 1, "code": "hrm", "name": "HRM"},
            {"id": 2, "code": "core", "name": "Core", "is_core": true},
            {"id": 3, "code": "legacy", "name": "Legacy", "is_active": false}
        ],
        "sub_modules": [{"id": 10, "module_id": 1, "code": "leave", "name": "Leave"}],
        "components": [{"id": 100, "sub_module_id": 10, "code": "requests", "name": "Requests"}],
        "actions": [
            {"id": 1000, "component_id": 100, "code": "approve", "name": "Approve"},
            {"id": 1001, "component_id": 999, "code": "orphan", "name": "Orphan"}
        ],
        "plans": [{"id": 1, "name": "basic", "modules": [
            {"module_id": 1},
            {"module_id": 3},
            {"module_id": 2, "is_active": false}
        ]}],
        "tenants": [{"id": 7, "plan_id": 1, "custom_module_codes": ["crm"]}],
        "roles": [{"id": 5, "name": "hr-manager"}],
        "grants": [
            {"role_id": 5, "module_id": 1},
            {"role_id": 5, "action_id": 1000, "scope": "team"}
        ]
    }"#;

    fn store() -> MemoryStore {
        MemoryStore::from_fixture(Fixture::from_json(FIXTURE).unwrap())
    }

    #[tokio::test]
    async fn test_lookup_by_code_under_parent() {
        let store = store();
        let module = store.find_module_by_code("hrm").await.unwrap().unwrap();
        let sub = store
            .find_sub_module_by_code(module.id, "leave")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.id, 10);
        assert!(store
            .find_sub_module_by_code(2, "leave")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_parent_chain_and_orphans() {
        let store = store();
        assert_eq!(store.parent_id(NodeRef::action(1000)).await.unwrap(), Some(100));
        assert_eq!(store.parent_id(NodeRef::action(1001)).await.unwrap(), None);
        assert_eq!(store.parent_id(NodeRef::module(1)).await.unwrap(), None);

        assert_eq!(
            owning_module_id(&store, NodeRef::action(1000)).await.unwrap(),
            Some(1)
        );
        assert_eq!(
            owning_module_id(&store, NodeRef::action(1001)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_plan_codes_skip_inactive() {
        let store = store();
        // module 3 is inactive, module 2's pivot row is inactive
        assert_eq!(store.plan_module_codes(1).await.unwrap(), vec!["hrm".to_string()]);
        assert_eq!(store.core_module_codes().await.unwrap(), vec!["core".to_string()]);
        assert!(store.plan_module_codes(99).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grant_module_replaces_subtree() {
        let store = store();
        let subtree = store.module_subtree(1).await.unwrap();
        assert_eq!(subtree.action_ids, vec![1000]);

        store.grant_module(5, &subtree).await.unwrap();
        let grants = store.role_grants(5).await.unwrap();
        assert_eq!(grants, vec![Grant::module(5, 1)]);

        // idempotent
        store.grant_module(5, &subtree).await.unwrap();
        assert_eq!(store.role_grants(5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_subtree_counts() {
        let store = store();
        let subtree = store.module_subtree(1).await.unwrap();
        assert_eq!(store.revoke_subtree(5, &subtree).await.unwrap(), 2);
        assert!(store.role_grants(5).await.unwrap().is_empty());
        assert_eq!(store.revoke_subtree(5, &subtree).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replace_and_find() {
        let store = store();
        store
            .replace_role_grants(5, &[Grant::action(5, 1000, Scope::Own)])
            .await
            .unwrap();
        let grant = store.find_grant(5, NodeRef::action(1000)).await.unwrap();
        assert_eq!(grant.map(|g| g.scope), Some(Scope::Own));
        assert!(!store.has_grant(5, NodeRef::module(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_rows_fail_closed() {
        let store = store();
        store.insert_grant_row(GrantRow {
            role_id: 5,
            module_id: Some(1),
            sub_module_id: Some(10),
            component_id: None,
            action_id: None,
            scope: None,
        });
        let err = store.role_grants(5).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidGrant);
        assert!(store.find_grant(5, NodeRef::module(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = store();
        store.set_unavailable(true);
        assert_eq!(
            store.find_module_by_code("hrm").await.unwrap_err().code(),
            ErrorCode::CatalogUnavailable
        );
        assert_eq!(
            store.role_grants(5).await.unwrap_err().code(),
            ErrorCode::GrantStoreUnavailable
        );
        store.set_unavailable(false);
        assert!(store.role_grants(5).await.is_ok());
    }

    #[tokio::test]
    async fn test_roles_by_name() {
        let store = store();
        let role = store.find_role_by_name("hr-manager").await.unwrap().unwrap();
        assert_eq!(role.id, 5);
        assert!(store.find_role_by_name("nobody").await.unwrap().is_none());
    }

    #[test]
    fn test_fixture_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.toml");
        std::fs::write(
            &path,
            r#"
[[modules]]
id = 1
code = "hrm"
name = "HRM"

[[grants]]
role_id = 5
module_id = 1
"#,
        )
        .unwrap();

        let fixture = Fixture::from_path(&path).unwrap();
        assert_eq!(fixture.modules.len(), 1);
        assert!(fixture.modules[0].is_active);
        assert_eq!(fixture.grants[0].module_id, Some(1));
    }

    #[test]
    fn test_snapshot_round_trips_grants() {
        let store = store();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.grants.len(), 2);
        assert_eq!(snapshot.modules.len(), 3);
    }
}
