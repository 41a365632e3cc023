//! Effective data scope across a principal's roles.

use std::sync::Arc;
use tracing::instrument;

use super::hierarchy::HierarchyResolver;
use super::models::{Principal, Scope};
use crate::error::Result;

/// Picks the widest scope any of the principal's roles holds on an action.
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    hierarchy: Arc<HierarchyResolver>,
}

impl ScopeResolver {
    pub fn new(hierarchy: Arc<HierarchyResolver>) -> Self {
        Self { hierarchy }
    }

    /// Widest scope by rank, or `None` when no role covers the action.
    #[instrument(level = "debug", skip(self, principal), fields(user_id = principal.user_id))]
    pub async fn resolve(&self, principal: &Principal, action_id: i64) -> Result<Option<Scope>> {
        let mut widest: Option<Scope> = None;
        for role_id in principal.role_ids() {
            if let Some(scope) = self.hierarchy.get_access_scope(role_id, action_id).await? {
                widest = widest.max(Some(scope));
                if scope == Scope::All {
                    break;
                }
            }
        }
        Ok(widest)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::models::{Grant, Role};
    use crate::cache::Cache;
    use crate::store::{Fixture, GrantStore, MemoryStore};

    const FIXTURE: &str = r#"{
        "modules": [{"id": 1, "code": "hrm", "name": "HRM"}],
        "sub_modules": [{"id": 10, "module_id": 1, "code": "leave", "name": "Leave"}],
        "components": [{"id": 100, "sub_module_id": 10, "code": "requests", "name": "Requests"}],
        "actions": [{"id": 1000, "component_id": 100, "code": "approve", "name": "Approve"}]
    }"#;

    async fn setup(grants: &[Grant]) -> ScopeResolver {
        let store = Arc::new(MemoryStore::from_fixture(Fixture::from_json(FIXTURE).unwrap()));
        for role_id in [1, 2] {
            let own: Vec<Grant> = grants.iter().filter(|g| g.role_id == role_id).copied().collect();
            store.replace_role_grants(role_id, &own).await.unwrap();
        }
        let hierarchy = HierarchyResolver::new(store.clone(), store, Cache::in_memory(100));
        ScopeResolver::new(Arc::new(hierarchy))
    }

    fn principal() -> Principal {
        Principal::new(1, None, vec![Role::new(1, "clerk"), Role::new(2, "lead")])
    }

    #[tokio::test]
    async fn test_union_takes_widest() {
        let resolver = setup(&[
            Grant::action(1, 1000, Scope::Team),
            Grant::action(2, 1000, Scope::Department),
        ])
        .await;
        assert_eq!(
            resolver.resolve(&principal(), 1000).await.unwrap(),
            Some(Scope::Department)
        );
    }

    #[tokio::test]
    async fn test_ancestor_grant_implies_all() {
        let resolver = setup(&[Grant::action(1, 1000, Scope::Own), Grant::module(2, 1)]).await;
        assert_eq!(resolver.resolve(&principal(), 1000).await.unwrap(), Some(Scope::All));
    }

    #[tokio::test]
    async fn test_no_scope_is_not_own() {
        let resolver = setup(&[]).await;
        assert_eq!(resolver.resolve(&principal(), 1000).await.unwrap(), None);
    }
}
