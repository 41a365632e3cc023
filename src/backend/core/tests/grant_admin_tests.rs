//! Admin write path and cache invalidation.

mod common;

use std::sync::Arc;

use common::*;
use warden_core::access::{
    AccessTree, ActionEntry, DecisionReason, Grant, HierarchyLevel, NodeRef, ResourcePath, Scope,
};
use warden_core::cache::InvalidationMode;
use warden_core::error::ErrorCode;
use warden_core::store::{GrantStore, Plan, PlanModule};

fn payroll_path() -> ResourcePath {
    "payroll.runs.batch.execute".parse().unwrap()
}

// ============================================================================
// Sync
// ============================================================================

#[tokio::test]
async fn test_sync_role_access_is_idempotent() {
    let (store, engine) = engine();
    let tree: AccessTree = serde_json::from_str(
        r#"{
            "modules": [7],
            "sub_modules": [10, 10],
            "components": [],
            "actions": [1100, {"id": 1000}, {"id": 1000, "scope": "team"}, {"id": 1001, "scope": "own"}]
        }"#,
    )
    .unwrap();

    engine.sync_role_access(PAYROLL_OFFICER, &tree).await.unwrap();
    let first = store.role_grants(PAYROLL_OFFICER).await.unwrap();
    engine.sync_role_access(PAYROLL_OFFICER, &tree).await.unwrap();
    let second = store.role_grants(PAYROLL_OFFICER).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.len(), 5);
    assert!(second.contains(&Grant::action(PAYROLL_OFFICER, 1000, Scope::All)));
    assert!(second.contains(&Grant::action(PAYROLL_OFFICER, 1001, Scope::Own)));

    let stored = engine.get_role_access_tree(PAYROLL_OFFICER).await.unwrap();
    assert_eq!(stored.modules, vec![7]);
    assert_eq!(stored.sub_modules, vec![10]);
    assert_eq!(
        stored.actions.iter().map(ActionEntry::id).collect::<Vec<_>>(),
        vec![1000, 1001, 1100]
    );
}

#[tokio::test]
async fn test_sync_replaces_previous_grants() {
    let (_, engine) = engine();
    let clerk = user(&[LEAVE_CLERK]);
    let approve: ResourcePath = "hrm.leave.requests.approve".parse().unwrap();

    assert!(engine.can_perform_action(&clerk, &approve).await.unwrap().allowed);

    let tree = AccessTree {
        modules: vec![7],
        ..Default::default()
    };
    engine.sync_role_access(LEAVE_CLERK, &tree).await.unwrap();

    let decision = engine.can_perform_action(&clerk, &approve).await.unwrap();
    assert_eq!(decision.reason, DecisionReason::NoActionAccess);
    assert!(engine.can_perform_action(&clerk, &payroll_path()).await.unwrap().allowed);
}

#[tokio::test]
async fn test_concurrent_sync_never_exposes_empty_grants() {
    let (_, engine) = engine();
    let engine = Arc::new(engine);

    let tree_a = AccessTree {
        modules: vec![1],
        ..Default::default()
    };
    let tree_b = AccessTree {
        modules: vec![7],
        actions: vec![ActionEntry::Id(1000)],
        ..Default::default()
    };

    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        let tree = if i % 2 == 0 { tree_a.clone() } else { tree_b.clone() };
        handles.push(tokio::spawn(async move {
            engine.sync_role_access(PAYROLL_OFFICER, &tree).await.unwrap();
            let current = engine.get_role_access_tree(PAYROLL_OFFICER).await.unwrap();
            assert!(!current.is_empty());
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let last = engine.get_role_access_tree(PAYROLL_OFFICER).await.unwrap();
    assert!(last == AccessTree::from_grants(&tree_a.to_grants(PAYROLL_OFFICER))
        || last == AccessTree::from_grants(&tree_b.to_grants(PAYROLL_OFFICER)));
}

// ============================================================================
// Grant / Revoke
// ============================================================================

#[tokio::test]
async fn test_grant_module_access_is_visible_immediately() {
    for mode in [InvalidationMode::Tagged, InvalidationMode::Ttl] {
        let engine = engine_with(store(), mode);
        let officer = user(&[PAYROLL_OFFICER]);
        let module: ResourcePath = "payroll".parse().unwrap();

        let decision = engine.can_access_module(&officer, &module).await.unwrap();
        assert_eq!(decision.reason, DecisionReason::NoModuleAccess);

        engine.grant_module_access(PAYROLL_OFFICER, 7).await.unwrap();

        let decision = engine.can_access_module(&officer, &module).await.unwrap();
        assert!(decision.allowed, "mode {}", mode);
    }
}

#[tokio::test]
async fn test_grant_module_replaces_finer_grants() {
    let (store, engine) = engine();
    engine.grant_module_access(LEAVE_CLERK, 1).await.unwrap();

    let grants = store.role_grants(LEAVE_CLERK).await.unwrap();
    assert_eq!(grants, vec![Grant::module(LEAVE_CLERK, 1)]);

    // the narrower `own` scope went with the action grant
    let scope = engine
        .get_user_access_scope(&user(&[LEAVE_CLERK]), 1000)
        .await
        .unwrap();
    assert_eq!(scope, Some(Scope::All));
}

#[tokio::test]
async fn test_grant_unknown_module_is_an_error() {
    let (_, engine) = engine();
    let err = engine.grant_module_access(HR_MANAGER, 404).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::CatalogEntryNotFound);
}

#[tokio::test]
async fn test_revoke_removes_whole_subtree() {
    let (store, engine) = engine();
    store
        .replace_role_grants(
            TEAM_LEAD,
            &[
                Grant::module(TEAM_LEAD, 1),
                Grant::new(TEAM_LEAD, NodeRef::sub_module(11), Scope::All),
                Grant::new(TEAM_LEAD, NodeRef::component(100), Scope::All),
                Grant::action(TEAM_LEAD, 1002, Scope::Team),
                Grant::action(TEAM_LEAD, 7000, Scope::Own),
            ],
        )
        .await
        .unwrap();

    let removed = engine.revoke_module_access(TEAM_LEAD, 1).await.unwrap();
    assert_eq!(removed, 4);
    assert_eq!(
        store.role_grants(TEAM_LEAD).await.unwrap(),
        vec![Grant::action(TEAM_LEAD, 7000, Scope::Own)]
    );

    let lead = user(&[TEAM_LEAD]);
    for path in ["hrm", "hrm.attendance", "hrm.leave.requests", "hrm.leave.requests.view"] {
        let decision = engine.check(&lead, &path.parse().unwrap()).await.unwrap();
        assert!(!decision.allowed, "{} should be denied", path);
    }
}

// ============================================================================
// Invalidation
// ============================================================================

#[tokio::test]
async fn test_tagged_revoke_denies_cached_allow() {
    let (_, engine) = engine();
    let manager = user(&[HR_MANAGER]);
    let approve: ResourcePath = "hrm.leave.requests.approve".parse().unwrap();

    assert!(engine.can_perform_action(&manager, &approve).await.unwrap().allowed);
    assert!(engine.can_perform_action(&manager, &approve).await.unwrap().allowed);

    engine.revoke_module_access(HR_MANAGER, 1).await.unwrap();

    let decision = engine.can_perform_action(&manager, &approve).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, DecisionReason::NoActionAccess);
}

#[tokio::test]
async fn test_ttl_mode_serves_cached_allow_until_cleared() {
    let store = store();
    let engine = engine_with(store, InvalidationMode::Ttl);
    let manager = user(&[HR_MANAGER]);
    let approve: ResourcePath = "hrm.leave.requests.approve".parse().unwrap();

    assert!(engine.can_perform_action(&manager, &approve).await.unwrap().allowed);
    engine.revoke_module_access(HR_MANAGER, 1).await.unwrap();

    // bounded staleness: the fine-grained entry outlives the revoke
    assert!(engine.can_perform_action(&manager, &approve).await.unwrap().allowed);

    // but the aggregate was evicted
    let modules = engine.get_accessible_modules(&manager).await.unwrap();
    assert!(modules.is_empty());

    engine.clear_user_cache(&manager).await.unwrap();
    assert!(!engine.can_perform_action(&manager, &approve).await.unwrap().allowed);
}

#[tokio::test]
async fn test_accessible_modules_follow_grants() {
    let (_, engine) = engine();
    let officer = user(&[PAYROLL_OFFICER]);

    assert!(engine.get_accessible_modules(&officer).await.unwrap().is_empty());
    engine.grant_module_access(PAYROLL_OFFICER, 7).await.unwrap();

    let modules = engine.get_accessible_modules(&officer).await.unwrap();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].code, "payroll");
}

#[tokio::test]
async fn test_clear_tenant_cache_after_plan_change() {
    let (store, engine) = engine();
    let accountant = user(&[ACCOUNTANT]);
    let submit: ResourcePath = "finance.invoices.create.submit".parse().unwrap();

    let decision = engine.can_perform_action(&accountant, &submit).await.unwrap();
    assert_eq!(decision.reason, DecisionReason::PlanRestriction);

    store.upsert_plan(Plan {
        id: 1,
        name: "standard".into(),
        modules: vec![
            PlanModule { module_id: 1, is_active: true },
            PlanModule { module_id: 2, is_active: true },
            PlanModule { module_id: 7, is_active: true },
        ],
    });

    let decision = engine.can_perform_action(&accountant, &submit).await.unwrap();
    assert_eq!(decision.reason, DecisionReason::PlanRestriction);

    engine.clear_tenant_cache(ACME).await.unwrap();
    let decision = engine.can_perform_action(&accountant, &submit).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.scope, Some(Scope::All));
}

#[tokio::test]
async fn test_cached_checks_skip_the_store() {
    let (store, engine) = engine();
    let manager = user(&[HR_MANAGER]);
    let approve: ResourcePath = "hrm.leave.requests.approve".parse().unwrap();

    engine.can_perform_action(&manager, &approve).await.unwrap();
    let reads = store.grant_reads();
    for _ in 0..10 {
        engine.can_perform_action(&manager, &approve).await.unwrap();
    }
    assert_eq!(store.grant_reads(), reads);

    assert!(engine
        .hierarchy()
        .can_access(HR_MANAGER, HierarchyLevel::SubModule, 10)
        .await
        .unwrap());
    assert_eq!(store.grant_reads(), reads);
}
