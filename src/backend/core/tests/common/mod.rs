//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use warden_core::access::{AccessDecisionEngine, Principal, Role, RoleId, TenantId};
use warden_core::cache::{Cache, InvalidationMode};
use warden_core::config::Config;
use warden_core::store::{Fixture, MemoryStore};

pub const FIXTURE_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/acme.json");

pub const HR_MANAGER: RoleId = 1;
pub const LEAVE_CLERK: RoleId = 2;
pub const TEAM_LEAD: RoleId = 3;
pub const ACCOUNTANT: RoleId = 4;
pub const PAYROLL_OFFICER: RoleId = 5;
pub const PLATFORM_ADMIN: RoleId = 90;
pub const TENANT_ADMIN: RoleId = 91;

pub const ACME: TenantId = 1;

pub fn fixture() -> Fixture {
    Fixture::from_path(FIXTURE_PATH).expect("fixture")
}

pub fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::from_fixture(fixture()))
}

pub fn engine_with(store: Arc<MemoryStore>, mode: InvalidationMode) -> AccessDecisionEngine {
    let mut config = Config::default();
    config.cache.invalidation = mode;
    AccessDecisionEngine::from_store(store, Cache::in_memory(10_000), &config)
}

pub fn engine() -> (Arc<MemoryStore>, AccessDecisionEngine) {
    let store = store();
    let engine = engine_with(store.clone(), InvalidationMode::Tagged);
    (store, engine)
}

fn role_name(id: RoleId) -> &'static str {
    match id {
        HR_MANAGER => "hr-manager",
        LEAVE_CLERK => "leave-clerk",
        TEAM_LEAD => "team-lead",
        ACCOUNTANT => "accountant",
        PAYROLL_OFFICER => "payroll-officer",
        PLATFORM_ADMIN => "platform-super-admin",
        TENANT_ADMIN => "tenant-super-admin",
        _ => "guest",
    }
}

/// A user of tenant `ACME` holding `roles`.
pub fn user(roles: &[RoleId]) -> Principal {
    user_in(Some(ACME), roles)
}

pub fn user_in(tenant_id: Option<TenantId>, roles: &[RoleId]) -> Principal {
    Principal::new(
        100,
        tenant_id,
        roles.iter().map(|id| Role::new(*id, role_name(*id))).collect(),
    )
}
