//! Grant persistence.
//!
//! Two implementations share one contract:
//! - [`memory::MemoryStore`]: fixture-driven, used by tests and the CLI
//! - [`postgres::PgStore`]: sqlx/PostgreSQL with migrations
//!
//! Both also implement [`CatalogReader`](crate::catalog::CatalogReader),
//! [`TenantDirectory`](crate::tenancy::TenantDirectory) and
//! [`RoleDirectory`](crate::access::roles::RoleDirectory), so one value can
//! back a whole engine.

pub mod memory;
pub mod postgres;

pub use memory::{Fixture, MemoryStore, Plan, PlanModule};
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::access::models::{Grant, ModuleSubtree, NodeRef, RoleId};
use crate::error::Result;

/// Persisted grants, keyed by role.
///
/// Every mutating method is atomic: readers observe either the old grant set
/// or the new one.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// All grants of a role. Fails with `InvalidGrant` if any stored row does
    /// not name exactly one hierarchy level.
    async fn role_grants(&self, role_id: RoleId) -> Result<Vec<Grant>>;

    /// The grant at exactly `node`, if any.
    async fn find_grant(&self, role_id: RoleId, node: NodeRef) -> Result<Option<Grant>>;

    async fn has_grant(&self, role_id: RoleId, node: NodeRef) -> Result<bool> {
        Ok(self.find_grant(role_id, node).await?.is_some())
    }

    /// Delete every grant of the role and insert `grants` in one transaction.
    async fn replace_role_grants(&self, role_id: RoleId, grants: &[Grant]) -> Result<()>;

    /// Delete the module grant and every grant on a descendant. Returns the
    /// number of grants removed.
    async fn revoke_subtree(&self, role_id: RoleId, subtree: &ModuleSubtree) -> Result<u64>;

    /// Revoke the subtree, then insert one module-level `all` grant, atomically.
    async fn grant_module(&self, role_id: RoleId, subtree: &ModuleSubtree) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}
