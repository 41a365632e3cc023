//! PostgreSQL store.
//!
//! Uses sqlx with a pooled connection. Every grant mutation runs inside one
//! transaction, and the `access_grants_single_level` CHECK constraint rejects
//! rows naming zero or several hierarchy levels at write time. Rows are still
//! validated on read.

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, info, instrument};

use super::GrantStore;
use crate::access::models::{
    Grant, GrantRow, HierarchyLevel, ModuleSubtree, NodeRef, PlanId, Role, RoleId, Tenant,
    TenantId,
};
use crate::access::roles::RoleDirectory;
use crate::catalog::{Action, CatalogReader, Component, Module, SubModule};
use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::tenancy::TenantDirectory;

const GRANT_COLUMNS: &str = "role_id, module_id, sub_module_id, component_id, action_id, scope";

/// sqlx-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using the `database` configuration section.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "PostgreSQL pool connected"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: TenantId,
    plan_id: Option<PlanId>,
    custom_module_codes: Vec<String>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Self {
            id: row.id,
            plan_id: row.plan_id,
            custom_module_codes: row.custom_module_codes,
        }
    }
}

fn node_column(level: HierarchyLevel) -> &'static str {
    match level {
        HierarchyLevel::Module => "module_id",
        HierarchyLevel::SubModule => "sub_module_id",
        HierarchyLevel::Component => "component_id",
        HierarchyLevel::Action => "action_id",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl CatalogReader for PgStore {
    async fn find_module(&self, module_id: i64) -> Result<Option<Module>> {
        let module = sqlx::query_as::<_, Module>(
            r#"SELECT id, code, name, is_core, is_active FROM modules WHERE id = $1"#,
        )
        .bind(module_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(module)
    }

    async fn find_module_by_code(&self, code: &str) -> Result<Option<Module>> {
        let module = sqlx::query_as::<_, Module>(
            r#"SELECT id, code, name, is_core, is_active FROM modules WHERE code = $1"#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(module)
    }

    async fn find_sub_module_by_code(
        &self,
        module_id: i64,
        code: &str,
    ) -> Result<Option<SubModule>> {
        let sub_module = sqlx::query_as::<_, SubModule>(
            r#"
            SELECT id, module_id, code, name
            FROM sub_modules
            WHERE module_id = $1 AND code = $2
            "#,
        )
        .bind(module_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub_module)
    }

    async fn find_component_by_code(
        &self,
        sub_module_id: i64,
        code: &str,
    ) -> Result<Option<Component>> {
        let component = sqlx::query_as::<_, Component>(
            r#"
            SELECT id, sub_module_id, code, name
            FROM components
            WHERE sub_module_id = $1 AND code = $2
            "#,
        )
        .bind(sub_module_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(component)
    }

    async fn find_action_by_code(&self, component_id: i64, code: &str) -> Result<Option<Action>> {
        let action = sqlx::query_as::<_, Action>(
            r#"
            SELECT id, component_id, code, name
            FROM actions
            WHERE component_id = $1 AND code = $2
            "#,
        )
        .bind(component_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(action)
    }

    async fn parent_id(&self, node: NodeRef) -> Result<Option<i64>> {
        // The join drops children whose parent row is gone.
        let sql = match node.level {
            HierarchyLevel::Module => return Ok(None),
            HierarchyLevel::SubModule => {
                "SELECT p.id FROM sub_modules c JOIN modules p ON p.id = c.module_id WHERE c.id = $1"
            }
            HierarchyLevel::Component => {
                "SELECT p.id FROM components c JOIN sub_modules p ON p.id = c.sub_module_id WHERE c.id = $1"
            }
            HierarchyLevel::Action => {
                "SELECT p.id FROM actions c JOIN components p ON p.id = c.component_id WHERE c.id = $1"
            }
        };

        let parent = sqlx::query_scalar::<_, i64>(sql)
            .bind(node.id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(parent)
    }

    async fn modules_by_ids(&self, ids: &[i64]) -> Result<Vec<Module>> {
        let modules = sqlx::query_as::<_, Module>(
            r#"
            SELECT id, code, name, is_core, is_active
            FROM modules
            WHERE id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(modules)
    }

    async fn active_modules(&self) -> Result<Vec<Module>> {
        let modules = sqlx::query_as::<_, Module>(
            r#"
            SELECT id, code, name, is_core, is_active
            FROM modules
            WHERE is_active
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(modules)
    }

    async fn core_module_codes(&self) -> Result<Vec<String>> {
        let codes = sqlx::query_scalar::<_, String>(
            r#"SELECT code FROM modules WHERE is_core AND is_active ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }

    async fn module_subtree(&self, module_id: i64) -> Result<ModuleSubtree> {
        let sub_module_ids = sqlx::query_scalar::<_, i64>(
            r#"SELECT id FROM sub_modules WHERE module_id = $1 ORDER BY id"#,
        )
        .bind(module_id)
        .fetch_all(&self.pool)
        .await?;

        let component_ids = sqlx::query_scalar::<_, i64>(
            r#"SELECT id FROM components WHERE sub_module_id = ANY($1) ORDER BY id"#,
        )
        .bind(&sub_module_ids)
        .fetch_all(&self.pool)
        .await?;

        let action_ids = sqlx::query_scalar::<_, i64>(
            r#"SELECT id FROM actions WHERE component_id = ANY($1) ORDER BY id"#,
        )
        .bind(&component_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(ModuleSubtree {
            module_id,
            sub_module_ids,
            component_ids,
            action_ids,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Grants
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl GrantStore for PgStore {
    #[instrument(level = "trace", skip(self))]
    async fn role_grants(&self, role_id: RoleId) -> Result<Vec<Grant>> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {} FROM access_grants WHERE role_id = $1 ORDER BY id",
            GRANT_COLUMNS
        ))
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Grant::try_from).collect()
    }

    #[instrument(level = "trace", skip(self))]
    async fn find_grant(&self, role_id: RoleId, node: NodeRef) -> Result<Option<Grant>> {
        let row = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {} FROM access_grants WHERE role_id = $1 AND {} = $2 LIMIT 1",
            GRANT_COLUMNS,
            node_column(node.level)
        ))
        .bind(role_id)
        .bind(node.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Grant::try_from).transpose()
    }

    #[instrument(skip(self, grants), fields(count = grants.len()))]
    async fn replace_role_grants(&self, role_id: RoleId, grants: &[Grant]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM access_grants WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;

        for grant in grants {
            let row = grant.to_row();
            sqlx::query(
                r#"
                INSERT INTO access_grants (role_id, module_id, sub_module_id, component_id, action_id, scope)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(role_id)
            .bind(row.module_id)
            .bind(row.sub_module_id)
            .bind(row.component_id)
            .bind(row.action_id)
            .bind(grant.scope.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(role_id, count = grants.len(), "Role grants replaced");
        Ok(())
    }

    #[instrument(skip(self, subtree), fields(module_id = subtree.module_id))]
    async fn revoke_subtree(&self, role_id: RoleId, subtree: &ModuleSubtree) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM access_grants
            WHERE role_id = $1
              AND (module_id = $2
                   OR sub_module_id = ANY($3)
                   OR component_id = ANY($4)
                   OR action_id = ANY($5))
            "#,
        )
        .bind(role_id)
        .bind(subtree.module_id)
        .bind(&subtree.sub_module_ids)
        .bind(&subtree.component_ids)
        .bind(&subtree.action_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, subtree), fields(module_id = subtree.module_id))]
    async fn grant_module(&self, role_id: RoleId, subtree: &ModuleSubtree) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM access_grants
            WHERE role_id = $1
              AND (module_id = $2
                   OR sub_module_id = ANY($3)
                   OR component_id = ANY($4)
                   OR action_id = ANY($5))
            "#,
        )
        .bind(role_id)
        .bind(subtree.module_id)
        .bind(&subtree.sub_module_ids)
        .bind(&subtree.component_ids)
        .bind(&subtree.action_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO access_grants (role_id, module_id, scope)
            VALUES ($1, $2, 'all')
            "#,
        )
        .bind(role_id)
        .bind(subtree.module_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tenants & Roles
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl TenantDirectory for PgStore {
    async fn find_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"SELECT id, plan_id, custom_module_codes FROM tenants WHERE id = $1"#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Tenant::from))
    }

    async fn plan_module_codes(&self, plan_id: PlanId) -> Result<Vec<String>> {
        let codes = sqlx::query_scalar::<_, String>(
            r#"
            SELECT m.code
            FROM plan_modules pm
            JOIN modules m ON m.id = pm.module_id
            WHERE pm.plan_id = $1 AND pm.is_active AND m.is_active
            ORDER BY m.id
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }
}

#[async_trait]
impl RoleDirectory for PgStore {
    async fn find_role(&self, role_id: RoleId) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(r#"SELECT id, name FROM roles WHERE id = $1"#)
            .bind(role_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(r#"SELECT id, name FROM roles WHERE name = $1"#)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
