//! Hierarchical grant resolution.
//!
//! A grant on a node covers every node below it. `can_access` checks for a
//! grant at exactly the requested node and otherwise recurses into the parent,
//! caching each answer per `(role, level, id)`. A node whose parent cannot be
//! resolved is denied.
//!
//! The resolver also owns the admin write path (sync, grant, revoke). Writes
//! for one role are serialized by a per-role mutex and each is a single store
//! transaction.
//!
//! Every cached fact is keyed by the role's grant generation. Invalidating a
//! role bumps the generation, so an answer computed from grants read before a
//! write can only land under a key that is never read again.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::models::{AccessTree, HierarchyLevel, NodeRef, Principal, RoleId, Scope};
use crate::cache::{role_tag, Cache, CacheKey, InvalidationMode};
use crate::catalog::{owning_module_id, CatalogReader};
use crate::error::{Result, WardenError};
use crate::store::GrantStore;
use crate::telemetry::InvalidationCounter;

const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(3600);

/// Grant resolution with per-role caching.
pub struct HierarchyResolver {
    grants: Arc<dyn GrantStore>,
    catalog: Arc<dyn CatalogReader>,
    cache: Cache,
    access_ttl: Duration,
    invalidation: InvalidationMode,
    role_locks: DashMap<RoleId, Arc<Mutex<()>>>,
    generations: DashMap<RoleId, u32>,
}

impl HierarchyResolver {
    pub fn new(grants: Arc<dyn GrantStore>, catalog: Arc<dyn CatalogReader>, cache: Cache) -> Self {
        Self {
            grants,
            catalog,
            cache,
            access_ttl: DEFAULT_ACCESS_TTL,
            invalidation: InvalidationMode::default(),
            role_locks: DashMap::new(),
            generations: DashMap::new(),
        }
    }

    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    pub fn with_invalidation_mode(mut self, mode: InvalidationMode) -> Self {
        self.invalidation = mode;
        self
    }

    pub fn invalidation_mode(&self) -> InvalidationMode {
        self.invalidation
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Read Path
    // ═══════════════════════════════════════════════════════════════════════════

    /// Whether `role_id` holds a grant on the node or any of its ancestors.
    pub fn can_access(
        &self,
        role_id: RoleId,
        level: HierarchyLevel,
        id: i64,
    ) -> BoxFuture<'_, Result<bool>> {
        async move {
            let key = self.role_key(role_id, CacheKey::access_check(role_id, level, id));
            self.cache
                .remember(&key, || self.resolve_access(role_id, level, id))
                .await
        }
        .boxed()
    }

    async fn resolve_access(&self, role_id: RoleId, level: HierarchyLevel, id: i64) -> Result<bool> {
        let node = NodeRef::new(level, id);
        if self.grants.has_grant(role_id, node).await? {
            return Ok(true);
        }

        let Some(parent_level) = level.parent() else {
            return Ok(false);
        };

        match self.catalog.parent_id(node).await? {
            Some(parent_id) => self.can_access(role_id, parent_level, parent_id).await,
            None => {
                debug!(role_id, node = %node, "Orphan node, denying");
                Ok(false)
            }
        }
    }

    /// Scope of the most specific grant covering `action_id`.
    ///
    /// An action grant contributes its own scope; a grant on any ancestor
    /// implies `all`. `None` when nothing covers the action.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_access_scope(&self, role_id: RoleId, action_id: i64) -> Result<Option<Scope>> {
        let key = self.role_key(role_id, CacheKey::access_scope(role_id, action_id));
        self.cache
            .remember(&key, || self.resolve_scope(role_id, action_id))
            .await
    }

    async fn resolve_scope(&self, role_id: RoleId, action_id: i64) -> Result<Option<Scope>> {
        let action = NodeRef::action(action_id);
        if let Some(grant) = self.grants.find_grant(role_id, action).await? {
            return Ok(Some(grant.scope));
        }

        let mut current = action;
        while let Some(parent_level) = current.level.parent() {
            let Some(parent_id) = self.catalog.parent_id(current).await? else {
                return Ok(None);
            };
            current = NodeRef::new(parent_level, parent_id);
            if self.grants.has_grant(role_id, current).await? {
                return Ok(Some(Scope::All));
            }
        }
        Ok(None)
    }

    /// Ids of every module the role holds a grant somewhere under.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_accessible_module_ids(&self, role_id: RoleId) -> Result<BTreeSet<i64>> {
        let key = self.role_key(role_id, CacheKey::accessible_modules(role_id));
        self.cache
            .remember(&key, || async {
                let mut modules = BTreeSet::new();
                for grant in self.grants.role_grants(role_id).await? {
                    if let Some(module_id) =
                        owning_module_id(self.catalog.as_ref(), grant.node).await?
                    {
                        modules.insert(module_id);
                    }
                }
                Ok(modules)
            })
            .await
    }

    /// The role's grants partitioned by level, sorted by id.
    pub async fn get_role_access_tree(&self, role_id: RoleId) -> Result<AccessTree> {
        let grants = self.grants.role_grants(role_id).await?;
        Ok(AccessTree::from_grants(&grants))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Write Path
    // ═══════════════════════════════════════════════════════════════════════════

    /// Replace every grant of the role with the contents of `tree`.
    #[instrument(skip(self, tree), fields(entries = tree.len()))]
    pub async fn sync_role_access(&self, role_id: RoleId, tree: &AccessTree) -> Result<()> {
        validate_tree(tree)?;
        let grants = tree.to_grants(role_id);

        let lock = self.role_lock(role_id);
        let _guard = lock.lock().await;

        self.grants.replace_role_grants(role_id, &grants).await?;
        self.after_mutation(role_id).await?;

        info!(role_id, grants = grants.len(), "Role access synced");
        Ok(())
    }

    /// Give the role the whole module, replacing any finer grants under it.
    #[instrument(skip(self))]
    pub async fn grant_module_access(&self, role_id: RoleId, module_id: i64) -> Result<()> {
        if self.catalog.find_module(module_id).await?.is_none() {
            return Err(WardenError::catalog_entry_not_found("module", module_id));
        }

        let lock = self.role_lock(role_id);
        let _guard = lock.lock().await;

        let subtree = self.catalog.module_subtree(module_id).await?;
        self.grants.grant_module(role_id, &subtree).await?;
        self.after_mutation(role_id).await?;

        if !self.invalidation.is_tagged() {
            self.cache
                .forget(&self.role_key(
                    role_id,
                    CacheKey::access_check(role_id, HierarchyLevel::Module, module_id),
                ))
                .await?;
        }

        info!(role_id, module_id, "Module access granted");
        Ok(())
    }

    /// Remove the module grant and every grant below it. Returns the number of
    /// grants removed.
    #[instrument(skip(self))]
    pub async fn revoke_module_access(&self, role_id: RoleId, module_id: i64) -> Result<u64> {
        let lock = self.role_lock(role_id);
        let _guard = lock.lock().await;

        let subtree = self.catalog.module_subtree(module_id).await?;
        let removed = self.grants.revoke_subtree(role_id, &subtree).await?;
        self.after_mutation(role_id).await?;

        info!(role_id, module_id, removed, "Module access revoked");
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Cache Hooks
    // ═══════════════════════════════════════════════════════════════════════════

    /// Evict the role's accessible-modules aggregate.
    pub async fn clear_role_cache(&self, role_id: RoleId) -> Result<()> {
        self.cache
            .forget(&self.role_key(role_id, CacheKey::accessible_modules(role_id)))
            .await?;
        InvalidationCounter::increment("aggregate");
        Ok(())
    }

    /// Drop every cached check and scope derived from the role's grants.
    pub async fn invalidate_role_decisions(&self, role_id: RoleId) -> Result<u64> {
        let generation = self.bump_generation(role_id);
        let removed = self.cache.invalidate_by_tag(&role_tag(role_id)).await?;
        InvalidationCounter::increment("role");
        debug!(role_id, generation, removed, "Role decisions invalidated");
        Ok(removed)
    }

    /// Clear the cache of every role the principal holds.
    pub async fn clear_user_cache(&self, principal: &Principal) -> Result<()> {
        for role_id in principal.role_ids() {
            self.clear_role_cache(role_id).await?;
            self.invalidate_role_decisions(role_id).await?;
        }
        Ok(())
    }

    async fn after_mutation(&self, role_id: RoleId) -> Result<()> {
        self.clear_role_cache(role_id).await?;
        if self.invalidation.is_tagged() {
            self.invalidate_role_decisions(role_id).await?;
        }
        Ok(())
    }

    /// Current grant generation of the role.
    pub fn generation(&self, role_id: RoleId) -> u32 {
        self.generations.get(&role_id).map(|g| *g).unwrap_or(0)
    }

    fn bump_generation(&self, role_id: RoleId) -> u32 {
        let mut generation = self.generations.entry(role_id).or_insert(0);
        *generation = generation.wrapping_add(1);
        *generation
    }

    fn role_key(&self, role_id: RoleId, key: CacheKey) -> CacheKey {
        key.with_version(self.generation(role_id))
            .with_ttl(self.access_ttl)
    }

    fn role_lock(&self, role_id: RoleId) -> Arc<Mutex<()>> {
        self.role_locks
            .entry(role_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }
}

impl std::fmt::Debug for HierarchyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyResolver")
            .field("grants", &self.grants.backend_name())
            .field("cache", &self.cache)
            .field("access_ttl", &self.access_ttl)
            .field("invalidation", &self.invalidation)
            .finish()
    }
}

fn validate_tree(tree: &AccessTree) -> Result<()> {
    let ids = tree
        .modules
        .iter()
        .chain(&tree.sub_modules)
        .chain(&tree.components)
        .copied()
        .chain(tree.actions.iter().map(|a| a.id()));

    for id in ids {
        if id <= 0 {
            return Err(WardenError::invalid_access_tree(format!(
                "Access tree contains invalid id {}",
                id
            )));
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
