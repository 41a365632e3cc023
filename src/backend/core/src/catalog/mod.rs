//! Read-only access to the resource catalog.
//!
//! The catalog is authored elsewhere; the engine only resolves codes to ids,
//! walks parents and lists modules. Every child is looked up *under* its
//! already-resolved parent, so equal codes in different branches never clash.

pub mod models;

pub use models::{Action, Component, Module, ModuleSummary, SubModule};

use async_trait::async_trait;

use crate::access::models::{HierarchyLevel, ModuleSubtree, NodeRef};
use crate::error::Result;

/// Catalog lookups used by the resolver and the decision engine.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn find_module(&self, module_id: i64) -> Result<Option<Module>>;

    async fn find_module_by_code(&self, code: &str) -> Result<Option<Module>>;

    async fn find_sub_module_by_code(&self, module_id: i64, code: &str)
        -> Result<Option<SubModule>>;

    async fn find_component_by_code(
        &self,
        sub_module_id: i64,
        code: &str,
    ) -> Result<Option<Component>>;

    async fn find_action_by_code(&self, component_id: i64, code: &str) -> Result<Option<Action>>;

    /// Id of the node's parent at `node.level.parent()`.
    ///
    /// `None` for modules and for nodes whose record (or parent) is missing.
    async fn parent_id(&self, node: NodeRef) -> Result<Option<i64>>;

    async fn modules_by_ids(&self, ids: &[i64]) -> Result<Vec<Module>>;

    /// Every active module, ordered by id.
    async fn active_modules(&self) -> Result<Vec<Module>>;

    /// Codes of modules flagged both core and active.
    async fn core_module_codes(&self) -> Result<Vec<String>>;

    /// Descendant id sets under one module.
    async fn module_subtree(&self, module_id: i64) -> Result<ModuleSubtree>;
}

/// Walk `node` up to its owning module id. `None` when the chain is broken.
pub async fn owning_module_id(catalog: &dyn CatalogReader, node: NodeRef) -> Result<Option<i64>> {
    let mut current = node;
    while current.level != HierarchyLevel::Module {
        let Some(parent_level) = current.level.parent() else {
            break;
        };
        match catalog.parent_id(current).await? {
            Some(parent_id) => current = NodeRef::new(parent_level, parent_id),
            None => return Ok(None),
        }
    }
    Ok(Some(current.id))
}
