#![allow(clippy::result_large_err)]
//! # Warden Core
//!
//! Hierarchical, cacheable, multi-tenant access decisions.
//!
//! ## Architecture
//!
//! - **Access**: decision engine, hierarchical grant resolver, plan gate,
//!   scope resolver and an axum guard layer
//! - **Catalog**: read-only Module → SubModule → Component → Action tree
//! - **Store**: grant persistence in memory (fixtures) or PostgreSQL
//! - **Cache**: typed keys, per-key TTL and tag-based invalidation over
//!   in-memory or Redis backends
//! - **Telemetry**: structured logging and Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden_core::prelude::*;
//!
//! # async fn run() -> warden_core::Result<()> {
//! let store = Arc::new(MemoryStore::from_path("fixture.json")?);
//! let engine = AccessDecisionEngine::from_store(store, Cache::in_memory(10_000), &Config::default());
//!
//! let principal = Principal::new(1, Some(1), vec![Role::new(5, "hr-manager")]);
//! let decision = engine
//!     .can_perform_action(&principal, &"hrm.leave.requests.approve".parse()?)
//!     .await?;
//! println!("{} ({})", decision.allowed, decision.reason);
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod store;
pub mod telemetry;
pub mod tenancy;

pub use error::{ErrorCode, ErrorDetails, ErrorSeverity, Result, WardenError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::access::{
        AccessContext, AccessDecisionEngine, AccessTree, ActionEntry, AdminRoles, Decision,
        DecisionReason, Grant, HierarchyLevel, HierarchyResolver, NodeRef, PlanEntitlementGate,
        Principal, RequireAccessLayer, ResourcePath, Role, RoleDirectory, RoleId, Scope,
        ScopeResolver, TenantId,
    };
    pub use crate::cache::{Cache, CacheBackend, CacheKey, InvalidationMode};
    pub use crate::catalog::{CatalogReader, ModuleSummary};
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, Result, WardenError};
    pub use crate::store::{Fixture, GrantStore, MemoryStore, PgStore};
    pub use crate::tenancy::TenantDirectory;
}
