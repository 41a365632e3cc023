//! Access decisions over the Module → SubModule → Component → Action catalog.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │ RequireAccessLayer   │──▶│ AccessDecisionEngine │
//! └──────────────────────┘   └──────────┬───────────┘
//!                                       │
//!          ┌────────────────┬───────────┼────────────────┐
//!          ▼                ▼           ▼                ▼
//!   ┌────────────┐  ┌──────────────┐ ┌───────────┐ ┌──────────────┐
//!   │ AdminRoles │  │ PlanGate     │ │ Catalog   │ │ Hierarchy    │
//!   └────────────┘  └──────────────┘ └───────────┘ │ + Scope      │
//!                                                  └──────────────┘
//! ```

pub mod decision;
pub mod engine;
pub mod hierarchy;
pub mod middleware;
pub mod models;
pub mod plan;
pub mod roles;
pub mod scope;

pub use decision::{Decision, DecisionReason};
pub use engine::AccessDecisionEngine;
pub use hierarchy::HierarchyResolver;
pub use middleware::{AccessContext, RequireAccessLayer, RequireAccessService};
pub use models::{
    AccessTree, ActionEntry, Grant, GrantRow, HierarchyLevel, ModuleSubtree, NodeRef, PlanId,
    Principal, ResourcePath, Role, RoleId, Scope, Tenant, TenantId, UserId,
};
pub use plan::PlanEntitlementGate;
pub use roles::{AdminRoles, RoleDirectory};
pub use scope::ScopeResolver;
