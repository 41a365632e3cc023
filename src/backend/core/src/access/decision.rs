//! Structured access decisions.
//!
//! A normal deny is data, not an error. The reason labels are stable and safe
//! to show to UIs and middleware.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::models::{HierarchyLevel, ResourcePath, Scope};

// ═══════════════════════════════════════════════════════════════════════════════
// Decision Reason
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    NotFound,
    PlanRestriction,
    NoModuleAccess,
    NoSubmoduleAccess,
    NoComponentAccess,
    NoActionAccess,
    PlatformSuperAdmin,
    TenantSuperAdmin,
    Success,
}

impl DecisionReason {
    /// The deny reason for a missing grant at `level`.
    pub fn no_access(level: HierarchyLevel) -> Self {
        match level {
            HierarchyLevel::Module => Self::NoModuleAccess,
            HierarchyLevel::SubModule => Self::NoSubmoduleAccess,
            HierarchyLevel::Component => Self::NoComponentAccess,
            HierarchyLevel::Action => Self::NoActionAccess,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PlanRestriction => "plan_restriction",
            Self::NoModuleAccess => "no_module_access",
            Self::NoSubmoduleAccess => "no_submodule_access",
            Self::NoComponentAccess => "no_component_access",
            Self::NoActionAccess => "no_action_access",
            Self::PlatformSuperAdmin => "platform_super_admin",
            Self::TenantSuperAdmin => "tenant_super_admin",
            Self::Success => "success",
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(
            self,
            Self::PlatformSuperAdmin | Self::TenantSuperAdmin | Self::Success
        )
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of one access check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
    pub message: String,
    /// Effective data scope, set on allowed action checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

impl Decision {
    pub fn allow(reason: DecisionReason, message: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason,
            message: message.into(),
            scope: None,
        }
    }

    pub fn deny(reason: DecisionReason, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason,
            message: message.into(),
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Option<Scope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn platform_super_admin() -> Self {
        Self::allow(
            DecisionReason::PlatformSuperAdmin,
            "Platform super admin has full access",
        )
    }

    pub fn tenant_super_admin() -> Self {
        Self::allow(
            DecisionReason::TenantSuperAdmin,
            "Tenant super admin has full access within subscribed modules",
        )
    }

    pub fn success(level: HierarchyLevel) -> Self {
        Self::allow(DecisionReason::Success, format!("Access granted to {}", level))
    }

    pub fn not_found(level: HierarchyLevel, path: &ResourcePath) -> Self {
        Self::deny(
            DecisionReason::NotFound,
            format!("The {} '{}' does not exist", level, path),
        )
    }

    pub fn plan_restriction(module_code: &str) -> Self {
        Self::deny(
            DecisionReason::PlanRestriction,
            format!("Module '{}' is not included in the subscription plan", module_code),
        )
    }

    pub fn no_access(level: HierarchyLevel, path: &ResourcePath) -> Self {
        Self::deny(
            DecisionReason::no_access(level),
            format!("No role grants access to {} '{}'", level, path),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
