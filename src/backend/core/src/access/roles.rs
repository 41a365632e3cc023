//! Administrator roles and role lookup.
//!
//! Two role names short-circuit the grant check:
//!
//! | Role                 | Bypasses                                   |
//! |----------------------|--------------------------------------------|
//! | platform super admin | everything, plan entitlement included      |
//! | tenant super admin   | grants, but only inside entitled modules   |
//!
//! Names come from configuration; the defaults are `platform-super-admin`
//! and `tenant-super-admin`.

use async_trait::async_trait;

use super::models::{Principal, Role, RoleId};
use crate::config::AccessConfig;
use crate::error::Result;

/// The two bypass role names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminRoles {
    pub platform_super_admin: String,
    pub tenant_super_admin: String,
}

impl AdminRoles {
    pub fn new(platform_super_admin: impl Into<String>, tenant_super_admin: impl Into<String>) -> Self {
        Self {
            platform_super_admin: platform_super_admin.into(),
            tenant_super_admin: tenant_super_admin.into(),
        }
    }

    pub fn is_platform_admin(&self, principal: &Principal) -> bool {
        principal.has_role(&self.platform_super_admin)
    }

    pub fn is_tenant_admin(&self, principal: &Principal) -> bool {
        principal.has_role(&self.tenant_super_admin)
    }

    /// Either kind of administrator.
    pub fn is_admin(&self, principal: &Principal) -> bool {
        self.is_platform_admin(principal) || self.is_tenant_admin(principal)
    }
}

impl Default for AdminRoles {
    fn default() -> Self {
        Self::from(&AccessConfig::default())
    }
}

impl From<&AccessConfig> for AdminRoles {
    fn from(config: &AccessConfig) -> Self {
        Self::new(
            config.platform_super_admin_role.clone(),
            config.tenant_super_admin_role.clone(),
        )
    }
}

/// Role records, for callers that only know role names.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn find_role(&self, role_id: RoleId) -> Result<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[&str]) -> Principal {
        Principal::new(
            1,
            Some(1),
            roles
                .iter()
                .enumerate()
                .map(|(i, name)| Role::new(i as RoleId + 1, *name))
                .collect(),
        )
    }

    #[test]
    fn test_default_names() {
        let admins = AdminRoles::default();
        assert_eq!(admins.platform_super_admin, "platform-super-admin");
        assert_eq!(admins.tenant_super_admin, "tenant-super-admin");
    }

    #[test]
    fn test_admin_detection() {
        let admins = AdminRoles::default();

        let platform = principal(&["platform-super-admin"]);
        assert!(admins.is_platform_admin(&platform));
        assert!(!admins.is_tenant_admin(&platform));
        assert!(admins.is_admin(&platform));

        let tenant = principal(&["viewer", "tenant-super-admin"]);
        assert!(admins.is_tenant_admin(&tenant));
        assert!(!admins.is_platform_admin(&tenant));

        assert!(!admins.is_admin(&principal(&["viewer"])));
    }

    #[test]
    fn test_custom_names() {
        let admins = AdminRoles::new("root", "owner");
        assert!(admins.is_tenant_admin(&principal(&["owner"])));
        assert!(!admins.is_tenant_admin(&principal(&["tenant-super-admin"])));
    }
}
