//! Access data models: hierarchy levels, grants, scopes, principals and the
//! editing-UI access tree.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

pub type RoleId = i64;
pub type UserId = i64;
pub type TenantId = i64;
pub type PlanId = i64;

// ═══════════════════════════════════════════════════════════════════════════════
// Hierarchy Level
// ═══════════════════════════════════════════════════════════════════════════════

/// One of the four catalog levels, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyLevel {
    Module,
    SubModule,
    Component,
    Action,
}

impl HierarchyLevel {
    pub const ALL: [HierarchyLevel; 4] = [
        Self::Module,
        Self::SubModule,
        Self::Component,
        Self::Action,
    ];

    /// The next level up; `None` for modules.
    pub fn parent(&self) -> Option<HierarchyLevel> {
        match self {
            Self::Module => None,
            Self::SubModule => Some(Self::Module),
            Self::Component => Some(Self::SubModule),
            Self::Action => Some(Self::Component),
        }
    }

    /// Stable name used in cache keys, logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::SubModule => "sub_module",
            Self::Component => "component",
            Self::Action => "action",
        }
    }

    /// Depth below the module level (module = 0).
    pub fn depth(&self) -> usize {
        match self {
            Self::Module => 0,
            Self::SubModule => 1,
            Self::Component => 2,
            Self::Action => 3,
        }
    }
}

impl fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addresses one catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub level: HierarchyLevel,
    pub id: i64,
}

impl NodeRef {
    pub fn new(level: HierarchyLevel, id: i64) -> Self {
        Self { level, id }
    }

    pub fn module(id: i64) -> Self {
        Self::new(HierarchyLevel::Module, id)
    }

    pub fn sub_module(id: i64) -> Self {
        Self::new(HierarchyLevel::SubModule, id)
    }

    pub fn component(id: i64) -> Self {
        Self::new(HierarchyLevel::Component, id)
    }

    pub fn action(id: i64) -> Self {
        Self::new(HierarchyLevel::Action, id)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.level, self.id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scope
// ═══════════════════════════════════════════════════════════════════════════════

/// Data-visibility scope of an action grant. Ordered by rank.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Own = 1,
    Team = 2,
    Department = 3,
    #[default]
    All = 4,
}

impl Scope {
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Own => "own",
            Self::Team => "team",
            Self::Department => "department",
            Self::All => "all",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "own" => Ok(Self::Own),
            "team" => Ok(Self::Team),
            "department" => Ok(Self::Department),
            "all" => Ok(Self::All),
            other => Err(WardenError::validation(format!("unknown scope '{}'", other))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Grants
// ═══════════════════════════════════════════════════════════════════════════════

/// A role's grant on exactly one catalog node.
///
/// Scope is only meaningful on action grants; [`Grant::new`] pins every other
/// level to [`Scope::All`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    pub role_id: RoleId,
    pub node: NodeRef,
    pub scope: Scope,
}

impl Grant {
    pub fn new(role_id: RoleId, node: NodeRef, scope: Scope) -> Self {
        let scope = if node.level == HierarchyLevel::Action {
            scope
        } else {
            Scope::All
        };
        Self {
            role_id,
            node,
            scope,
        }
    }

    pub fn module(role_id: RoleId, module_id: i64) -> Self {
        Self::new(role_id, NodeRef::module(module_id), Scope::All)
    }

    pub fn action(role_id: RoleId, action_id: i64, scope: Scope) -> Self {
        Self::new(role_id, NodeRef::action(action_id), scope)
    }

    pub fn level(&self) -> HierarchyLevel {
        self.node.level
    }

    /// Persisted row form of this grant.
    pub fn to_row(&self) -> GrantRow {
        let mut row = GrantRow {
            role_id: self.role_id,
            module_id: None,
            sub_module_id: None,
            component_id: None,
            action_id: None,
            scope: Some(self.scope.as_str().to_string()),
        };
        match self.node.level {
            HierarchyLevel::Module => row.module_id = Some(self.node.id),
            HierarchyLevel::SubModule => row.sub_module_id = Some(self.node.id),
            HierarchyLevel::Component => row.component_id = Some(self.node.id),
            HierarchyLevel::Action => row.action_id = Some(self.node.id),
        }
        row
    }
}

/// A grant as stored: four nullable foreign keys of which exactly one is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GrantRow {
    pub role_id: RoleId,
    #[serde(default)]
    pub module_id: Option<i64>,
    #[serde(default)]
    pub sub_module_id: Option<i64>,
    #[serde(default)]
    pub component_id: Option<i64>,
    #[serde(default)]
    pub action_id: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TryFrom<GrantRow> for Grant {
    type Error = WardenError;

    /// Rejects rows naming zero or several levels, and unknown scopes.
    fn try_from(row: GrantRow) -> Result<Self> {
        let set: Vec<NodeRef> = [
            row.module_id.map(NodeRef::module),
            row.sub_module_id.map(NodeRef::sub_module),
            row.component_id.map(NodeRef::component),
            row.action_id.map(NodeRef::action),
        ]
        .into_iter()
        .flatten()
        .collect();

        let node = match set.as_slice() {
            [node] => *node,
            _ => {
                return Err(WardenError::invalid_grant(
                    row.role_id.to_string(),
                    format!(
                        "grant row for role {} references {} hierarchy levels, expected exactly 1",
                        row.role_id,
                        set.len()
                    ),
                ))
            }
        };

        let scope = match row.scope.as_deref() {
            None => Scope::All,
            Some(raw) => raw.parse().map_err(|_| {
                WardenError::invalid_grant(
                    row.role_id.to_string(),
                    format!("grant row for role {} has unknown scope '{}'", row.role_id, raw),
                )
            })?,
        };

        Ok(Grant::new(row.role_id, node, scope))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roles, Principals, Tenants
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

impl Role {
    pub fn new(id: RoleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The caller of a decision: a user, their tenant and their roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn new(user_id: UserId, tenant_id: Option<TenantId>, roles: Vec<Role>) -> Self {
        Self {
            user_id,
            tenant_id,
            roles,
        }
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name == name)
    }

    pub fn role_ids(&self) -> impl Iterator<Item = RoleId> + '_ {
        self.roles.iter().map(|r| r.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    #[serde(default)]
    pub custom_module_codes: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Access Tree
// ═══════════════════════════════════════════════════════════════════════════════

/// An action entry in an access tree: a bare id or `{id, scope?}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionEntry {
    Id(i64),
    Scoped {
        id: i64,
        #[serde(default)]
        scope: Option<Scope>,
    },
}

impl ActionEntry {
    pub fn id(&self) -> i64 {
        match self {
            Self::Id(id) | Self::Scoped { id, .. } => *id,
        }
    }

    /// Missing scope means `all`.
    pub fn scope(&self) -> Scope {
        match self {
            Self::Id(_) => Scope::All,
            Self::Scoped { scope, .. } => scope.unwrap_or_default(),
        }
    }
}

/// A role's grants partitioned by level, as edited in an admin UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTree {
    #[serde(default)]
    pub modules: Vec<i64>,
    #[serde(default)]
    pub sub_modules: Vec<i64>,
    #[serde(default)]
    pub components: Vec<i64>,
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
}

impl AccessTree {
    /// Partition grants by level, sorted by id.
    pub fn from_grants<'a>(grants: impl IntoIterator<Item = &'a Grant>) -> Self {
        let mut modules = BTreeSet::new();
        let mut sub_modules = BTreeSet::new();
        let mut components = BTreeSet::new();
        let mut actions: BTreeMap<i64, Scope> = BTreeMap::new();

        for grant in grants {
            match grant.node.level {
                HierarchyLevel::Module => {
                    modules.insert(grant.node.id);
                }
                HierarchyLevel::SubModule => {
                    sub_modules.insert(grant.node.id);
                }
                HierarchyLevel::Component => {
                    components.insert(grant.node.id);
                }
                HierarchyLevel::Action => {
                    let slot = actions.entry(grant.node.id).or_insert(grant.scope);
                    *slot = (*slot).max(grant.scope);
                }
            }
        }

        Self {
            modules: modules.into_iter().collect(),
            sub_modules: sub_modules.into_iter().collect(),
            components: components.into_iter().collect(),
            actions: actions
                .into_iter()
                .map(|(id, scope)| ActionEntry::Scoped {
                    id,
                    scope: Some(scope),
                })
                .collect(),
        }
    }

    /// Flatten into grants for `role_id`, collapsing duplicates.
    ///
    /// When the same action appears twice with different scopes the widest
    /// scope is kept.
    pub fn to_grants(&self, role_id: RoleId) -> Vec<Grant> {
        let mut grants: BTreeSet<Grant> = BTreeSet::new();

        for id in &self.modules {
            grants.insert(Grant::new(role_id, NodeRef::module(*id), Scope::All));
        }
        for id in &self.sub_modules {
            grants.insert(Grant::new(role_id, NodeRef::sub_module(*id), Scope::All));
        }
        for id in &self.components {
            grants.insert(Grant::new(role_id, NodeRef::component(*id), Scope::All));
        }

        let mut widest: BTreeMap<i64, Scope> = BTreeMap::new();
        for entry in &self.actions {
            let slot = widest.entry(entry.id()).or_insert(entry.scope());
            *slot = (*slot).max(entry.scope());
        }
        for (id, scope) in widest {
            grants.insert(Grant::new(role_id, NodeRef::action(id), scope));
        }

        grants.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
            && self.sub_modules.is_empty()
            && self.components.is_empty()
            && self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len() + self.sub_modules.len() + self.components.len() + self.actions.len()
    }
}

/// Descendant id sets of one module, used for set-based revokes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSubtree {
    pub module_id: i64,
    pub sub_module_ids: Vec<i64>,
    pub component_ids: Vec<i64>,
    pub action_ids: Vec<i64>,
}

impl ModuleSubtree {
    /// Whether `node` is the module itself or one of its descendants.
    pub fn contains(&self, node: &NodeRef) -> bool {
        match node.level {
            HierarchyLevel::Module => node.id == self.module_id,
            HierarchyLevel::SubModule => self.sub_module_ids.contains(&node.id),
            HierarchyLevel::Component => self.component_ids.contains(&node.id),
            HierarchyLevel::Action => self.action_ids.contains(&node.id),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Resource Path
// ═══════════════════════════════════════════════════════════════════════════════

fn code_pattern() -> &'static Regex {
    static CODE: OnceLock<Regex> = OnceLock::new();
    CODE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("static regex"))
}

/// Codes naming a resource from the module down to the requested level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourcePath {
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl ResourcePath {
    pub fn module(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            sub_module: None,
            component: None,
            action: None,
        }
    }

    pub fn sub_module(module: impl Into<String>, sub_module: impl Into<String>) -> Self {
        Self {
            sub_module: Some(sub_module.into()),
            ..Self::module(module)
        }
    }

    pub fn component(
        module: impl Into<String>,
        sub_module: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            component: Some(component.into()),
            ..Self::sub_module(module, sub_module)
        }
    }

    pub fn action(
        module: impl Into<String>,
        sub_module: impl Into<String>,
        component: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::component(module, sub_module, component)
        }
    }

    /// The deepest level named.
    pub fn level(&self) -> HierarchyLevel {
        if self.action.is_some() {
            HierarchyLevel::Action
        } else if self.component.is_some() {
            HierarchyLevel::Component
        } else if self.sub_module.is_some() {
            HierarchyLevel::SubModule
        } else {
            HierarchyLevel::Module
        }
    }

    /// The path cut down to `level`, if it is deep enough.
    pub fn truncated(&self, level: HierarchyLevel) -> Option<Self> {
        if level > self.level() {
            return None;
        }
        let depth = level.depth();
        Some(Self {
            module: self.module.clone(),
            sub_module: if depth >= 1 { self.sub_module.clone() } else { None },
            component: if depth >= 2 { self.component.clone() } else { None },
            action: if depth >= 3 { self.action.clone() } else { None },
        })
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.module)?;
        for part in [&self.sub_module, &self.component, &self.action]
            .into_iter()
            .flatten()
        {
            write!(f, ".{}", part)?;
        }
        Ok(())
    }
}

impl FromStr for ResourcePath {
    type Err = WardenError;

    /// Parses `module[.sub_module[.component[.action]]]`.
    fn from_str(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.is_empty()
            || parts.len() > 4
            || parts.iter().any(|p| !code_pattern().is_match(p))
        {
            return Err(WardenError::invalid_resource_path(raw));
        }

        let owned = |i: usize| parts.get(i).map(|p| p.to_string());
        Ok(Self {
            module: parts[0].to_string(),
            sub_module: owned(1),
            component: owned(2),
            action: owned(3),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn row(ids: [Option<i64>; 4], scope: Option<&str>) -> GrantRow {
        GrantRow {
            role_id: 1,
            module_id: ids[0],
            sub_module_id: ids[1],
            component_id: ids[2],
            action_id: ids[3],
            scope: scope.map(String::from),
        }
    }

    #[test]
    fn test_level_parent_chain() {
        assert_eq!(HierarchyLevel::Action.parent(), Some(HierarchyLevel::Component));
        assert_eq!(HierarchyLevel::Component.parent(), Some(HierarchyLevel::SubModule));
        assert_eq!(HierarchyLevel::SubModule.parent(), Some(HierarchyLevel::Module));
        assert_eq!(HierarchyLevel::Module.parent(), None);
    }

    #[test]
    fn test_scope_rank_and_order() {
        assert_eq!(Scope::Own.rank(), 1);
        assert_eq!(Scope::All.rank(), 4);
        assert!(Scope::Department > Scope::Team);
        assert_eq!([Scope::Team, Scope::Own, Scope::Department].iter().max(), Some(&Scope::Department));
        assert_eq!("team".parse::<Scope>().unwrap(), Scope::Team);
        assert!("everyone".parse::<Scope>().is_err());
        assert_eq!(serde_json::to_string(&Scope::Department).unwrap(), "\"department\"");
    }

    #[test]
    fn test_grant_row_exactly_one_level() {
        let grant = Grant::try_from(row([None, None, None, Some(9)], Some("team"))).unwrap();
        assert_eq!(grant.node, NodeRef::action(9));
        assert_eq!(grant.scope, Scope::Team);

        let grant = Grant::try_from(row([Some(3), None, None, None], None)).unwrap();
        assert_eq!(grant.node, NodeRef::module(3));
        assert_eq!(grant.scope, Scope::All);
    }

    #[test]
    fn test_grant_row_rejects_zero_or_many_levels() {
        let err = Grant::try_from(row([None, None, None, None], None)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidGrant);

        let err = Grant::try_from(row([Some(1), Some(2), None, None], None)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidGrant);

        let err = Grant::try_from(row([Some(1), None, Some(2), Some(3)], None)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidGrant);
    }

    #[test]
    fn test_grant_row_rejects_unknown_scope() {
        let err = Grant::try_from(row([None, None, None, Some(1)], Some("galaxy"))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidGrant);
    }

    #[test]
    fn test_non_action_grants_carry_all() {
        let grant = Grant::new(1, NodeRef::component(5), Scope::Own);
        assert_eq!(grant.scope, Scope::All);
        assert_eq!(grant.to_row().component_id, Some(5));
        assert_eq!(Grant::try_from(grant.to_row()).unwrap(), grant);
    }

    #[test]
    fn test_action_entry_shapes() {
        let tree: AccessTree = serde_json::from_str(
            r#"{"modules":[1],"actions":[7, {"id": 8}, {"id": 9, "scope": "own"}]}"#,
        )
        .unwrap();
        assert_eq!(tree.actions[0].scope(), Scope::All);
        assert_eq!(tree.actions[1].scope(), Scope::All);
        assert_eq!(tree.actions[2].scope(), Scope::Own);
        assert_eq!(tree.actions[2].id(), 9);
    }

    #[test]
    fn test_to_grants_collapses_duplicates() {
        let tree = AccessTree {
            modules: vec![1, 1],
            sub_modules: vec![],
            components: vec![4],
            actions: vec![
                ActionEntry::Id(7),
                ActionEntry::Scoped { id: 8, scope: Some(Scope::Own) },
                ActionEntry::Scoped { id: 8, scope: Some(Scope::Team) },
            ],
        };
        let grants = tree.to_grants(2);
        assert_eq!(grants.len(), 4);
        assert!(grants.contains(&Grant::action(2, 8, Scope::Team)));
        assert!(grants.contains(&Grant::action(2, 7, Scope::All)));
    }

    #[test]
    fn test_from_grants_sorted() {
        let grants = vec![
            Grant::module(1, 5),
            Grant::module(1, 2),
            Grant::action(1, 30, Scope::Own),
            Grant::action(1, 10, Scope::Team),
        ];
        let tree = AccessTree::from_grants(&grants);
        assert_eq!(tree.modules, vec![2, 5]);
        assert_eq!(tree.actions[0].id(), 10);
        assert_eq!(tree.actions[1].scope(), Scope::Own);
    }

    #[test]
    fn test_resource_path_parse() {
        let path: ResourcePath = "hrm.leave.requests.approve".parse().unwrap();
        assert_eq!(path, ResourcePath::action("hrm", "leave", "requests", "approve"));
        assert_eq!(path.level(), HierarchyLevel::Action);
        assert_eq!(path.to_string(), "hrm.leave.requests.approve");

        let path: ResourcePath = "finance".parse().unwrap();
        assert_eq!(path.level(), HierarchyLevel::Module);

        assert!("".parse::<ResourcePath>().is_err());
        assert!("hrm..leave".parse::<ResourcePath>().is_err());
        assert!("a.b.c.d.e".parse::<ResourcePath>().is_err());
        assert!("hrm.le ave".parse::<ResourcePath>().is_err());
    }

    #[test]
    fn test_resource_path_truncated() {
        let path = ResourcePath::action("hrm", "leave", "requests", "approve");
        assert_eq!(
            path.truncated(HierarchyLevel::SubModule),
            Some(ResourcePath::sub_module("hrm", "leave"))
        );
        assert_eq!(ResourcePath::module("hrm").truncated(HierarchyLevel::Action), None);
    }

    #[test]
    fn test_subtree_contains() {
        let subtree = ModuleSubtree {
            module_id: 1,
            sub_module_ids: vec![10],
            component_ids: vec![100],
            action_ids: vec![1000, 1001],
        };
        assert!(subtree.contains(&NodeRef::module(1)));
        assert!(subtree.contains(&NodeRef::action(1001)));
        assert!(!subtree.contains(&NodeRef::module(2)));
        assert!(!subtree.contains(&NodeRef::sub_module(11)));
    }

    #[test]
    fn test_principal_has_role() {
        let principal = Principal::new(1, Some(3), vec![Role::new(5, "hr-manager")]);
        assert!(principal.has_role("hr-manager"));
        assert!(!principal.has_role("tenant-super-admin"));
        assert_eq!(principal.role_ids().collect::<Vec<_>>(), vec![5]);
    }
}
