//! Catalog records: the read-only Module → SubModule → Component → Action tree.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Module {
    pub id: i64,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub is_core: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubModule {
    pub id: i64,
    pub module_id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Component {
    pub id: i64,
    pub sub_module_id: i64,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Action {
    pub id: i64,
    pub component_id: i64,
    pub code: String,
    pub name: String,
}

/// Navigation entry returned by `get_accessible_modules`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModuleSummary {
    pub id: i64,
    pub code: String,
    pub name: String,
}

impl From<&Module> for ModuleSummary {
    fn from(module: &Module) -> Self {
        Self {
            id: module.id,
            code: module.code.clone(),
            name: module.name.clone(),
        }
    }
}

fn default_active() -> bool {
    true
}
