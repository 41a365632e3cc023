//! Grant administration: `tree`, `sync`, `grant` and `revoke`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use warden_core::access::{AccessTree, ActionEntry};

use crate::context::EngineContext;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct TreeArgs {
    /// Role name or id
    pub role: String,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Role name or id
    pub role: String,

    /// Access tree file (JSON)
    pub tree: PathBuf,
}

#[derive(Debug, Args)]
pub struct ModuleGrantArgs {
    /// Role name or id
    pub role: String,

    /// Module id
    pub module_id: i64,
}

#[derive(Debug, Serialize, Tabled)]
struct GrantRow {
    #[tabled(rename = "Level")]
    level: &'static str,
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Scope")]
    scope: &'static str,
}

fn rows(tree: &AccessTree) -> Vec<GrantRow> {
    let all = |level: &'static str, ids: &[i64]| {
        ids.iter()
            .map(|id| GrantRow {
                level,
                id: *id,
                scope: "all",
            })
            .collect::<Vec<_>>()
    };

    let mut rows = all("module", &tree.modules);
    rows.extend(all("sub_module", &tree.sub_modules));
    rows.extend(all("component", &tree.components));
    rows.extend(tree.actions.iter().map(|entry: &ActionEntry| GrantRow {
        level: "action",
        id: entry.id(),
        scope: entry.scope().as_str(),
    }));
    rows
}

fn load_tree(path: &Path) -> Result<AccessTree> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse access tree {}", path.display()))
}

fn report_persisted(ctx: &EngineContext) -> Result<()> {
    if let Some(path) = ctx.persist()? {
        output::print_info(&format!("Saved {}", path.display()));
    }
    Ok(())
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn tree(args: TreeArgs, ctx: &EngineContext, format: OutputFormat) -> Result<()> {
    let role = ctx.role(&args.role).await?;
    let tree = ctx.engine.get_role_access_tree(role.id).await?;

    match format {
        OutputFormat::Table => {
            output::print_header(&format!("Access tree of {} ({})", role.name, role.id));
            output::print_list(&rows(&tree), format)
        }
        _ => output::print_item(&tree, format),
    }
}

pub async fn sync(args: SyncArgs, ctx: &EngineContext) -> Result<()> {
    let role_id = ctx.role_id(&args.role).await?;
    let tree = load_tree(&args.tree)?;

    ctx.engine.sync_role_access(role_id, &tree).await?;
    output::print_success(&format!(
        "Role {} now holds {} grant(s)",
        args.role,
        tree.to_grants(role_id).len()
    ));
    report_persisted(ctx)
}

pub async fn grant(args: ModuleGrantArgs, ctx: &EngineContext) -> Result<()> {
    let role_id = ctx.role_id(&args.role).await?;

    ctx.engine.grant_module_access(role_id, args.module_id).await?;
    output::print_success(&format!(
        "Granted module {} to role {}",
        args.module_id, args.role
    ));
    report_persisted(ctx)
}

pub async fn revoke(args: ModuleGrantArgs, ctx: &EngineContext) -> Result<()> {
    let role_id = ctx.role_id(&args.role).await?;

    let removed = ctx.engine.revoke_module_access(role_id, args.module_id).await?;
    output::print_success(&format!(
        "Revoked module {} from role {} ({} grant(s) removed)",
        args.module_id, args.role, removed
    ));
    report_persisted(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::access::Scope;

    #[test]
    fn test_rows_flatten_every_level() {
        let tree = AccessTree {
            modules: vec![1],
            sub_modules: vec![10],
            components: vec![],
            actions: vec![
                ActionEntry::Id(1000),
                ActionEntry::Scoped {
                    id: 1001,
                    scope: Some(Scope::Own),
                },
            ],
        };

        let rows = rows(&tree);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].level, "module");
        assert_eq!(rows[2].scope, "all");
        assert_eq!(rows[3].scope, "own");
    }

    #[test]
    fn test_load_tree_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.json");
        std::fs::write(&path, "{\"modules\": \"hrm\"}").unwrap();
        assert!(load_tree(&path).is_err());

        std::fs::write(&path, "{\"modules\": [1], \"actions\": [{\"id\": 5}]}").unwrap();
        let tree = load_tree(&path).unwrap();
        assert_eq!(tree.modules, vec![1]);
        assert_eq!(tree.actions[0].scope(), Scope::All);
    }
}
