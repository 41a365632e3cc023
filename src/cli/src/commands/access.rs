//! Read-side commands: `check`, `scope` and `modules`.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use warden_core::access::{Decision, ResourcePath, Scope, TenantId};
use warden_core::catalog::ModuleSummary;

use crate::context::EngineContext;
use crate::output::{self, OutputFormat};

/// Who is asking.
#[derive(Debug, Args)]
pub struct PrincipalArgs {
    /// Role names or ids, comma separated
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub roles: Vec<String>,

    /// Tenant id; omit for a user outside any tenant
    #[arg(short, long)]
    pub tenant: Option<TenantId>,

    /// User id, echoed in logs only
    #[arg(long, default_value = "0")]
    pub user: i64,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Dotted resource path, e.g. `hrm.leave.requests.approve`
    pub path: String,

    #[command(flatten)]
    pub principal: PrincipalArgs,
}

#[derive(Debug, Args)]
pub struct ScopeArgs {
    /// Action id
    pub action_id: i64,

    #[command(flatten)]
    pub principal: PrincipalArgs,
}

#[derive(Debug, Args)]
pub struct ModulesArgs {
    #[command(flatten)]
    pub principal: PrincipalArgs,
}

#[derive(Debug, Serialize, Tabled)]
struct ModuleRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Name")]
    name: String,
}

impl From<ModuleSummary> for ModuleRow {
    fn from(module: ModuleSummary) -> Self {
        Self {
            id: module.id,
            code: module.code,
            name: module.name,
        }
    }
}

#[derive(Debug, Serialize)]
struct ScopeReport {
    action_id: i64,
    scope: Option<Scope>,
}

// ── Execution ───────────────────────────────────────────────────────────────

/// Returns the decision so `main` can pick the exit code.
pub async fn check(args: CheckArgs, ctx: &EngineContext, format: OutputFormat) -> Result<Decision> {
    let path: ResourcePath = args
        .path
        .parse()
        .with_context(|| format!("Invalid resource path '{}'", args.path))?;
    let p = &args.principal;
    let principal = ctx.principal(p.user, p.tenant, &p.roles).await?;

    let decision = ctx.engine.check(&principal, &path).await?;

    match format {
        OutputFormat::Table => print_decision(&path, &decision),
        _ => output::print_item(&decision, format)?,
    }
    Ok(decision)
}

fn print_decision(path: &ResourcePath, decision: &Decision) {
    if decision.allowed {
        output::print_success(&format!("{} allowed", path));
    } else {
        output::print_denied(&format!("{} denied", path));
    }
    output::print_detail("Reason", decision.reason.as_str());
    output::print_detail("Message", &decision.message);
    if let Some(scope) = decision.scope {
        output::print_detail("Scope", scope.as_str());
    }
}

pub async fn scope(args: ScopeArgs, ctx: &EngineContext, format: OutputFormat) -> Result<()> {
    let p = &args.principal;
    let principal = ctx.principal(p.user, p.tenant, &p.roles).await?;

    let scope = ctx
        .engine
        .get_user_access_scope(&principal, args.action_id)
        .await?;

    match format {
        OutputFormat::Table => match scope {
            Some(scope) => output::print_detail(&format!("Action {}", args.action_id), scope.as_str()),
            None => output::print_denied(&format!("No access to action {}", args.action_id)),
        },
        _ => output::print_item(
            &ScopeReport {
                action_id: args.action_id,
                scope,
            },
            format,
        )?,
    }
    Ok(())
}

pub async fn modules(args: ModulesArgs, ctx: &EngineContext, format: OutputFormat) -> Result<()> {
    let p = &args.principal;
    let principal = ctx.principal(p.user, p.tenant, &p.roles).await?;

    let rows: Vec<ModuleRow> = ctx
        .engine
        .get_accessible_modules(&principal)
        .await?
        .into_iter()
        .map(ModuleRow::from)
        .collect();

    output::print_list(&rows, format)
}
