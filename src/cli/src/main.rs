//! Warden CLI - query access decisions and administer role grants.
//!
//! Runs the engine in-process against a fixture file or a PostgreSQL
//! database.

mod commands;
mod context;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use warden_core::config::Config;
use warden_core::telemetry::{init_logging, LogFormat};

use commands::{access, grants, migrate};
use context::EngineContext;
use output::OutputFormat;

/// Warden - hierarchical access-decision engine CLI
#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Warden - hierarchical, multi-tenant access decisions",
    long_about = "Check access decisions and manage role grants against a fixture file or a PostgreSQL database.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Fixture file (JSON or TOML) loaded into an in-memory store
    #[arg(short, long, global = true, env = "WARDEN_FIXTURE")]
    fixture: Option<PathBuf>,

    /// PostgreSQL connection URL
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Configuration file; `WARDEN__*` environment variables apply on top
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log filter directive
    #[arg(long, global = true, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether roles may access a resource path; exits 2 on deny
    Check(access::CheckArgs),

    /// Effective data scope on an action
    Scope(access::ScopeArgs),

    /// Modules visible in navigation
    Modules(access::ModulesArgs),

    /// Show a role's grants
    Tree(grants::TreeArgs),

    /// Replace a role's grants with an access tree file
    Sync(grants::SyncArgs),

    /// Grant a whole module to a role
    Grant(grants::ModuleGrantArgs),

    /// Revoke a module and everything below it from a role
    Revoke(grants::ModuleGrantArgs),

    /// Apply database migrations (PostgreSQL only)
    Migrate,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load {}", path))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    let mut config = context::with_database_url(config, cli.database_url.clone());

    config.logging.level = cli.log_level.clone();
    config.logging.format = LogFormat::Compact;
    Ok(config)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    init_logging(&config.logging)?;

    let ctx = EngineContext::open(cli.fixture.as_deref(), &config).await?;
    let format = cli.output;

    match cli.command {
        Commands::Check(args) => {
            let decision = access::check(args, &ctx, format).await?;
            return Ok(if decision.allowed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            });
        }
        Commands::Scope(args) => access::scope(args, &ctx, format).await?,
        Commands::Modules(args) => access::modules(args, &ctx, format).await?,
        Commands::Tree(args) => grants::tree(args, &ctx, format).await?,
        Commands::Sync(args) => grants::sync(args, &ctx).await?,
        Commands::Grant(args) => grants::grant(args, &ctx).await?,
        Commands::Revoke(args) => grants::revoke(args, &ctx).await?,
        Commands::Migrate => migrate::execute(&ctx).await?,
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_check_with_roles() {
        let cli = Cli::try_parse_from([
            "warden",
            "--fixture",
            "acme.json",
            "check",
            "hrm.leave",
            "--roles",
            "hr-manager,91",
            "--tenant",
            "1",
        ])
        .unwrap();

        match cli.command {
            Commands::Check(args) => {
                assert_eq!(args.path, "hrm.leave");
                assert_eq!(args.principal.roles, vec!["hr-manager", "91"]);
                assert_eq!(args.principal.tenant, Some(1));
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn test_roles_are_required() {
        assert!(Cli::try_parse_from(["warden", "modules"]).is_err());
    }

    #[test]
    fn test_output_format_is_global() {
        let cli = Cli::try_parse_from(["warden", "tree", "hr-manager", "-o", "yaml"]).unwrap();
        assert_eq!(cli.output, OutputFormat::Yaml);
    }
}
