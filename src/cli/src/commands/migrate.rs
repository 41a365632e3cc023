//! `migrate`: apply the bundled PostgreSQL migrations.

use anyhow::{Context, Result};

use crate::context::EngineContext;
use crate::output;

pub async fn execute(ctx: &EngineContext) -> Result<()> {
    let store = ctx.postgres()?;
    store.migrate().await.context("Migration failed")?;
    output::print_success("Database schema is up to date");
    Ok(())
}
