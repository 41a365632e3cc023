//! Backend selection: a fixture file or a PostgreSQL database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use warden_core::access::{AccessDecisionEngine, Principal, Role, RoleDirectory, RoleId, TenantId};
use warden_core::cache::Cache;
use warden_core::config::{Config, DatabaseConfig};
use warden_core::store::{MemoryStore, PgStore};

/// Where grants and the catalog come from.
enum Backend {
    Fixture { path: PathBuf, store: Arc<MemoryStore> },
    Postgres(Arc<PgStore>),
}

/// An engine plus the store behind it.
pub struct EngineContext {
    pub engine: AccessDecisionEngine,
    roles: Arc<dyn RoleDirectory>,
    backend: Backend,
}

impl EngineContext {
    /// Build from `--fixture` or `--database-url`. The fixture wins when both
    /// are given.
    pub async fn open(fixture: Option<&Path>, config: &Config) -> Result<Self> {
        let cache = Cache::from_settings(&config.cache)
            .await
            .context("Failed to build cache")?;

        if let Some(path) = fixture {
            let store = Arc::new(
                MemoryStore::from_path(path)
                    .with_context(|| format!("Failed to load fixture {}", path.display()))?,
            );
            return Ok(Self {
                engine: AccessDecisionEngine::from_store(store.clone(), cache, config),
                roles: store.clone(),
                backend: Backend::Fixture {
                    path: path.to_path_buf(),
                    store,
                },
            });
        }

        let Some(database) = &config.database else {
            bail!("No backend: pass --fixture <file> or --database-url <url>");
        };
        let store = Arc::new(PgStore::connect(database).await.with_context(|| {
            format!("Failed to connect to {}", redact(&database.url))
        })?);

        Ok(Self {
            engine: AccessDecisionEngine::from_store(store.clone(), cache, config),
            roles: store.clone(),
            backend: Backend::Postgres(store),
        })
    }

    /// Resolve a role given by numeric id or by name.
    pub async fn role(&self, role: &str) -> Result<Role> {
        let found = match role.parse::<RoleId>() {
            Ok(id) => self.roles.find_role(id).await?,
            Err(_) => self.roles.find_role_by_name(role).await?,
        };
        found.with_context(|| format!("Unknown role '{}'", role))
    }

    pub async fn role_id(&self, role: &str) -> Result<RoleId> {
        Ok(self.role(role).await?.id)
    }

    pub async fn principal(
        &self,
        user_id: i64,
        tenant_id: Option<TenantId>,
        roles: &[String],
    ) -> Result<Principal> {
        let mut resolved = Vec::with_capacity(roles.len());
        for role in roles {
            resolved.push(self.role(role).await?);
        }
        Ok(Principal::new(user_id, tenant_id, resolved))
    }

    pub fn postgres(&self) -> Result<&PgStore> {
        match &self.backend {
            Backend::Postgres(store) => Ok(store),
            Backend::Fixture { .. } => bail!("This command needs --database-url"),
        }
    }

    /// Write grant changes back to the fixture file. No-op for PostgreSQL,
    /// which commits as it goes.
    pub fn persist(&self) -> Result<Option<&Path>> {
        let Backend::Fixture { path, store } = &self.backend else {
            return Ok(None);
        };

        let snapshot = store.snapshot();
        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::to_string_pretty(&snapshot).context("Failed to encode fixture")?,
            _ => serde_json::to_string_pretty(&snapshot).context("Failed to encode fixture")?,
        };
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Some(path))
    }
}

/// Apply `--database-url` on top of the loaded configuration.
pub fn with_database_url(mut config: Config, url: Option<String>) -> Config {
    if let Some(url) = url {
        config.database = Some(match config.database.take() {
            Some(existing) => DatabaseConfig { url, ..existing },
            None => DatabaseConfig::new(url),
        });
    }
    config
}

/// Hide the password part of a connection URL.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            let credentials = &url[scheme + 3..at];
            match credentials.find(':') {
                Some(colon) => format!(
                    "{}{}:***{}",
                    &url[..scheme + 3],
                    &credentials[..colon],
                    &url[at..]
                ),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}
