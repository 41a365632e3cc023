//! Configuration management.
//!
//! Values come from an optional file plus `WARDEN__`-prefixed environment
//! variables, e.g. `WARDEN__CACHE__INVALIDATION=ttl`.

use serde::Deserialize;
use std::time::Duration;

use crate::cache::InvalidationMode;
use crate::error::Result;
use crate::telemetry::{LoggingConfig, MetricsConfig};

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Access engine configuration
    #[serde(default)]
    pub access: AccessConfig,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Database configuration; absent when running from a fixture
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    /// Role name that bypasses every gate, plan included
    #[serde(default = "default_platform_super_admin_role")]
    pub platform_super_admin_role: String,

    /// Role name that bypasses grants inside an entitled module
    #[serde(default = "default_tenant_super_admin_role")]
    pub tenant_super_admin_role: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            platform_super_admin_role: default_platform_super_admin_role(),
            tenant_super_admin_role: default_tenant_super_admin_role(),
        }
    }
}

/// Which cache backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Redis connection URL, required for the redis backend
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Maximum in-memory entries
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    /// Prefix for every key and tag
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    /// TTL of per-role access facts
    #[serde(default = "default_access_ttl", with = "humantime_serde")]
    pub access_ttl: Duration,

    /// TTL of per-tenant entitlement sets
    #[serde(default = "default_plan_ttl", with = "humantime_serde")]
    pub plan_ttl: Duration,

    #[serde(default)]
    pub invalidation: InvalidationMode,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            redis_url: None,
            max_capacity: default_max_capacity(),
            namespace_prefix: default_namespace_prefix(),
            access_ttl: default_access_ttl(),
            plan_ttl: default_plan_ttl(),
            invalidation: InvalidationMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Pool acquire timeout
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

// Default value functions
fn default_platform_super_admin_role() -> String { "platform-super-admin".to_string() }
fn default_tenant_super_admin_role() -> String { "tenant-super-admin".to_string() }
fn default_max_capacity() -> u64 { 100_000 }
fn default_namespace_prefix() -> String { "warden:".to_string() }
fn default_access_ttl() -> Duration { Duration::from_secs(3600) }
fn default_plan_ttl() -> Duration { Duration::from_secs(3600) }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }

const ENV_PREFIX: &str = "WARDEN";

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
