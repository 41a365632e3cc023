//! Caching layer for derived access facts.
//!
//! - **Backend Abstraction**: pluggable backends (in-memory, Redis)
//! - **Type-safe Keys**: typed cache keys carrying their TTL and tags
//! - **Invalidation**: tag-based invalidation per role and per tenant
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Cache facade                       │
//! │   remember / forget / invalidate_by_tag (namespaced)     │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────────┐                  │
//! │  │  CacheKey   │   │ TagInvalidation  │                  │
//! │  └──────┬──────┘   └────────┬─────────┘                  │
//! │         ▼                   ▼                            │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │                 CacheBackend trait                 │  │
//! │  └───────────────┬───────────────────────┬────────────┘  │
//! │                  ▼                       ▼               │
//! │          ┌──────────────┐        ┌──────────────┐        │
//! │          │  In-Memory   │        │    Redis     │        │
//! │          └──────────────┘        └──────────────┘        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::cache::{Cache, CacheKey};
//! use warden_core::access::HierarchyLevel;
//!
//! let cache = Cache::in_memory(10_000);
//! let key = CacheKey::access_check(4, HierarchyLevel::Module, 1);
//! let allowed: bool = cache.remember(&key, || async { Ok(true) }).await?;
//! cache.invalidate_by_tag("role:4").await?;
//! ```

pub mod backend;
pub mod invalidation;
pub mod key;

pub use backend::{
    CacheBackend, CacheEntry, CacheStats, InMemoryBackend, InMemoryConfig, RedisBackend,
    RedisConfig,
};
pub use invalidation::{InvalidationMode, TagInvalidation};
pub use key::{role_tag, tenant_tag, CacheKey, KeyType};

use crate::config::{CacheBackendKind, CacheSettings};
use crate::error::{ErrorCode, Result, WardenError};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Facade configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entry size in bytes
    pub max_entry_size: usize,

    /// Prefix applied to every key and tag
    pub namespace_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entry_size: 1024 * 1024,
            namespace_prefix: "warden:".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }
}

/// Builder for cache configuration.
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn max_entry_size(mut self, size: usize) -> Self {
        self.config.max_entry_size = size;
        self
    }

    pub fn namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.namespace_prefix = prefix.into();
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Cache Interface
// ═══════════════════════════════════════════════════════════════════════════════

/// Unified cache API over a shared backend. Cloning shares the backend.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    invalidation: Arc<TagInvalidation>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        let invalidation = Arc::new(TagInvalidation::new(backend.clone()));
        Self {
            backend,
            config,
            invalidation,
        }
    }

    /// Create an in-memory cache.
    pub fn in_memory(max_capacity: u64) -> Self {
        let backend = Arc::new(InMemoryBackend::new(InMemoryConfig {
            max_capacity,
            ..Default::default()
        }));
        Self::new(backend, CacheConfig::default())
    }

    /// Create a Redis-backed cache.
    pub async fn redis(url: &str) -> Result<Self> {
        let (redis, config) = redis_layout(
            RedisConfig {
                url: url.to_string(),
                ..Default::default()
            },
            &CacheConfig::default().namespace_prefix,
        );
        let backend = Arc::new(RedisBackend::new(redis).await?);
        Ok(Self::new(backend, config))
    }

    /// Build the cache described by the `cache` configuration section.
    pub async fn from_settings(settings: &CacheSettings) -> Result<Self> {
        let (backend, config) = match settings.backend {
            CacheBackendKind::Memory => (
                Arc::new(InMemoryBackend::new(InMemoryConfig {
                    max_capacity: settings.max_capacity,
                    ..Default::default()
                })) as Arc<dyn CacheBackend>,
                CacheConfig::builder()
                    .namespace_prefix(&settings.namespace_prefix)
                    .build(),
            ),
            CacheBackendKind::Redis => {
                let url = settings.redis_url.as_deref().ok_or_else(|| {
                    WardenError::new(
                        ErrorCode::MissingConfiguration,
                        "cache.redis_url is required when cache.backend = \"redis\"",
                    )
                })?;
                let (redis, config) = redis_layout(
                    RedisConfig {
                        url: url.to_string(),
                        default_ttl: settings.access_ttl,
                        ..Default::default()
                    },
                    &settings.namespace_prefix,
                );
                let backend: Arc<dyn CacheBackend> = Arc::new(RedisBackend::new(redis).await?);
                (backend, config)
            }
        };

        info!(backend = backend.name(), "Cache initialized");
        Ok(Self::new(backend, config))
    }

    /// Get a value from the cache.
    #[instrument(level = "trace", skip(self), fields(key = %key))]
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let full_key = self.build_key(key);
        match self.backend.get(&full_key).await? {
            Some(entry) => {
                let value: T = serde_json::from_slice(&entry.data).map_err(|e| {
                    WardenError::with_internal(
                        ErrorCode::DeserializationError,
                        "Failed to deserialize cached value",
                        e.to_string(),
                    )
                })?;
                debug!(key = %full_key, "Cache hit");
                Ok(Some(value))
            }
            None => {
                debug!(key = %full_key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Store a value under the key's TTL and tags.
    #[instrument(level = "trace", skip(self, value), fields(key = %key))]
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let data = serde_json::to_vec(value).map_err(|e| {
            WardenError::with_internal(
                ErrorCode::SerializationError,
                "Failed to serialize value for cache",
                e.to_string(),
            )
        })?;

        if data.len() > self.config.max_entry_size {
            return Err(WardenError::new(
                ErrorCode::ValidationError,
                format!(
                    "Cache entry size {} exceeds maximum {}",
                    data.len(),
                    self.config.max_entry_size
                ),
            ));
        }

        let full_key = self.build_key(key);
        let tags = key.tags().iter().map(|t| self.build_tag(t)).collect();
        self.backend
            .set(&full_key, CacheEntry::new(data, key.ttl(), tags))
            .await
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// A failed computation is returned as-is and nothing is stored.
    pub async fn remember<T, F, Fut>(&self, key: &CacheKey, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let value = compute().await?;
        self.set(key, &value).await?;
        Ok(value)
    }

    /// Delete one entry.
    #[instrument(level = "trace", skip(self), fields(key = %key))]
    pub async fn forget(&self, key: &CacheKey) -> Result<bool> {
        let full_key = self.build_key(key);
        self.backend.delete(&full_key).await
    }

    pub async fn exists(&self, key: &CacheKey) -> Result<bool> {
        self.backend.exists(&self.build_key(key)).await
    }

    /// Delete every entry carrying `tag`.
    #[instrument(skip(self))]
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        self.invalidation
            .invalidate_tag(&self.build_tag(tag))
            .await
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.backend.stats().await
    }

    /// Clear all cache entries.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        info!("Clearing all cache entries");
        self.backend.clear().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn build_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.config.namespace_prefix, key)
    }

    fn build_tag(&self, tag: &str) -> String {
        format!("{}{}", self.config.namespace_prefix, tag)
    }
}

/// Hand the namespace to the Redis backend, which scopes keys, tags and
/// `clear` with it. The facade then adds no prefix of its own.
fn redis_layout(redis: RedisConfig, namespace_prefix: &str) -> (RedisConfig, CacheConfig) {
    let redis = RedisConfig {
        key_prefix: namespace_prefix.to_string(),
        ..redis
    };
    let config = CacheConfig::builder().namespace_prefix("").build();
    (redis, config)
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend.name())
            .field("namespace_prefix", &self.config.namespace_prefix)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
