//! Cache backend implementations.
//!
//! - **InMemoryBackend**: process-local cache over `DashMap` with a tag index
//! - **RedisBackend**: shared cache for several engine instances, tags kept
//!   as Redis sets

use crate::error::{ErrorCode, Result, WardenError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Entry
// ═══════════════════════════════════════════════════════════════════════════════

/// A cached entry with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Serialized data
    pub data: Vec<u8>,

    /// Time-to-live
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,

    /// Tags for invalidation
    pub tags: Vec<String>,

    /// When this entry was created
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(data: Vec<u8>, ttl: Duration, tags: Vec<String>) -> Self {
        Self {
            data,
            ttl: Some(ttl),
            tags,
            created_at: Utc::now(),
        }
    }

    /// Check if the entry has expired.
    pub fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => {
                let elapsed = Utc::now()
                    .signed_duration_since(self.created_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                elapsed >= ttl
            }
            None => false,
        }
    }

    /// Get the remaining TTL.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.ttl.and_then(|ttl| {
            let elapsed = Utc::now()
                .signed_duration_since(self.created_at)
                .to_std()
                .ok()?;
            ttl.checked_sub(elapsed)
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub evictions: u64,

    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,

    /// Backend-specific stats
    pub backend_stats: HashMap<String, String>,
}

impl CacheStats {
    pub fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Trait for cache backends. Keys arrive fully built (namespace included).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a live (non-expired) entry.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store an entry, replacing any previous one and its tag memberships.
    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()>;

    /// Delete one entry.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check if a live entry exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys currently indexed under `tag`.
    async fn get_by_tag(&self, tag: &str) -> Result<Vec<String>>;

    /// Delete every entry indexed under `tag` and the tag itself.
    async fn delete_by_tag(&self, tag: &str) -> Result<u64>;

    async fn stats(&self) -> Result<CacheStats>;

    /// Clear all entries.
    async fn clear(&self) -> Result<()>;

    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for in-memory cache.
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Maximum number of entries
    pub max_capacity: u64,

    /// Shard count for concurrent access (power of 2)
    pub shard_count: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100_000,
            shard_count: 16,
        }
    }
}

struct InMemoryEntry {
    entry: CacheEntry,
    last_access: Instant,
}

/// In-memory cache backend.
pub struct InMemoryBackend {
    entries: DashMap<String, InMemoryEntry>,

    /// Tag to keys mapping for tag-based invalidation
    tag_index: DashMap<String, HashSet<String>>,

    config: InMemoryConfig,

    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryBackend {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            entries: DashMap::with_shard_amount(config.shard_count),
            tag_index: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Evict expired entries first, then the least recently used tenth.
    fn maybe_evict(&self) {
        if (self.entries.len() as u64) < self.config.max_capacity {
            return;
        }

        let mut evicted = self.cleanup_expired();

        if (self.entries.len() as u64) >= self.config.max_capacity {
            let to_evict = (self.config.max_capacity / 10).max(1) as usize;
            let mut by_age: Vec<(String, Instant)> = self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().last_access))
                .collect();
            by_age.sort_by_key(|(_, at)| *at);

            for (key, _) in by_age.into_iter().take(to_evict) {
                if self.remove_entry(&key) {
                    evicted += 1;
                }
            }
        }

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        counter!("cache_evictions_total", "backend" => "in_memory").increment(evicted);
        debug!("Evicted {} entries from cache", evicted);
    }

    fn add_to_tag_index(&self, key: &str, tags: &[String]) {
        for tag in tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    fn remove_from_tag_index(&self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(mut keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
            }
        }
    }

    fn remove_entry(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, entry)) => {
                self.remove_from_tag_index(key, &entry.entry.tags);
                true
            }
            None => false,
        }
    }

    /// Drop expired entries; returns how many were removed.
    pub fn cleanup_expired(&self) -> u64 {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().entry.is_expired())
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if self.remove_entry(&key) {
                removed += 1;
            }
        }
        removed
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let hit = match self.entries.get_mut(key) {
            Some(mut slot) if !slot.entry.is_expired() => {
                slot.last_access = Instant::now();
                Some(slot.entry.clone())
            }
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("cache_misses_total", "backend" => "in_memory", "reason" => "not_found")
                    .increment(1);
                return Ok(None);
            }
        };

        match hit {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("cache_hits_total", "backend" => "in_memory").increment(1);
                Ok(Some(entry))
            }
            None => {
                self.remove_entry(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("cache_misses_total", "backend" => "in_memory", "reason" => "expired")
                    .increment(1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        self.maybe_evict();

        let tags = entry.tags.clone();
        self.remove_entry(key);
        self.entries.insert(
            key.to_string(),
            InMemoryEntry {
                entry,
                last_access: Instant::now(),
            },
        );
        self.add_to_tag_index(key, &tags);

        counter!("cache_sets_total", "backend" => "in_memory").increment(1);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.remove_entry(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .get(key)
            .map(|e| !e.entry.is_expired())
            .unwrap_or(false))
    }

    async fn get_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        Ok(self
            .tag_index
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<u64> {
        let keys = match self.tag_index.remove(tag) {
            Some((_, keys)) => keys,
            None => return Ok(0),
        };

        let mut deleted = 0;
        for key in keys {
            if self.remove_entry(&key) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries.len() as u64;
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: 0.0,
            backend_stats: HashMap::new(),
        };
        stats.calculate_hit_rate();
        stats
            .backend_stats
            .insert("max_capacity".to_string(), self.config.max_capacity.to_string());
        stats
            .backend_stats
            .insert("tags".to_string(), self.tag_index.len().to_string());

        gauge!("cache_entries", "backend" => "in_memory").set(entries as f64);
        gauge!("cache_hit_rate", "backend" => "in_memory").set(stats.hit_rate);

        Ok(stats)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        self.tag_index.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for Redis cache.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,

    /// Namespace for every key and tag. `clear` only deletes keys under it.
    pub key_prefix: String,

    /// TTL for entries stored without one
    pub default_ttl: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "warden:".to_string(),
            default_ttl: Duration::from_secs(3600),
        }
    }
}

/// `SCAN MATCH` pattern for keys under `prefix`. An empty prefix would match
/// the whole database and is refused.
fn scan_pattern(prefix: &str) -> Result<String> {
    if prefix.is_empty() {
        return Err(WardenError::new(
            ErrorCode::InvalidConfiguration,
            "Refusing to clear Redis without a key prefix",
        ));
    }
    Ok(format!("{}*", prefix))
}

/// Redis cache backend.
pub struct RedisBackend {
    conn: redis::aio::ConnectionManager,
    config: RedisConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedisBackend {
    /// Connect and verify the server answers `PING`.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            WardenError::with_internal(
                ErrorCode::CacheConnectionFailed,
                "Failed to create Redis client",
                e.to_string(),
            )
        })?;

        let mut conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| {
                WardenError::with_internal(
                    ErrorCode::CacheConnectionFailed,
                    "Failed to connect to Redis",
                    e.to_string(),
                )
            })?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!(url = %config.url, "Redis cache backend connected");

        Ok(Self {
            conn,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{}", self.config.key_prefix, tag)
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.config.key_prefix.as_str()).unwrap_or(key)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(self.full_key(key)).await?;

        match data {
            Some(bytes) => {
                let entry: CacheEntry = serde_json::from_slice(&bytes)?;
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("cache_hits_total", "backend" => "redis").increment(1);
                Ok(Some(entry))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("cache_misses_total", "backend" => "redis", "reason" => "not_found")
                    .increment(1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);
        let data = serde_json::to_vec(&entry)?;
        let ttl_secs = entry.ttl.unwrap_or(self.config.default_ttl).as_secs().max(1);

        let mut pipe = redis::pipe();
        pipe.atomic().set_ex(&full_key, data, ttl_secs).ignore();
        for tag in &entry.tags {
            let tag_key = self.tag_key(tag);
            // Tag sets outlive their members slightly so stale members are harmless.
            pipe.sadd(&tag_key, &full_key)
                .ignore()
                .expire(&tag_key, (ttl_secs + 60) as i64)
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        counter!("cache_sets_total", "backend" => "redis").increment(1);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(self.full_key(key)).await?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.full_key(key)).await?;
        Ok(exists)
    }

    async fn get_by_tag(&self, tag: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.smembers(self.tag_key(tag)).await?;
        Ok(keys
            .iter()
            .map(|k| self.strip_prefix(k).to_string())
            .collect())
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let tag_key = self.tag_key(tag);
        let keys: Vec<String> = conn.smembers(&tag_key).await?;

        let mut deleted: i64 = 0;
        if !keys.is_empty() {
            deleted = conn.del(&keys).await?;
        }
        conn.del::<_, ()>(&tag_key).await?;

        Ok(deleted.max(0) as u64)
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut conn = self.conn.clone();
        let dbsize: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;

        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: dbsize,
            evictions: 0,
            hit_rate: 0.0,
            backend_stats: HashMap::new(),
        };
        stats.calculate_hit_rate();

        gauge!("cache_entries", "backend" => "redis").set(dbsize as f64);
        gauge!("cache_hit_rate", "backend" => "redis").set(stats.hit_rate);

        Ok(stats)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pattern = scan_pattern(&self.config.key_prefix)?;
        let mut cursor: u64 = 0;
        let mut total_deleted: i64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: i64 = conn.del(&keys).await?;
                total_deleted += deleted;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        info!("Cleared {} Redis cache entries", total_deleted);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(data: &[u8], ttl: Duration, tags: &[&str]) -> CacheEntry {
        CacheEntry::new(
            data.to_vec(),
            ttl,
            tags.iter().map(|t| t.to_string()).collect(),
        )
    }

    #[test]
    fn test_redis_clear_stays_in_namespace() {
        assert_eq!(RedisConfig::default().key_prefix, "warden:");
        assert_eq!(scan_pattern("warden:").unwrap(), "warden:*");

        let err = scan_pattern("").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_cache_entry_expiration() {
        let mut e = entry(b"x", Duration::from_secs(10), &[]);
        e.created_at = Utc::now() - chrono::Duration::seconds(20);
        assert!(e.is_expired());
        assert!(e.remaining_ttl().is_none());
    }

    #[test]
    fn test_cache_entry_not_expired() {
        let e = entry(b"x", Duration::from_secs(3600), &[]);
        assert!(!e.is_expired());
        assert!(e.remaining_ttl().is_some());
    }

    #[tokio::test]
    async fn test_in_memory_backend() {
        let backend = InMemoryBackend::new(InMemoryConfig::default());

        backend
            .set("k1", entry(b"true", Duration::from_secs(60), &["role:1"]))
            .await
            .unwrap();
        assert!(backend.exists("k1").await.unwrap());

        let got = backend.get("k1").await.unwrap().unwrap();
        assert_eq!(got.data, b"true");

        assert!(backend.delete("k1").await.unwrap());
        assert!(backend.get("k1").await.unwrap().is_none());
        assert!(!backend.delete("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_expired_entry_is_a_miss() {
        let backend = InMemoryBackend::new(InMemoryConfig::default());
        let mut e = entry(b"1", Duration::from_secs(1), &["role:1"]);
        e.created_at = Utc::now() - chrono::Duration::seconds(5);
        backend.set("old", e).await.unwrap();

        assert!(backend.get("old").await.unwrap().is_none());
        assert!(backend.get_by_tag("role:1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_delete_by_tag() {
        let backend = InMemoryBackend::new(InMemoryConfig::default());
        let ttl = Duration::from_secs(60);

        backend.set("a", entry(b"1", ttl, &["role:1"])).await.unwrap();
        backend.set("b", entry(b"1", ttl, &["role:1"])).await.unwrap();
        backend.set("c", entry(b"1", ttl, &["role:2"])).await.unwrap();

        let mut tagged = backend.get_by_tag("role:1").await.unwrap();
        tagged.sort();
        assert_eq!(tagged, vec!["a".to_string(), "b".to_string()]);

        assert_eq!(backend.delete_by_tag("role:1").await.unwrap(), 2);
        assert!(!backend.exists("a").await.unwrap());
        assert!(!backend.exists("b").await.unwrap());
        assert!(backend.exists("c").await.unwrap());
        assert_eq!(backend.delete_by_tag("role:1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overwrite_moves_tag_membership() {
        let backend = InMemoryBackend::new(InMemoryConfig::default());
        let ttl = Duration::from_secs(60);

        backend.set("k", entry(b"1", ttl, &["role:1"])).await.unwrap();
        backend.set("k", entry(b"2", ttl, &["role:2"])).await.unwrap();

        assert!(backend.get_by_tag("role:1").await.unwrap().is_empty());
        assert_eq!(backend.get_by_tag("role:2").await.unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_in_memory_eviction() {
        let backend = InMemoryBackend::new(InMemoryConfig {
            max_capacity: 10,
            ..Default::default()
        });
        let ttl = Duration::from_secs(60);

        for i in 0..25 {
            backend
                .set(&format!("key-{}", i), entry(b"v", ttl, &[]))
                .await
                .unwrap();
        }

        let stats = backend.stats().await.unwrap();
        assert!(stats.entries <= 10);
        assert!(stats.evictions > 0);
        assert!(backend.exists("key-24").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_stats() {
        let backend = InMemoryBackend::new(InMemoryConfig::default());
        backend
            .set("k", entry(b"v", Duration::from_secs(60), &[]))
            .await
            .unwrap();

        backend.get("k").await.unwrap();
        backend.get("k").await.unwrap();
        backend.get("missing").await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }
}
