//! Cache invalidation strategies.
//!
//! Two ways to keep derived access facts honest after a grant mutation:
//! drop every entry tagged with the role (`tagged`), or only drop the
//! aggregate and let fine-grained entries age out (`ttl`).

use crate::cache::backend::CacheBackend;
use crate::error::Result;
use crate::telemetry::InvalidationCounter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

// ═══════════════════════════════════════════════════════════════════════════════
// Invalidation Mode
// ═══════════════════════════════════════════════════════════════════════════════

/// How grant mutations propagate into the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// Every per-(role, level, id) and per-action entry is tagged with its role
    /// and dropped on any mutation for that role. Readers see writes at once.
    #[default]
    Tagged,

    /// Only the accessible-modules aggregate is evicted on mutation. Other
    /// entries stay until their TTL runs out.
    Ttl,
}

impl InvalidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tagged => "tagged",
            Self::Ttl => "ttl",
        }
    }

    pub fn is_tagged(&self) -> bool {
        matches!(self, Self::Tagged)
    }
}

impl fmt::Display for InvalidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvalidationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tagged" => Ok(Self::Tagged),
            "ttl" => Ok(Self::Ttl),
            other => Err(format!("unknown invalidation mode '{}'", other)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tag-Based Invalidation
// ═══════════════════════════════════════════════════════════════════════════════

/// Tag-based cache invalidation over any backend.
pub struct TagInvalidation {
    backend: Arc<dyn CacheBackend>,
}

impl TagInvalidation {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Invalidate all entries with the given tag.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<u64> {
        let count = self.backend.delete_by_tag(tag).await?;
        InvalidationCounter::increment("tag");
        debug!(tag = %tag, count, "Invalidated tagged cache entries");
        Ok(count)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::{CacheEntry, InMemoryBackend, InMemoryConfig};
    use std::time::Duration;

    #[test]
    fn test_mode_parse_and_default() {
        assert_eq!(InvalidationMode::default(), InvalidationMode::Tagged);
        assert_eq!("TTL".parse::<InvalidationMode>().unwrap(), InvalidationMode::Ttl);
        assert!("sometimes".parse::<InvalidationMode>().is_err());
    }

    #[test]
    fn test_mode_deserialize() {
        let mode: InvalidationMode = serde_json::from_str("\"ttl\"").unwrap();
        assert_eq!(mode, InvalidationMode::Ttl);
    }

    #[tokio::test]
    async fn test_invalidate_tag() {
        let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryBackend::new(InMemoryConfig::default()));
        let ttl = Duration::from_secs(60);
        for (key, tag) in [("a", "role:3"), ("b", "role:3"), ("c", "role:4")] {
            backend
                .set(key, CacheEntry::new(b"1".to_vec(), ttl, vec![tag.to_string()]))
                .await
                .unwrap();
        }

        let invalidation = TagInvalidation::new(backend.clone());
        assert_eq!(invalidation.invalidate_tag("role:3").await.unwrap(), 2);
        assert!(!backend.exists("a").await.unwrap());
        assert!(backend.exists("c").await.unwrap());
        assert_eq!(invalidation.invalidate_tag("role:3").await.unwrap(), 0);
    }
}
