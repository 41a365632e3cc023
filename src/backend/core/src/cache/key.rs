//! Type-safe cache key generation.
//!
//! Every derived access fact lives under one of four key types. Keys carry
//! their own TTL and the tags used for invalidation, so callers never pass
//! either separately.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::access::models::{HierarchyLevel, RoleId, TenantId};

// ═══════════════════════════════════════════════════════════════════════════════
// Key Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Enumeration of cache key types with associated default TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Per-(role, level, id) membership result
    AccessCheck,

    /// Per-(role, action) effective scope
    AccessScope,

    /// Per-role set of module ids touched by any grant
    AccessibleModules,

    /// Per-tenant set of entitled module codes
    TenantModules,
}

impl KeyType {
    /// Get the default TTL for this key type.
    pub fn default_ttl(&self) -> Duration {
        match self {
            Self::AccessCheck => Duration::from_secs(3600),
            Self::AccessScope => Duration::from_secs(3600),
            Self::AccessibleModules => Duration::from_secs(3600),
            Self::TenantModules => Duration::from_secs(3600),
        }
    }

    /// Get the key type prefix for namespacing.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::AccessCheck => "access",
            Self::AccessScope => "scope",
            Self::AccessibleModules => "modules",
            Self::TenantModules => "plan",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Key
// ═══════════════════════════════════════════════════════════════════════════════

/// A type-safe cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    key_type: KeyType,

    /// Primary identifier
    id: Option<String>,

    /// Additional key segments
    segments: Vec<String>,

    /// Tags for invalidation
    tags: Vec<String>,

    /// Custom TTL override
    ttl: Option<Duration>,

    /// Generation of the data the value was derived from
    version: Option<u32>,
}

impl CacheKey {
    /// Create a new cache key with the given type.
    pub fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            id: None,
            segments: Vec::new(),
            tags: Vec::new(),
            ttl: None,
            version: None,
        }
    }

    /// Set the primary ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a key segment.
    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Add a tag for invalidation.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set custom TTL override.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Pin the key to a data generation. Values stored under an older
    /// generation are never read again.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Get the TTL (custom or default for key type).
    pub fn ttl(&self) -> Duration {
        self.ttl.unwrap_or_else(|| self.key_type.default_ttl())
    }

    /// Build the cache key string.
    pub fn build(&self) -> String {
        let mut parts = vec![self.key_type.prefix().to_string()];

        if let Some(version) = self.version {
            parts.push(format!("v{}", version));
        }

        if let Some(ref id) = self.id {
            parts.push(id.clone());
        }

        for segment in &self.segments {
            parts.push(segment.clone());
        }

        parts.join(":")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tags
// ═══════════════════════════════════════════════════════════════════════════════

/// Tag carried by every fine-grained entry derived from one role's grants.
pub fn role_tag(role_id: RoleId) -> String {
    format!("role:{}", role_id)
}

/// Tag carried by a tenant's entitlement entry.
pub fn tenant_tag(tenant_id: TenantId) -> String {
    format!("tenant:{}", tenant_id)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors
// ═══════════════════════════════════════════════════════════════════════════════

impl CacheKey {
    /// `access:{role}:{level}:{id}`
    pub fn access_check(role_id: RoleId, level: HierarchyLevel, id: i64) -> Self {
        Self::new(KeyType::AccessCheck)
            .with_id(role_id.to_string())
            .with_segment(level.as_str())
            .with_segment(id.to_string())
            .with_tag(role_tag(role_id))
    }

    /// `scope:{role}:{action}`
    pub fn access_scope(role_id: RoleId, action_id: i64) -> Self {
        Self::new(KeyType::AccessScope)
            .with_id(role_id.to_string())
            .with_segment(action_id.to_string())
            .with_tag(role_tag(role_id))
    }

    /// `modules:{role}`
    pub fn accessible_modules(role_id: RoleId) -> Self {
        Self::new(KeyType::AccessibleModules)
            .with_id(role_id.to_string())
            .with_tag(role_tag(role_id))
    }

    /// `plan:{tenant}`
    pub fn tenant_modules(tenant_id: TenantId) -> Self {
        Self::new(KeyType::TenantModules)
            .with_id(tenant_id.to_string())
            .with_tag(tenant_tag(tenant_id))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
