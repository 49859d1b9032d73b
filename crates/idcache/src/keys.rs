//! Deterministic cache keys.
//!
//! Keys have the shape `{prefix}{namespace}:{shape}[:{args}]`:
//!
//! | Query | Key |
//! |-------|-----|
//! | client by id | `client:id:app1` |
//! | all clients | `client:all` |
//! | API resources by scope names | `api_resource:by_scope:orders.read,orders.write` |
//! | all resources | `resources:all` |
//! | CORS decision | `cors:origin:https://app.example.com` |
//!
//! Name lists are de-duplicated and sorted, so equivalent queries share a
//! key. List separators inside names are percent-escaped, so different
//! queries never collide.

use std::fmt;

use idcache_core::EntityType;

/// Shape of the "get all" sentinel.
pub const ALL: &str = "all";
/// Shape of single-entity lookups.
pub const BY_ID: &str = "id";
/// Shape of lookups by scope names.
pub const BY_SCOPE: &str = "by_scope";
/// Shape of lookups by entity names.
pub const BY_NAME: &str = "by_name";

/// Namespace of the aggregate "all resources" entry.
pub const RESOURCES_NAMESPACE: &str = "resources";
/// Namespace of CORS decisions.
pub const CORS_NAMESPACE: &str = "cors";

/// A cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a raw key. Prefer the [`KeyBuilder`] methods.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds cache keys under a common prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}{namespace}:` - everything cached for one namespace.
    pub fn namespace(&self, namespace: &str) -> String {
        format!("{}{}:", self.prefix, namespace)
    }

    /// Key of a single entity.
    pub fn entity(&self, entity: EntityType, id: &str) -> CacheKey {
        CacheKey(format!("{}{}:{}", self.namespace(entity.as_str()), BY_ID, id))
    }

    /// Sentinel key of the whole collection of an entity type.
    pub fn collection(&self, entity: EntityType) -> CacheKey {
        CacheKey(format!("{}{}", self.namespace(entity.as_str()), ALL))
    }

    /// Key of a query over a set of names.
    pub fn query(&self, entity: EntityType, shape: &str, names: &[String]) -> CacheKey {
        CacheKey(format!(
            "{}{}",
            self.query_prefix(entity, shape),
            canonical_names(names)
        ))
    }

    /// Common prefix of every key of `query(entity, shape, _)`.
    pub fn query_prefix(&self, entity: EntityType, shape: &str) -> String {
        format!("{}{}:", self.namespace(entity.as_str()), shape)
    }

    /// Sentinel key of the aggregate of all resources.
    pub fn all_resources(&self) -> CacheKey {
        CacheKey(format!("{}{}", self.namespace(RESOURCES_NAMESPACE), ALL))
    }

    /// Key of the CORS decision for `origin`.
    pub fn cors_origin(&self, origin: &str) -> CacheKey {
        CacheKey(format!(
            "{}origin:{}",
            self.namespace(CORS_NAMESPACE),
            normalize_origin(origin)
        ))
    }

    /// Sentinel key of the set of all allowed CORS origins.
    pub fn cors_all(&self) -> CacheKey {
        CacheKey(format!("{}{}", self.namespace(CORS_NAMESPACE), ALL))
    }
}

/// Normalize an origin for comparison: trimmed, lowercase, no trailing slash.
pub fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Sorted, de-duplicated, escaped, comma-joined names.
fn canonical_names(names: &[String]) -> String {
    let mut escaped: Vec<String> = names.iter().map(|n| escape(n)).collect();
    escaped.sort_unstable();
    escaped.dedup();
    escaped.join(",")
}

fn escape(name: &str) -> String {
    name.replace('%', "%25").replace(',', "%2C")
}
