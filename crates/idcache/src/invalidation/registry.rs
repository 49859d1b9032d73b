//! Entity type to cache key mapping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use idcache_core::{ChangeEvent, EntityType};

use crate::keys::{self, CacheKey, KeyBuilder};

type EntityKeyFn = Arc<dyn Fn(&str) -> CacheKey + Send + Sync>;

/// Cache keys derived from one entity type.
#[derive(Clone)]
pub struct RegistryEntry {
    entity_key: EntityKeyFn,
    collection_keys: Vec<CacheKey>,
    prefixes: Vec<String>,
    namespaces: Vec<String>,
}

impl RegistryEntry {
    /// Entry whose single-entity key is built by `entity_key`.
    pub fn new(entity_key: impl Fn(&str) -> CacheKey + Send + Sync + 'static) -> Self {
        Self {
            entity_key: Arc::new(entity_key),
            collection_keys: Vec::new(),
            prefixes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    /// Also remove `key` whenever any entity of this type changes.
    pub fn with_collection_key(mut self, key: CacheKey) -> Self {
        self.collection_keys.push(key);
        self
    }

    /// Also remove every key under `prefix` whenever any entity of this type changes.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// Namespace flushed when invalidation events may have been lost.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }

    fn plan(&self, entity_id: &str) -> InvalidationPlan {
        let mut keys = Vec::with_capacity(1 + self.collection_keys.len());
        keys.push((self.entity_key)(entity_id));
        keys.extend(self.collection_keys.iter().cloned());

        InvalidationPlan {
            keys,
            prefixes: self.prefixes.clone(),
        }
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("collection_keys", &self.collection_keys)
            .field("prefixes", &self.prefixes)
            .field("namespaces", &self.namespaces)
            .finish_non_exhaustive()
    }
}

/// Keys and prefixes to remove for one change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub keys: Vec<CacheKey>,
    pub prefixes: Vec<String>,
}

/// Which cache keys each entity type affects.
///
/// Populated once at startup; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    keys: KeyBuilder,
    entries: HashMap<EntityType, RegistryEntry>,
}

impl KeyRegistry {
    /// An empty registry producing keys with `keys`.
    pub fn new(keys: KeyBuilder) -> Self {
        Self {
            keys,
            entries: HashMap::new(),
        }
    }

    /// Registry for the built-in cached entity types.
    ///
    /// Changing one entity also drops every collection and query result it
    /// may appear in. Any client change drops all CORS decisions, since the
    /// allowed-origin set is the union over clients.
    pub fn builtin(keys: KeyBuilder) -> Self {
        let mut registry = Self::new(keys.clone());

        let k = keys.clone();
        registry.register(
            EntityType::Client,
            RegistryEntry::new(move |id| k.entity(EntityType::Client, id))
                .with_collection_key(keys.collection(EntityType::Client))
                .with_prefix(keys.namespace(keys::CORS_NAMESPACE))
                .with_namespace(keys.namespace(EntityType::Client.as_str()))
                .with_namespace(keys.namespace(keys::CORS_NAMESPACE)),
        );

        let k = keys.clone();
        registry.register(
            EntityType::IdentityResource,
            RegistryEntry::new(move |id| k.entity(EntityType::IdentityResource, id))
                .with_collection_key(keys.collection(EntityType::IdentityResource))
                .with_collection_key(keys.all_resources())
                .with_prefix(keys.query_prefix(EntityType::IdentityResource, keys::BY_SCOPE))
                .with_namespace(keys.namespace(EntityType::IdentityResource.as_str()))
                .with_namespace(keys.namespace(keys::RESOURCES_NAMESPACE)),
        );

        let k = keys.clone();
        registry.register(
            EntityType::ApiResource,
            RegistryEntry::new(move |id| k.entity(EntityType::ApiResource, id))
                .with_collection_key(keys.collection(EntityType::ApiResource))
                .with_collection_key(keys.all_resources())
                .with_prefix(keys.query_prefix(EntityType::ApiResource, keys::BY_SCOPE))
                .with_prefix(keys.query_prefix(EntityType::ApiResource, keys::BY_NAME))
                .with_namespace(keys.namespace(EntityType::ApiResource.as_str()))
                .with_namespace(keys.namespace(keys::RESOURCES_NAMESPACE)),
        );

        let k = keys.clone();
        registry.register(
            EntityType::ApiScope,
            RegistryEntry::new(move |id| k.entity(EntityType::ApiScope, id))
                .with_collection_key(keys.collection(EntityType::ApiScope))
                .with_collection_key(keys.all_resources())
                .with_prefix(keys.query_prefix(EntityType::ApiScope, keys::BY_NAME))
                .with_namespace(keys.namespace(EntityType::ApiScope.as_str()))
                .with_namespace(keys.namespace(keys::RESOURCES_NAMESPACE)),
        );

        let k = keys.clone();
        registry.register(
            EntityType::DeviceFlowCode,
            RegistryEntry::new(move |id| k.entity(EntityType::DeviceFlowCode, id))
                .with_namespace(keys.namespace(EntityType::DeviceFlowCode.as_str())),
        );

        registry
    }

    /// Register or replace the entry for `entity_type`.
    pub fn register(&mut self, entity_type: EntityType, entry: RegistryEntry) {
        self.entries.insert(entity_type, entry);
    }

    /// Returns `true` if changes to `entity_type` invalidate anything.
    pub fn is_registered(&self, entity_type: EntityType) -> bool {
        self.entries.contains_key(&entity_type)
    }

    /// Keys to remove for `event`, or `None` for unregistered types.
    pub fn plan(&self, event: &ChangeEvent) -> Option<InvalidationPlan> {
        self.plan_for(event.entity_type, &event.entity_id)
    }

    /// Keys to remove when the entity `entity_id` of `entity_type` changes.
    pub fn plan_for(&self, entity_type: EntityType, entity_id: &str) -> Option<InvalidationPlan> {
        self.entries
            .get(&entity_type)
            .map(|entry| entry.plan(entity_id))
    }

    /// Every registered namespace, de-duplicated and sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self
            .entries
            .values()
            .flat_map(|entry| entry.namespaces.iter().cloned())
            .collect();
        namespaces.sort_unstable();
        namespaces.dedup();
        namespaces
    }

    /// The key builder shared with the read-through stores.
    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }
}
