//! In-memory backing store.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use idcache::channel::EventChannel;
use idcache::invalidation::CacheInvalidator;
use idcache::storage::{ClientStorage, ExpiredRecordStorage, ResourceStorage};
use idcache_core::{
    ApiResource, ApiScope, ChangeEvent, ChangeOperation, Client, DeviceFlowCode, EntityType,
    IdentityResource, InstanceId, PersistedGrant, Resources, Result,
};

use crate::table::ExpiringTable;

/// Authoritative store for clients, resources, grants, and device codes.
///
/// Every write to a cached entity type publishes a [`ChangeEvent`] once
/// the write is applied. With an attached invalidator the writer's own
/// cache is invalidated before the write returns. Publishing failures are
/// logged; the write stands and other instances fall back to TTL expiry.
pub struct MemoryStore {
    clients: DashMap<String, Client>,
    identity_resources: DashMap<String, IdentityResource>,
    api_resources: DashMap<String, ApiResource>,
    api_scopes: DashMap<String, ApiScope>,
    grants: Arc<ExpiringTable<PersistedGrant>>,
    device_codes: Arc<ExpiringTable<DeviceFlowCode>>,
    events: Option<Arc<dyn EventChannel>>,
    invalidator: OnceLock<Arc<CacheInvalidator>>,
    instance: InstanceId,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that publishes no events.
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            identity_resources: DashMap::new(),
            api_resources: DashMap::new(),
            api_scopes: DashMap::new(),
            grants: Arc::new(ExpiringTable::new("persisted_grants")),
            device_codes: Arc::new(ExpiringTable::new("device_flow_codes")),
            events: None,
            invalidator: OnceLock::new(),
            instance: InstanceId::generate(),
        }
    }

    /// A store that publishes change events to `events` on behalf of `instance`.
    pub fn with_events(events: Arc<dyn EventChannel>, instance: InstanceId) -> Self {
        Self {
            events: Some(events),
            instance,
            ..Self::new()
        }
    }

    /// Invalidate this instance's cache on every write through the store.
    ///
    /// Returns `false` if an invalidator is already attached.
    pub fn attach_invalidator(&self, invalidator: Arc<CacheInvalidator>) -> bool {
        self.invalidator.set(invalidator).is_ok()
    }

    async fn publish(&self, entity_type: EntityType, id: &str, operation: ChangeOperation) {
        let event = ChangeEvent::new(entity_type, id, operation, self.instance);
        if let Some(invalidator) = self.invalidator.get() {
            invalidator.apply_local(&event).await;
        }

        let Some(events) = &self.events else {
            return;
        };
        if let Err(e) = events.publish(event).await {
            tracing::warn!(
                entity_type = %entity_type,
                entity_id = %id,
                error = %e,
                "Failed to publish change event"
            );
        }
    }

    fn operation(replaced: bool) -> ChangeOperation {
        if replaced {
            ChangeOperation::Updated
        } else {
            ChangeOperation::Created
        }
    }

    // ------------------------------------------------------------------------
    // Clients
    // ------------------------------------------------------------------------

    /// Insert or replace a client.
    pub async fn upsert_client(&self, client: Client) {
        let id = client.client_id.clone();
        let replaced = self.clients.insert(id.clone(), client).is_some();
        self.publish(EntityType::Client, &id, Self::operation(replaced))
            .await;
    }

    /// Remove a client. Returns `false` if it did not exist.
    pub async fn remove_client(&self, client_id: &str) -> bool {
        let removed = self.clients.remove(client_id).is_some();
        if removed {
            self.publish(EntityType::Client, client_id, ChangeOperation::Deleted)
                .await;
        }
        removed
    }

    // ------------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------------

    pub async fn upsert_identity_resource(&self, resource: IdentityResource) {
        let name = resource.name.clone();
        let replaced = self
            .identity_resources
            .insert(name.clone(), resource)
            .is_some();
        self.publish(EntityType::IdentityResource, &name, Self::operation(replaced))
            .await;
    }

    pub async fn remove_identity_resource(&self, name: &str) -> bool {
        let removed = self.identity_resources.remove(name).is_some();
        if removed {
            self.publish(EntityType::IdentityResource, name, ChangeOperation::Deleted)
                .await;
        }
        removed
    }

    pub async fn upsert_api_resource(&self, resource: ApiResource) {
        let name = resource.name.clone();
        let replaced = self.api_resources.insert(name.clone(), resource).is_some();
        self.publish(EntityType::ApiResource, &name, Self::operation(replaced))
            .await;
    }

    pub async fn remove_api_resource(&self, name: &str) -> bool {
        let removed = self.api_resources.remove(name).is_some();
        if removed {
            self.publish(EntityType::ApiResource, name, ChangeOperation::Deleted)
                .await;
        }
        removed
    }

    pub async fn upsert_api_scope(&self, scope: ApiScope) {
        let name = scope.name.clone();
        let replaced = self.api_scopes.insert(name.clone(), scope).is_some();
        self.publish(EntityType::ApiScope, &name, Self::operation(replaced))
            .await;
    }

    pub async fn remove_api_scope(&self, name: &str) -> bool {
        let removed = self.api_scopes.remove(name).is_some();
        if removed {
            self.publish(EntityType::ApiScope, name, ChangeOperation::Deleted)
                .await;
        }
        removed
    }

    // ------------------------------------------------------------------------
    // Grants and device codes
    // ------------------------------------------------------------------------

    /// Store a persisted grant. Grants are not cached, so no event is published.
    pub fn store_grant(&self, grant: PersistedGrant) {
        self.grants.insert(grant.key.clone(), grant);
    }

    pub fn get_grant(&self, key: &str) -> Option<PersistedGrant> {
        self.grants.get(key)
    }

    pub fn remove_grant(&self, key: &str) -> bool {
        self.grants.remove(key).is_some()
    }

    /// Store a device-flow code, keyed by its device code.
    pub async fn store_device_code(&self, code: DeviceFlowCode) {
        let id = code.device_code.clone();
        let replaced = self.device_codes.insert(id.clone(), code).is_some();
        self.publish(EntityType::DeviceFlowCode, &id, Self::operation(replaced))
            .await;
    }

    pub fn find_device_code(&self, device_code: &str) -> Option<DeviceFlowCode> {
        self.device_codes.get(device_code)
    }

    pub fn find_device_code_by_user_code(&self, user_code: &str) -> Option<DeviceFlowCode> {
        self.device_codes.find(|code| code.user_code == user_code)
    }

    pub async fn remove_device_code(&self, device_code: &str) -> bool {
        let removed = self.device_codes.remove(device_code).is_some();
        if removed {
            self.publish(EntityType::DeviceFlowCode, device_code, ChangeOperation::Deleted)
                .await;
        }
        removed
    }

    /// Cleanup target for expired persisted grants.
    pub fn grant_cleanup_target(&self) -> Arc<dyn ExpiredRecordStorage> {
        self.grants.clone()
    }

    /// Cleanup target for expired device-flow codes.
    pub fn device_code_cleanup_target(&self) -> Arc<dyn ExpiredRecordStorage> {
        self.device_codes.clone()
    }

    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }

    pub fn device_code_count(&self) -> usize {
        self.device_codes.len()
    }
}

fn matches_any(name: &str, names: &[String]) -> bool {
    names.iter().any(|n| n == name)
}

#[async_trait]
impl ClientStorage for MemoryStore {
    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<Client>> {
        Ok(self.clients.get(client_id).map(|c| c.value().clone()))
    }

    async fn list_all(&self) -> Result<Vec<Client>> {
        let mut clients: Vec<Client> = self.clients.iter().map(|c| c.value().clone()).collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(clients)
    }

    async fn all_cors_origins(&self) -> Result<Vec<String>> {
        Ok(self
            .clients
            .iter()
            .flat_map(|c| c.value().allowed_cors_origins.clone())
            .collect())
    }
}

#[async_trait]
impl ResourceStorage for MemoryStore {
    async fn find_identity_resources_by_scope_name(
        &self,
        scope_names: &[String],
    ) -> Result<Vec<IdentityResource>> {
        Ok(scope_names
            .iter()
            .filter_map(|name| self.identity_resources.get(name).map(|r| r.value().clone()))
            .collect())
    }

    async fn find_api_scopes_by_name(&self, scope_names: &[String]) -> Result<Vec<ApiScope>> {
        Ok(scope_names
            .iter()
            .filter_map(|name| self.api_scopes.get(name).map(|s| s.value().clone()))
            .collect())
    }

    async fn find_api_resources_by_scope_name(
        &self,
        scope_names: &[String],
    ) -> Result<Vec<ApiResource>> {
        let mut found: Vec<ApiResource> = self
            .api_resources
            .iter()
            .filter(|r| r.value().has_any_scope(scope_names))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn find_api_resources_by_name(
        &self,
        api_resource_names: &[String],
    ) -> Result<Vec<ApiResource>> {
        let mut found: Vec<ApiResource> = self
            .api_resources
            .iter()
            .filter(|r| matches_any(&r.value().name, api_resource_names))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn get_all_resources(&self) -> Result<Resources> {
        let mut resources = Resources {
            identity_resources: self
                .identity_resources
                .iter()
                .map(|r| r.value().clone())
                .collect(),
            api_resources: self.api_resources.iter().map(|r| r.value().clone()).collect(),
            api_scopes: self.api_scopes.iter().map(|s| s.value().clone()).collect(),
            offline_access: false,
        };
        resources.identity_resources.sort_by(|a, b| a.name.cmp(&b.name));
        resources.api_resources.sort_by(|a, b| a.name.cmp(&b.name));
        resources.api_scopes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resources)
    }
}
