//! Backing store contracts.
//!
//! These traits are implemented by persistence adapters (the in-memory
//! store in `idcache-memory`, or a database). The cache never writes
//! through them; writes happen elsewhere and are followed by a
//! [`ChangeEvent`](idcache_core::ChangeEvent).

use async_trait::async_trait;
use idcache_core::{ApiResource, ApiScope, Client, IdentityResource, Result};
use time::OffsetDateTime;

/// Storage for registered OAuth clients.
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Find a client by its client ID.
    ///
    /// Returns `None` if the client doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_client_id(&self, client_id: &str) -> Result<Option<Client>>;

    /// List every registered client.
    async fn list_all(&self) -> Result<Vec<Client>>;

    /// Every CORS origin allowed by any client, as configured.
    async fn all_cors_origins(&self) -> Result<Vec<String>>;
}

/// Storage for identity resources, API resources, and API scopes.
///
/// Lookups by name return only the matching entries; unknown names are
/// silently skipped.
#[async_trait]
pub trait ResourceStorage: Send + Sync {
    /// Identity resources whose name is one of `scope_names`.
    async fn find_identity_resources_by_scope_name(
        &self,
        scope_names: &[String],
    ) -> Result<Vec<IdentityResource>>;

    /// API scopes whose name is one of `scope_names`.
    async fn find_api_scopes_by_name(&self, scope_names: &[String]) -> Result<Vec<ApiScope>>;

    /// API resources that expose at least one of `scope_names`.
    async fn find_api_resources_by_scope_name(
        &self,
        scope_names: &[String],
    ) -> Result<Vec<ApiResource>>;

    /// API resources whose name is one of `api_resource_names`.
    async fn find_api_resources_by_name(
        &self,
        api_resource_names: &[String],
    ) -> Result<Vec<ApiResource>>;

    /// Every identity resource, API resource, and API scope.
    async fn get_all_resources(&self) -> Result<idcache_core::Resources>;
}

/// Storage of records that expire: persisted grants, device-flow codes.
///
/// Implementations must make deletion idempotent: deleting rows that
/// another instance already removed is not an error.
#[async_trait]
pub trait ExpiredRecordStorage: Send + Sync {
    /// Target name used in logs and metrics (e.g. `"persisted_grants"`).
    fn name(&self) -> &'static str;

    /// Delete at most `limit` records whose expiration is strictly before
    /// `before`. Records without an expiration are never deleted.
    ///
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_expired(&self, before: OffsetDateTime, limit: usize) -> Result<u64>;
}
