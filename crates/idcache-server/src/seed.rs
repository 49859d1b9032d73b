//! Load configured clients and resources into the in-memory store.

use idcache_memory::MemoryStore;

use crate::config::SeedConfig;

/// Counts of seeded records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub clients: usize,
    pub identity_resources: usize,
    pub api_resources: usize,
    pub api_scopes: usize,
}

/// Upsert every record in `seed`. Existing records with the same id are replaced.
pub async fn apply(store: &MemoryStore, seed: &SeedConfig) -> SeedSummary {
    for client in &seed.clients {
        store.upsert_client(client.clone().into()).await;
    }
    for resource in &seed.identity_resources {
        store.upsert_identity_resource(resource.clone().into()).await;
    }
    for resource in &seed.api_resources {
        store.upsert_api_resource(resource.clone().into()).await;
    }
    for scope in &seed.api_scopes {
        store.upsert_api_scope(scope.clone().into()).await;
    }

    let summary = SeedSummary {
        clients: seed.clients.len(),
        identity_resources: seed.identity_resources.len(),
        api_resources: seed.api_resources.len(),
        api_scopes: seed.api_scopes.len(),
    };
    tracing::info!(
        clients = summary.clients,
        identity_resources = summary.identity_resources,
        api_resources = summary.api_resources,
        api_scopes = summary.api_scopes,
        "Seed data loaded"
    );
    summary
}
