//! Entity change events carried between server instances.
//!
//! A [`ChangeEvent`] says "entity of type T with id X changed" and names the
//! instance that made the change. Events are transient; they are serialized
//! as JSON so any publish/subscribe transport can carry them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// ============================================================================
// Entity Type
// ============================================================================

/// Entity types that participate in distributed change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Registered OAuth client.
    Client,
    /// Protected API resource.
    ApiResource,
    /// Identity resource (group of user claims).
    IdentityResource,
    /// API scope.
    ApiScope,
    /// Device authorization flow code.
    DeviceFlowCode,
    /// Persisted grant (codes, refresh tokens, consents).
    PersistedGrant,
}

impl EntityType {
    /// All entity types, in a stable order.
    pub const ALL: [EntityType; 6] = [
        EntityType::Client,
        EntityType::ApiResource,
        EntityType::IdentityResource,
        EntityType::ApiScope,
        EntityType::DeviceFlowCode,
        EntityType::PersistedGrant,
    ];

    /// Returns the tag used in cache keys and event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Client => "client",
            EntityType::ApiResource => "api_resource",
            EntityType::IdentityResource => "identity_resource",
            EntityType::ApiScope => "api_scope",
            EntityType::DeviceFlowCode => "device_flow_code",
            EntityType::PersistedGrant => "persisted_grant",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown entity type tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown entity type: {0}")]
pub struct UnknownEntityType(pub String);

impl FromStr for EntityType {
    type Err = UnknownEntityType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEntityType(s.to_string()))
    }
}

// ============================================================================
// Change Operation
// ============================================================================

/// Kind of change applied to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    /// Entity was created.
    Created,
    /// Entity was updated.
    Updated,
    /// Entity was deleted.
    Deleted,
}

impl ChangeOperation {
    /// Returns the string representation of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Created => "created",
            ChangeOperation::Updated => "updated",
            ChangeOperation::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Instance Id
// ============================================================================

/// Identifier of a running server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generates a fresh random instance id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Change Event
// ============================================================================

/// Notification that an entity changed in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Type of the changed entity.
    pub entity_type: EntityType,
    /// Identifier of the changed entity (client id, resource name, ...).
    pub entity_id: String,
    /// What happened to it.
    pub operation: ChangeOperation,
    /// Instance that committed the write and published this event.
    pub origin: InstanceId,
    /// When the change was committed.
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl ChangeEvent {
    /// Create a new change event stamped with the current time.
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: ChangeOperation,
        origin: InstanceId,
    ) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            operation,
            origin,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }

    /// Create a "created" event.
    pub fn created(entity_type: EntityType, entity_id: impl Into<String>, origin: InstanceId) -> Self {
        Self::new(entity_type, entity_id, ChangeOperation::Created, origin)
    }

    /// Create an "updated" event.
    pub fn updated(entity_type: EntityType, entity_id: impl Into<String>, origin: InstanceId) -> Self {
        Self::new(entity_type, entity_id, ChangeOperation::Updated, origin)
    }

    /// Create a "deleted" event.
    pub fn deleted(entity_type: EntityType, entity_id: impl Into<String>, origin: InstanceId) -> Self {
        Self::new(entity_type, entity_id, ChangeOperation::Deleted, origin)
    }

    /// Returns `true` if this event was published by `instance`.
    pub fn is_from(&self, instance: InstanceId) -> bool {
        self.origin == instance
    }

    /// Encode as a JSON payload for transports.
    pub fn to_payload(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON payload produced by [`ChangeEvent::to_payload`].
    pub fn from_payload(payload: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
