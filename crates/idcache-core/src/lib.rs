//! # idcache-core
//!
//! Domain types shared by the idcache crates:
//!
//! - [`types`] - clients, resources, scopes, persisted grants, device codes
//! - [`events`] - entity change events exchanged between instances
//! - [`error`] - the workspace-wide error type

pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, ErrorCategory, Result};
pub use events::{ChangeEvent, ChangeOperation, EntityType, InstanceId, UnknownEntityType};
pub use types::{
    ApiResource, ApiScope, Client, DeviceFlowCode, Expiring, GrantType, IdentityResource,
    PersistedGrant, Resources,
};
