//! Configuration entities and expiring artifacts of the authorization server.

pub mod client;
pub mod grant;
pub mod resource;

pub use client::{Client, GrantType};
pub use grant::{DeviceFlowCode, Expiring, PersistedGrant};
pub use resource::{ApiResource, ApiScope, IdentityResource, Resources};
