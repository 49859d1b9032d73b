//! Event-driven cache invalidation.
//!
//! The [`KeyRegistry`] maps each entity type to the cache keys a change
//! makes stale; the [`CacheInvalidator`] applies it to incoming events.

pub mod invalidator;
pub mod registry;

pub use invalidator::{CacheInvalidator, InvalidatorStats};
pub use registry::{InvalidationPlan, KeyRegistry, RegistryEntry};
