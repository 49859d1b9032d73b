//! Read-through stores.
//!
//! Each contract has a pass-through implementation that delegates to the
//! backing storage, and a caching implementation that wraps it with a
//! [`DistributedCache`](crate::cache::DistributedCache). The choice is made
//! once at startup by [`IdentityCache`](crate::IdentityCache).

pub mod client;
pub mod cors;
pub mod resource;

pub use client::{CachingClientStore, ClientStore, StorageClientStore};
pub use cors::{CachingCorsPolicyService, CorsPolicyService, StorageCorsPolicyService};
pub use resource::{CachingResourceStore, ResourceStore, StorageResourceStore};

use std::time::Duration;

use crate::cache::EntryOptions;
use crate::config::CacheConfig;

/// Decides how long a lookup result is cached.
///
/// Found values use the positive options. Not-found and empty results use
/// the negative options, or are not cached when negative caching is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    positive: EntryOptions,
    negative: Option<EntryOptions>,
}

impl ExpirationPolicy {
    pub fn new(positive: EntryOptions, negative: Option<EntryOptions>) -> Self {
        Self { positive, negative }
    }

    /// Policy for an entity cached for `ttl` under `config`.
    pub fn from_config(config: &CacheConfig, ttl: Duration) -> Self {
        Self::new(config.entry_options(ttl), config.negative_entry_options())
    }

    /// Options for a result that is (or is not) present.
    pub fn options(&self, present: bool) -> Option<EntryOptions> {
        if present {
            Some(self.positive)
        } else {
            self.negative
        }
    }

    pub fn for_option<T>(&self, value: &Option<T>) -> Option<EntryOptions> {
        self.options(value.is_some())
    }

    pub fn for_list<T>(&self, values: &[T]) -> Option<EntryOptions> {
        self.options(!values.is_empty())
    }
}
