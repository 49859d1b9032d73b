//! In-memory backing store and event bus for idcache.
//!
//! [`MemoryStore`] implements every storage contract of `idcache` with
//! `DashMap` tables. Writes publish a change event after they are applied,
//! so caches on every instance sharing the [`LocalEventBus`] stay
//! consistent. Useful for tests, demos, and configuration-seeded servers.
//!
//! # Example
//!
//! ```ignore
//! use idcache_memory::{LocalEventBus, MemoryStore};
//!
//! let bus = Arc::new(LocalEventBus::default());
//! let store = Arc::new(MemoryStore::with_events(bus.clone(), instance));
//!
//! store.upsert_client(Client::new("app1", "App One")).await;
//! ```

pub mod bus;
pub mod store;
pub mod table;

pub use bus::LocalEventBus;
pub use store::MemoryStore;
pub use table::ExpiringTable;
