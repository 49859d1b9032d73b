//! # idcache-server
//!
//! Runnable idcache instance:
//!
//! - [`config`] - TOML + environment configuration
//! - [`observability`] - tracing setup
//! - [`cache`] - Redis L1+L2 cache tier
//! - [`events`] - Redis pub/sub change event channel
//! - [`seed`] - in-memory clients and resources from configuration
//! - [`server`] - assembly and graceful shutdown

pub mod cache;
pub mod config;
pub mod events;
pub mod observability;
pub mod seed;
pub mod server;

pub use config::AppConfig;
pub use server::{Server, shutdown_signal};
