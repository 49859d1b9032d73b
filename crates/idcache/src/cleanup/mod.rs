//! Cleanup of expired persisted grants and device-flow codes.
//!
//! [`TokenCleanupService`] deletes expired rows in bounded batches;
//! [`TokenCleanupWorker`] runs it periodically in the background.

pub mod service;
pub mod worker;

pub use service::{CleanupReport, CleanupState, TokenCleanupService};
pub use worker::TokenCleanupWorker;
