//! Batched deletion of expired records.

use std::collections::BTreeMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::watch;

use crate::config::CleanupConfig;
use crate::metrics;
use crate::storage::ExpiredRecordStorage;

/// Observable state of the cleanup service.
///
/// `Idle -> Scanning -> Deleting(1) -> Deleting(2) -> ... -> Idle`;
/// `Stopped` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupState {
    /// Waiting for the next run.
    Idle,
    /// A run started; no batch issued yet.
    Scanning,
    /// Deleting batch number `batch` (1-based) of `target`.
    Deleting { target: &'static str, batch: usize },
    /// Shut down; no further runs.
    Stopped,
}

/// Result of one cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Records deleted, per target.
    pub deleted: BTreeMap<&'static str, u64>,
    /// Batches issued across all targets.
    pub batches: usize,
    /// Targets whose batch failed; they are retried on the next run.
    pub failed: Vec<&'static str>,
    /// The run stopped early because shutdown was requested.
    pub interrupted: bool,
}

impl CleanupReport {
    /// Total records deleted.
    pub fn total_deleted(&self) -> u64 {
        self.deleted.values().sum()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Deletes expired persisted grants and device-flow codes in batches.
pub struct TokenCleanupService {
    targets: Vec<Arc<dyn ExpiredRecordStorage>>,
    batch_size: usize,
    max_batches: usize,
    state: watch::Sender<CleanupState>,
}

impl TokenCleanupService {
    pub fn new(
        targets: Vec<Arc<dyn ExpiredRecordStorage>>,
        batch_size: usize,
        max_batches: usize,
    ) -> Self {
        let (state, _) = watch::channel(CleanupState::Idle);
        Self {
            targets,
            batch_size: batch_size.max(1),
            max_batches: max_batches.max(1),
            state,
        }
    }

    pub fn from_config(targets: Vec<Arc<dyn ExpiredRecordStorage>>, config: &CleanupConfig) -> Self {
        Self::new(targets, config.batch_size, config.max_batches_per_run)
    }

    /// Current state.
    pub fn state(&self) -> CleanupState {
        self.state.borrow().clone()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<CleanupState> {
        self.state.subscribe()
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.send_replace(CleanupState::Stopped);
    }

    /// Delete records that expired before `before`.
    ///
    /// Each target is drained batch by batch until a batch comes back short,
    /// or the per-run batch limit is reached. `shutdown` is checked between
    /// batches. A failing target is logged and skipped; the others still run.
    pub async fn clean(&self, before: OffsetDateTime, shutdown: &watch::Receiver<bool>) -> CleanupReport {
        let mut report = CleanupReport::default();
        self.state.send_replace(CleanupState::Scanning);

        'targets: for target in &self.targets {
            let name = target.name();
            let mut deleted_total = 0u64;

            for batch in 1..=self.max_batches {
                if *shutdown.borrow() {
                    report.interrupted = true;
                    break 'targets;
                }

                self.state
                    .send_replace(CleanupState::Deleting { target: name, batch });
                report.batches += 1;

                match target.delete_expired(before, self.batch_size).await {
                    Ok(deleted) => {
                        deleted_total += deleted;
                        metrics::record_cleanup_deleted(name, deleted);
                        if deleted < self.batch_size as u64 {
                            break;
                        }
                        if batch == self.max_batches {
                            tracing::debug!(
                                store = name,
                                batches = batch,
                                "Batch limit reached, remaining records left for next run"
                            );
                        }
                    }
                    Err(e) => {
                        metrics::record_cleanup_failure(name);
                        tracing::warn!(store = name, batch, error = %e, "Expired record cleanup failed");
                        report.failed.push(name);
                        break;
                    }
                }
            }

            report.deleted.insert(name, deleted_total);
        }

        if *shutdown.borrow() {
            self.state.send_replace(CleanupState::Stopped);
        } else {
            self.state.send_replace(CleanupState::Idle);
        }

        if report.total_deleted() > 0 {
            tracing::info!(
                deleted = report.total_deleted(),
                batches = report.batches,
                "Cleaned up expired records"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use idcache_core::{Error, Result};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use time::macros::datetime;

    /// Mock target holding a fixed number of expired records.
    struct MockTarget {
        name: &'static str,
        remaining: AtomicU64,
        call_count: AtomicUsize,
        fail: bool,
    }

    impl MockTarget {
        fn new(name: &'static str, expired: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                remaining: AtomicU64::new(expired),
                call_count: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                remaining: AtomicU64::new(0),
                call_count: AtomicUsize::new(0),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExpiredRecordStorage for MockTarget {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn delete_expired(&self, _before: OffsetDateTime, limit: usize) -> Result<u64> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::storage("deadlock detected"));
            }
            let remaining = self.remaining.load(Ordering::SeqCst);
            let deleted = remaining.min(limit as u64);
            self.remaining.store(remaining - deleted, Ordering::SeqCst);
            Ok(deleted)
        }
    }

    const NOW: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_drains_in_batches_until_short_batch() {
        let codes = MockTarget::new("device_flow_codes", 50);
        let service = TokenCleanupService::new(vec![codes.clone() as Arc<dyn ExpiredRecordStorage>], 20, 100);

        let report = service.clean(NOW, &no_shutdown()).await;

        assert_eq!(report.deleted["device_flow_codes"], 50);
        assert_eq!(report.batches, 3);
        assert_eq!(codes.calls(), 3);
        assert!(report.is_success());
        assert_eq!(service.state(), CleanupState::Idle);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_one_empty_batch() {
        let grants = MockTarget::new("persisted_grants", 40);
        let service = TokenCleanupService::new(vec![grants.clone() as Arc<dyn ExpiredRecordStorage>], 20, 100);

        let report = service.clean(NOW, &no_shutdown()).await;

        assert_eq!(report.total_deleted(), 40);
        assert_eq!(grants.calls(), 3);
    }

    #[tokio::test]
    async fn test_batch_limit_leaves_rest_for_next_run() {
        let grants = MockTarget::new("persisted_grants", 100);
        let service = TokenCleanupService::new(vec![grants.clone() as Arc<dyn ExpiredRecordStorage>], 10, 3);

        assert_eq!(service.clean(NOW, &no_shutdown()).await.total_deleted(), 30);
        assert_eq!(service.clean(NOW, &no_shutdown()).await.total_deleted(), 30);
        assert_eq!(grants.remaining.load(Ordering::SeqCst), 40);
    }

    #[tokio::test]
    async fn test_failing_target_does_not_block_others() {
        let broken = MockTarget::failing("persisted_grants");
        let codes = MockTarget::new("device_flow_codes", 5);
        let service = TokenCleanupService::new(vec![broken.clone() as Arc<dyn ExpiredRecordStorage>, codes.clone()], 20, 100);

        let report = service.clean(NOW, &no_shutdown()).await;

        assert_eq!(report.failed, vec!["persisted_grants"]);
        assert_eq!(report.deleted["device_flow_codes"], 5);
        assert_eq!(broken.calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_before_next_batch() {
        let grants = MockTarget::new("persisted_grants", 100);
        let service = TokenCleanupService::new(vec![grants.clone() as Arc<dyn ExpiredRecordStorage>], 10, 100);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let report = service.clean(NOW, &rx).await;

        assert!(report.interrupted);
        assert_eq!(grants.calls(), 0);
        assert_eq!(service.state(), CleanupState::Stopped);
    }

    #[tokio::test]
    async fn test_nothing_expired_is_a_single_batch() {
        let grants = MockTarget::new("persisted_grants", 0);
        let service = TokenCleanupService::new(vec![grants.clone() as Arc<dyn ExpiredRecordStorage>], 100, 100);

        let report = service.clean(NOW, &no_shutdown()).await;

        assert_eq!(report.total_deleted(), 0);
        assert_eq!(grants.calls(), 1);
    }
}
