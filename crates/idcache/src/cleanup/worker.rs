//! Periodic cleanup worker.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::service::{CleanupReport, TokenCleanupService};
use crate::config::CleanupConfig;

/// Runs [`TokenCleanupService`] on a timer until shutdown.
pub struct TokenCleanupWorker {
    service: Arc<TokenCleanupService>,
    config: CleanupConfig,
}

impl TokenCleanupWorker {
    pub fn new(service: Arc<TokenCleanupService>, config: CleanupConfig) -> Self {
        Self { service, config }
    }

    pub fn service(&self) -> &Arc<TokenCleanupService> {
        &self.service
    }

    /// Run one cleanup pass for records expired as of now.
    pub async fn run_once(&self, shutdown: &watch::Receiver<bool>) -> CleanupReport {
        self.service.clean(OffsetDateTime::now_utc(), shutdown).await
    }

    /// Spawn the worker.
    ///
    /// Returns `None` without spawning when cleanup is disabled; storage is
    /// never touched in that case.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Token cleanup disabled");
            return None;
        }

        Some(tokio::spawn(self.run(shutdown)))
    }

    #[tracing::instrument(name = "token_cleanup", skip_all)]
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.interval;
        let first_tick = if self.config.run_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = tokio::time::interval_at(first_tick, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval = ?period,
            run_on_start = self.config.run_on_start,
            "Token cleanup worker started"
        );

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let report = self.run_once(&shutdown).await;
                    if !report.is_success() {
                        tracing::warn!(
                            failed = ?report.failed,
                            "Token cleanup run incomplete, retrying next interval"
                        );
                    } else {
                        tracing::debug!(deleted = report.total_deleted(), "Token cleanup run completed");
                    }
                    if report.interrupted {
                        break;
                    }
                }
            }
        }

        self.service.mark_stopped();
        tracing::info!("Token cleanup worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::CleanupState;
    use crate::storage::ExpiredRecordStorage;
    use async_trait::async_trait;
    use idcache_core::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingTarget {
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl ExpiredRecordStorage for CountingTarget {
        fn name(&self) -> &'static str {
            "persisted_grants"
        }

        async fn delete_expired(&self, _before: OffsetDateTime, _limit: usize) -> Result<u64> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    fn worker(config: CleanupConfig) -> (Arc<CountingTarget>, TokenCleanupWorker) {
        let target = Arc::new(CountingTarget::default());
        let service = TokenCleanupService::from_config(vec![target.clone() as Arc<dyn ExpiredRecordStorage>], &config);
        (target, TokenCleanupWorker::new(Arc::new(service), config))
    }

    fn config(interval_secs: u64) -> CleanupConfig {
        CleanupConfig {
            interval: Duration::from_secs(interval_secs),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_worker_does_not_spawn() {
        let (target, worker) = worker(CleanupConfig {
            enabled: false,
            ..Default::default()
        });
        let (_tx, rx) = watch::channel(false);

        assert!(worker.start(rx).is_none());
        tokio::task::yield_now().await;
        assert_eq!(target.call_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_run_waits_one_interval() {
        let (target, worker) = worker(config(60));
        let (tx, rx) = watch::channel(false);
        let handle = worker.start(rx).unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(target.call_count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(target.call_count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(target.call_count.load(Ordering::SeqCst), 2);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_start() {
        let (target, worker) = worker(CleanupConfig {
            run_on_start: true,
            ..config(60)
        });
        let (tx, rx) = watch::channel(false);
        let handle = worker.start(rx).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(target.call_count.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_marks_service_stopped() {
        let (_, worker) = worker(config(60));
        let service = worker.service().clone();
        let (tx, rx) = watch::channel(false);
        let handle = worker.start(rx).unwrap();

        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(service.state(), CleanupState::Stopped);
    }
}
