//! Tables of expiring records.

use async_trait::async_trait;
use dashmap::DashMap;
use idcache::storage::ExpiredRecordStorage;
use idcache_core::{Expiring, Result};
use time::OffsetDateTime;

/// A keyed table of records with optional expiration.
pub struct ExpiringTable<T> {
    name: &'static str,
    rows: DashMap<String, T>,
}

impl<T: Expiring + Clone + Send + Sync> ExpiringTable<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: DashMap::new(),
        }
    }

    pub fn insert(&self, key: impl Into<String>, row: T) -> Option<T> {
        self.rows.insert(key.into(), row)
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.rows.get(key).map(|row| row.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.rows.remove(key).map(|(_, row)| row)
    }

    /// Find the first row matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.rows
            .iter()
            .find(|row| predicate(row.value()))
            .map(|row| row.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows expired as of `now`.
    pub fn count_expired(&self, now: OffsetDateTime) -> usize {
        self.rows
            .iter()
            .filter(|row| row.value().is_expired_at(now))
            .count()
    }
}

#[async_trait]
impl<T: Expiring + Clone + Send + Sync> ExpiredRecordStorage for ExpiringTable<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn delete_expired(&self, before: OffsetDateTime, limit: usize) -> Result<u64> {
        // Oldest first, like an indexed `ORDER BY expiration LIMIT n`.
        let mut candidates: Vec<(OffsetDateTime, String)> = self
            .rows
            .iter()
            .filter_map(|row| {
                let expiration = row.value().expiration()?;
                (expiration < before).then(|| (expiration, row.key().clone()))
            })
            .collect();
        candidates.sort_unstable();
        candidates.truncate(limit);

        // A concurrent cleaner may have removed a candidate already; only
        // rows actually removed here are counted.
        let deleted = candidates
            .iter()
            .filter(|(_, key)| {
                self.rows
                    .remove_if(key, |_, row| row.is_expired_at(before))
                    .is_some()
            })
            .count();

        Ok(deleted as u64)
    }
}
