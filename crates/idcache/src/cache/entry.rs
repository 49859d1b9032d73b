//! Cache entries and expiration policies.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Default absolute TTL when a caller does not choose one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Expiration policy for a single cache write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOptions {
    /// Expire a fixed duration after the write.
    Absolute(Duration),
    /// Expire after a period without reads; every hit extends the window.
    Sliding(Duration),
    /// Sliding, but never past an absolute deadline measured from the write.
    SlidingWithLimit {
        /// Idle window extended by each hit.
        sliding: Duration,
        /// Hard cap on the entry lifetime.
        absolute: Duration,
    },
}

impl EntryOptions {
    /// Absolute expiration after `ttl`.
    pub fn absolute(ttl: Duration) -> Self {
        Self::Absolute(ttl)
    }

    /// Sliding expiration with an idle window of `window`.
    pub fn sliding(window: Duration) -> Self {
        Self::Sliding(window)
    }

    /// Sliding expiration capped at `absolute` total lifetime.
    pub fn sliding_with_limit(sliding: Duration, absolute: Duration) -> Self {
        Self::SlidingWithLimit {
            sliding,
            absolute: absolute.max(sliding),
        }
    }

    /// Length of the first expiration window after a write.
    pub fn initial_ttl(&self) -> Duration {
        match *self {
            Self::Absolute(ttl) | Self::Sliding(ttl) => ttl,
            Self::SlidingWithLimit { sliding, .. } => sliding,
        }
    }

    /// Idle window for sliding policies.
    pub fn sliding_window(&self) -> Option<Duration> {
        match *self {
            Self::Absolute(_) => None,
            Self::Sliding(window) | Self::SlidingWithLimit { sliding: window, .. } => Some(window),
        }
    }
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self::Absolute(DEFAULT_TTL)
    }
}

/// A cached, serialized value with its expiration metadata.
///
/// The data is wrapped in `Arc` so hits hand out the bytes without copying.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    expires_at: Instant,
    sliding: Option<Duration>,
    deadline: Option<Instant>,
}

impl CachedEntry {
    /// Create an entry written now.
    pub fn new(data: Vec<u8>, options: &EntryOptions) -> Self {
        Self::with_shared(Arc::new(data), options)
    }

    /// Create an entry around already shared bytes.
    pub fn with_shared(data: Arc<Vec<u8>>, options: &EntryOptions) -> Self {
        let now = Instant::now();
        let deadline = match *options {
            EntryOptions::Absolute(ttl) => Some(now + ttl),
            EntryOptions::Sliding(_) => None,
            EntryOptions::SlidingWithLimit { absolute, .. } => Some(now + absolute),
        };
        let expires_at = match deadline {
            Some(deadline) => (now + options.initial_ttl()).min(deadline),
            None => now + options.initial_ttl(),
        };

        Self {
            data,
            cached_at: now,
            expires_at,
            sliding: options.sliding_window(),
            deadline,
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Extend a sliding entry after a hit. No-op for absolute entries.
    pub fn touch(&mut self) {
        if let Some(window) = self.sliding {
            let extended = Instant::now() + window;
            self.expires_at = match self.deadline {
                Some(deadline) => extended.min(deadline),
                None => extended,
            };
        }
    }

    /// Time left before expiry.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_absolute_entry_expires_at_ttl() {
        let entry = CachedEntry::new(vec![1], &EntryOptions::absolute(Duration::from_secs(10)));
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_does_not_extend_absolute_entry() {
        let mut entry = CachedEntry::new(vec![1], &EntryOptions::absolute(Duration::from_secs(10)));
        tokio::time::advance(Duration::from_secs(8)).await;
        entry.touch();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_entry_extends_on_touch() {
        let mut entry = CachedEntry::new(vec![1], &EntryOptions::sliding(Duration::from_secs(10)));

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(8)).await;
            assert!(!entry.is_expired());
            entry.touch();
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(entry.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_entry_respects_limit() {
        let mut entry = CachedEntry::new(
            vec![1],
            &EntryOptions::sliding_with_limit(Duration::from_secs(10), Duration::from_secs(15)),
        );

        tokio::time::advance(Duration::from_secs(8)).await;
        entry.touch();
        assert_eq!(entry.remaining(), Duration::from_secs(7));

        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(entry.is_expired());
    }

    #[test]
    fn test_limit_is_never_shorter_than_window() {
        let options =
            EntryOptions::sliding_with_limit(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(
            options,
            EntryOptions::SlidingWithLimit {
                sliding: Duration::from_secs(10),
                absolute: Duration::from_secs(10),
            }
        );
    }
}
