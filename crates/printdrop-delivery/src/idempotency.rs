// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Process-local record of object keys that were already printed.
//
// Entries are written after a successful print and before the queue message
// is acknowledged.  A periodic sweep drops entries older than the retention
// window; between sweeps an expired entry may still answer `has`, which only
// suppresses a reprint that was already allowed.  Nothing is persisted: a
// restart forgets every entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::shutdown::ShutdownGate;

/// Delivered-key cache with time-based eviction.
#[derive(Debug)]
pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
    retention: Duration,
}

impl IdempotencyCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// The map stays consistent across a panic elsewhere (every update is a
    /// single insert or retain), so a poisoned lock is recovered, not skipped.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `key` has been recorded and not yet swept.
    pub fn has(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Record `key` as printed at `now`, overwriting any earlier entry.
    pub fn mark_processed(&self, key: &str, now: DateTime<Utc>) {
        self.entries().insert(key.to_owned(), now);
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry older than the retention window; returns how many.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::MAX);
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, processed_at| now.signed_duration_since(*processed_at) <= retention);
        let removed = before - entries.len();
        if removed > 0 {
            info!(removed, remaining = entries.len(), "idempotency cache swept");
        } else {
            debug!(remaining = entries.len(), "idempotency cache sweep found nothing to evict");
        }
        removed
    }

    /// Sweep every `interval` until `shutdown` is requested.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: Arc<ShutdownGate>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.requested() => {
                        debug!("idempotency sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.sweep(Utc::now());
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn marked_keys_are_reported() {
        let cache = IdempotencyCache::new(HOUR);
        assert_eq!(cache.retention(), HOUR);
        assert!(!cache.has("clients/acme/a.pdf"));
        cache.mark_processed("clients/acme/a.pdf", Utc::now());
        assert!(cache.has("clients/acme/a.pdf"));
        assert!(!cache.has("clients/acme/b.pdf"));
    }

    #[test]
    fn marking_twice_keeps_one_entry() {
        let cache = IdempotencyCache::new(HOUR);
        let now = Utc::now();
        cache.mark_processed("k", now - chrono::Duration::minutes(90));
        cache.mark_processed("k", now);
        assert_eq!(cache.len(), 1);
        // The refreshed timestamp survives a sweep.
        assert_eq!(cache.sweep(now), 0);
        assert!(cache.has("k"));
    }

    #[test]
    fn sweep_evicts_only_expired_entries() {
        let cache = IdempotencyCache::new(HOUR);
        let now = Utc::now();
        cache.mark_processed("old", now - chrono::Duration::minutes(61));
        cache.mark_processed("young", now - chrono::Duration::minutes(59));

        // Not yet swept: the stale entry still suppresses.
        assert!(cache.has("old"));

        assert_eq!(cache.sweep(now), 1);
        assert!(!cache.has("old"));
        assert!(cache.has("young"));
    }

    #[test]
    fn poisoned_lock_still_suppresses_duplicates() {
        let cache = Arc::new(IdempotencyCache::new(HOUR));
        cache.mark_processed("clients/acme/a.pdf", Utc::now());

        let holder = Arc::clone(&cache);
        let panicked = std::thread::spawn(move || {
            let _guard = holder.entries.lock().unwrap();
            panic!("job task died while holding the cache");
        })
        .join();
        assert!(panicked.is_err());
        assert!(cache.entries.is_poisoned());

        assert!(cache.has("clients/acme/a.pdf"));
        cache.mark_processed("clients/acme/b.pdf", Utc::now());
        assert!(cache.has("clients/acme/b.pdf"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.sweep(Utc::now()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_interval_and_stops_on_shutdown() {
        let cache = Arc::new(IdempotencyCache::new(Duration::from_secs(1)));
        cache.mark_processed("old", Utc::now() - chrono::Duration::seconds(10));
        let shutdown = Arc::new(ShutdownGate::new());

        let handle = cache.spawn_sweeper(Duration::from_secs(300), shutdown.clone());
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(cache.is_empty());

        shutdown.request();
        handle.await.expect("sweeper exits cleanly");
    }
}
