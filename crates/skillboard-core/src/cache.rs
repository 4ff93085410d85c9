//! In-memory profile cache with expiry, a size bound and a background sweep.
//!
//! Entries expire `ttl` after they were stored. When the cache is full the
//! oldest-inserted entry is evicted first; reads never change that order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::FetchResult;

#[derive(Debug)]
struct CacheEntry {
    result: FetchResult,
    stored_at: Instant,
    /// Insertion sequence; matches the live slot in `order`.
    seq: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Keys in insertion order. Slots whose `seq` no longer matches the live
    /// entry are stale and skipped.
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl CacheState {
    fn evict_oldest(&mut self) -> Option<String> {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.entries.get(&key).is_some_and(|e| e.seq == seq) {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).is_some_and(|e| e.seq == *seq));
    }
}

/// Per-identifier result cache shared by all tasks of one orchestrator.
///
/// Only results for which [`FetchResult::is_cacheable`] holds are stored, so
/// a transient upstream outage never masks a later recovery.
#[derive(Clone)]
pub struct ProfileCache {
    state: Arc<Mutex<CacheState>>,
    ttl: Duration,
    max_capacity: u64,
}

impl ProfileCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            ttl,
            max_capacity,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_capacity(&self) -> u64 {
        self.max_capacity
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned cache mutex");
            poisoned.into_inner()
        })
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.stored_at) > self.ttl
    }

    /// Returns the cached result, dropping it instead if it has expired.
    pub fn get(&self, identifier: &str) -> Option<FetchResult> {
        let mut state = self.lock_state();
        let expired = self.is_expired(state.entries.get(identifier)?, Instant::now());
        if expired {
            state.entries.remove(identifier);
            tracing::debug!(identifier, "Cache entry expired");
            return None;
        }
        state.entries.get(identifier).map(|e| e.result.clone())
    }

    /// Stores `result` if it is cacheable. Returns whether it was stored.
    ///
    /// Storing a key again counts as a fresh insertion.
    pub fn insert(&self, identifier: &str, result: &FetchResult) -> bool {
        if !result.is_cacheable() || self.max_capacity == 0 {
            return false;
        }

        let mut state = self.lock_state();
        let replacing = state.entries.contains_key(identifier);
        if !replacing {
            while state.entries.len() as u64 >= self.max_capacity {
                match state.evict_oldest() {
                    Some(evicted) => tracing::debug!(identifier = %evicted, "Cache full, evicted oldest entry"),
                    None => break,
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            identifier.to_string(),
            CacheEntry {
                result: result.clone(),
                stored_at: Instant::now(),
                seq,
            },
        );
        state.order.push_back((identifier.to_string(), seq));

        if state.order.len() > state.entries.len() * 2 + 16 {
            state.compact_order();
        }
        true
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> u64 {
        self.lock_state().entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> u64 {
        let mut state = self.lock_state();
        let removed = state.entries.len() as u64;
        state.entries.clear();
        state.order.clear();
        removed
    }

    /// Drop expired entries now. Returns how many were removed.
    pub fn sweep(&self) -> u64 {
        let now = Instant::now();
        let mut state = self.lock_state();
        let before = state.entries.len();
        state.entries.retain(|_, entry| now.duration_since(entry.stored_at) <= self.ttl);
        state.compact_order();
        (before - state.entries.len()) as u64
    }

    /// Periodically sweep expired entries until `cancel` fires.
    ///
    /// Bounds memory for entries that are written once and never read again.
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        tracing::debug!(removed, entries = cache.len(), "Cache sweep complete");
                    }
                    () = cancel.cancelled() => break,
                }
            }
            tracing::debug!("Cache sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn ok(id: &str) -> FetchResult {
        FetchResult::success(id, serde_json::json!({"handle": id}))
    }

    #[test]
    fn stores_and_returns_successes() {
        let cache = ProfileCache::new(Duration::from_secs(60), 100);
        assert!(cache.insert("alice", &ok("alice")));
        assert_eq!(cache.get("alice"), Some(ok("alice")));
        assert_eq!(cache.get("bob"), None);
    }

    #[test]
    fn stores_not_found_but_not_transient_failures() {
        let cache = ProfileCache::new(Duration::from_secs(60), 100);
        let missing = FetchResult::failure("ghost", &AppError::NotFound("ghost".into()));
        let flaky = FetchResult::failure("flaky", &AppError::Timeout(5000));

        assert!(cache.insert("ghost", &missing));
        assert!(!cache.insert("flaky", &flaky));
        assert_eq!(cache.get("ghost"), Some(missing));
        assert_eq!(cache.get("flaky"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = ProfileCache::new(Duration::from_secs(10), 100);
        cache.insert("alice", &ok("alice"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(cache.get("alice").is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("alice"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_oldest_inserted_even_after_reads() {
        let cache = ProfileCache::new(Duration::from_secs(60), 2);
        cache.insert("a", &ok("a"));
        cache.insert("b", &ok("b"));
        assert!(cache.get("a").is_some());

        cache.insert("c", &ok("c"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn reinserting_moves_key_to_the_back() {
        let cache = ProfileCache::new(Duration::from_secs(60), 2);
        cache.insert("a", &ok("a"));
        cache.insert("b", &ok("b"));
        cache.insert("a", &ok("a"));

        cache.insert("c", &ok("c"));

        assert!(cache.get("a").is_some());
        assert_eq!(cache.get("b"), None);
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn repeated_overwrites_do_not_grow_order_queue() {
        let cache = ProfileCache::new(Duration::from_secs(60), 4);
        for _ in 0..1000 {
            cache.insert("a", &ok("a"));
        }
        let state = cache.lock_state();
        assert_eq!(state.entries.len(), 1);
        assert!(state.order.len() <= 18, "order holds {}", state.order.len());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = ProfileCache::new(Duration::from_secs(60), 10);
        cache.insert("a", &ok("a"));
        cache.insert("b", &ok("b"));

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_expired_entries() {
        let cache = ProfileCache::new(Duration::from_secs(30), 100);
        cache.insert("a", &ok("a"));
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.insert("b", &ok("b"));
        assert_eq!(cache.sweep(), 0);
        assert_eq!(cache.len(), 2);

        tokio::time::advance(Duration::from_secs(15)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("b").is_some());
    }

    #[tokio::test]
    async fn sweeper_stops_on_cancel() {
        let cache = ProfileCache::new(Duration::from_secs(60), 10);
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_millis(10), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }
}
