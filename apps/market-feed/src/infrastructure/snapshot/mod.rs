//! In-Memory Snapshot Store
//!
//! [`SnapshotStore`] backed by a `parking_lot::RwLock<HashMap>`. Expiry is
//! passive: nothing sweeps the map. Expired entries are invisible to reads
//! and scans and their slot is reused when the key is written again.
//!
//! Time is measured with `tokio::time::Instant` so tests can drive expiry
//! with a paused clock.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::application::ports::SnapshotStore;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local snapshot store.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    /// Whether there are no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
    }

    fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at - now)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const TTL: Duration = Duration::from_secs(172_800);

    #[tokio::test(start_paused = true)]
    async fn rewrite_resets_expiry_to_now_plus_ttl() {
        let store = MemorySnapshotStore::new();
        store.set_with_ttl("Binance:SpotMiniTicker:BTCUSDT", "1".to_string(), TTL);

        tokio::time::advance(Duration::from_secs(100)).await;
        store.set_with_ttl("Binance:SpotMiniTicker:BTCUSDT", "2".to_string(), TTL);

        assert_eq!(store.ttl("Binance:SpotMiniTicker:BTCUSDT"), Some(TTL));
        assert_eq!(store.get("Binance:SpotMiniTicker:BTCUSDT").as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_keys_are_absent_from_get_and_scan() {
        let store = MemorySnapshotStore::new();
        store.set_with_ttl("spot:BTCUSDT", "a".to_string(), Duration::from_secs(10));
        store.set_with_ttl("spot:ETHUSDT", "b".to_string(), Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(store.get("spot:BTCUSDT"), None);
        assert_eq!(store.scan_prefix("spot:"), vec!["spot:ETHUSDT".to_string()]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_passive_until_the_key_is_rewritten() {
        let store = MemorySnapshotStore::new();
        store.set_with_ttl("spot:BTCUSDT", "a".to_string(), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(store.is_empty());
        assert_eq!(store.entries.read().len(), 1);

        store.set_with_ttl("spot:BTCUSDT", "b".to_string(), Duration::from_secs(10));
        assert_eq!(store.entries.read().len(), 1);
        assert_eq!(store.get("spot:BTCUSDT").as_deref(), Some("b"));
    }

    #[test]
    fn scan_is_prefix_scoped_and_sorted() {
        let store = MemorySnapshotStore::new();
        store.set_with_ttl("Binance:SpotBookTicker:ETHUSDT", "x".to_string(), TTL);
        store.set_with_ttl("Binance:SpotMiniTicker:ETHUSDT", "x".to_string(), TTL);
        store.set_with_ttl("Binance:SpotMiniTicker:BTCUSDT", "x".to_string(), TTL);

        assert_eq!(
            store.scan_prefix("Binance:SpotMiniTicker:"),
            vec![
                "Binance:SpotMiniTicker:BTCUSDT".to_string(),
                "Binance:SpotMiniTicker:ETHUSDT".to_string(),
            ]
        );
    }

    #[test]
    fn missing_key_has_no_ttl() {
        let store = MemorySnapshotStore::new();
        assert_eq!(store.ttl("nope"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_writers_do_not_need_coordination() {
        let store = Arc::new(MemorySnapshotStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.set_with_ttl(&format!("k:{}", i % 10), format!("{t}"), TTL);
                        let _ = store.get(&format!("k:{}", (i + 1) % 10));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.scan_prefix("k:").len(), 10);
    }
}
