//! Last good snapshot per source

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use arb_core::{PriceSnapshot, SourceId};

/// Cached snapshot entry
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub prices: PriceSnapshot,
    pub fetched_at: Instant,
    pub fetched_at_utc: DateTime<Utc>,
}

impl CachedSnapshot {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Concurrent cache keyed by source
#[derive(Debug, Default)]
pub struct PriceCache {
    entries: DashMap<SourceId, CachedSnapshot>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached snapshot for a source
    pub fn store(&self, source: &SourceId, prices: PriceSnapshot) {
        let entry = CachedSnapshot {
            prices,
            fetched_at: Instant::now(),
            fetched_at_utc: Utc::now(),
        };
        self.entries.insert(source.clone(), entry);
    }

    pub fn get(&self, source: &SourceId) -> Option<CachedSnapshot> {
        self.entries.get(source).map(|r| r.value().clone())
    }

    pub fn age(&self, source: &SourceId) -> Option<Duration> {
        self.entries.get(source).map(|r| r.value().age())
    }

    pub fn remove(&self, source: &SourceId) -> Option<CachedSnapshot> {
        self.entries.remove(source).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_core::Symbol;

    fn snapshot(price: f64) -> PriceSnapshot {
        vec![(Symbol::new("AAPL").unwrap(), price)].into_iter().collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_replaces_and_ages() {
        let cache = PriceCache::new();
        let source = SourceId::new("alpaca").unwrap();

        cache.store(&source, snapshot(100.0));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.age(&source), Some(Duration::from_secs(3)));

        cache.store(&source, snapshot(101.0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&source).unwrap().prices.get("AAPL"), Some(101.0));
        assert_eq!(cache.age(&source), Some(Duration::ZERO));
    }

    #[test]
    fn test_remove() {
        let cache = PriceCache::new();
        let source = SourceId::new("yahoo").unwrap();
        assert!(cache.get(&source).is_none());

        cache.store(&source, snapshot(5.0));
        assert!(cache.remove(&source).is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_stores() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(PriceCache::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let source = SourceId::new(format!("source-{}", i)).unwrap();
                    for j in 0..100 {
                        cache.store(&source, snapshot(1.0 + j as f64));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.len(), 4);
    }
}
