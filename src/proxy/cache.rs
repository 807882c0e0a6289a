// src/proxy/cache.rs

//! Fetch-once memo cache
//!
//! The first caller for a key runs the fetch; concurrent callers for the
//! same key wait on that fetch and share its result. Successful results are
//! kept for the lifetime of the cache. A failed fetch is not memoized, so
//! the next caller tries again.

use crate::error::Result;
use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OnceCell;
use tracing::debug;

pub struct MemoCache<K, V> {
    cells: DashMap<K, Arc<OnceCell<V>>>,
    /// Number of times a fetch actually ran
    fetches: AtomicU64,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
            fetches: AtomicU64::new(0),
        }
    }

    /// Return the memoized value for `key`, running `fetch` if there is none
    pub async fn get_or_try_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        // Shard lock must be released before awaiting
        let cell = {
            let entry = self.cells.entry(key.clone()).or_default();
            Arc::clone(entry.value())
        };

        if let Some(value) = cell.get() {
            debug!("Memo hit for {:?}", key);
            return Ok(value.clone());
        }

        let value = cell
            .get_or_try_init(|| {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                fetch()
            })
            .await?;
        Ok(value.clone())
    }

    /// Memoized value for `key`, without fetching
    pub fn get(&self, key: &K) -> Option<V> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.cells.iter().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for MemoCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let cache: MemoCache<String, u32> = MemoCache::new();
        let first = cache
            .get_or_try_fetch("a".to_string(), || async { Ok(1) })
            .await
            .unwrap();
        let second = cache
            .get_or_try_fetch("a".to_string(), || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!((first, second), (1, 1));
        assert_eq!(cache.fetch_count(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache: Arc<MemoCache<String, u32>> = Arc::new(MemoCache::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_try_fetch("slow".to_string(), || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 42);
        }
        assert_eq!(cache.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_memoized() {
        let cache: MemoCache<&'static str, u32> = MemoCache::new();
        let err = cache
            .get_or_try_fetch("k", || async { Err(Error::Fetch("boom".to_string())) })
            .await;
        assert!(matches!(err, Err(Error::Fetch(_))));
        assert!(cache.is_empty());

        let ok = cache.get_or_try_fetch("k", || async { Ok(7) }).await.unwrap();
        assert_eq!(ok, 7);
        assert_eq!(cache.fetch_count(), 2);
    }
}
