//! In-process cache store, used when no RocksDB path is configured.

use std::collections::{BTreeSet, HashMap};

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::RwLock;

use super::{now_millis, CacheError, CacheStore};

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Vec<u8>>,
    touched: BTreeSet<(u64, String)>,
    touch_times: HashMap<String, u64>,
}

/// HashMap-backed [`CacheStore`].
#[derive(Default)]
pub struct MemoryCacheStore {
    inner: RwLock<Inner>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.read().await.entries.contains_key(key)
    }

    /// Touches with timestamps in `[from, to]`, oldest first.
    pub async fn touched_between(&self, from: u64, to: u64) -> Vec<(u64, String)> {
        self.inner
            .read()
            .await
            .touched
            .iter()
            .filter(|(ts, _)| (from..=to).contains(ts))
            .cloned()
            .collect()
    }

    async fn touch_at(&self, key: &str, timestamp: u64) {
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.touch_times.insert(key.to_string(), timestamp) {
            inner.touched.remove(&(previous, key.to_string()));
        }
        inner.touched.insert((timestamp, key.to_string()));
    }
}

impl CacheStore for MemoryCacheStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
        async move { Ok(self.inner.read().await.entries.get(key).cloned()) }.boxed()
    }

    fn store<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<(), CacheError>> {
        async move {
            self.inner.write().await.entries.insert(key.to_string(), value);
            Ok(())
        }
        .boxed()
    }

    fn touch<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), CacheError>> {
        async move {
            self.touch_at(key, now_millis()).await;
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_get() {
        let cache = MemoryCacheStore::new();
        assert!(cache.get("newsdoc:a").await.unwrap().is_none());
        cache.store("newsdoc:a", vec![1, 2, 3]).await.unwrap();
        assert_eq!(cache.get("newsdoc:a").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_retouch_moves_entry() {
        let cache = MemoryCacheStore::new();
        cache.touch_at("newsdoc:a", 10).await;
        cache.touch_at("newsdoc:b", 20).await;
        cache.touch_at("newsdoc:a", 30).await;

        let touched = cache.touched_between(0, u64::MAX).await;
        assert_eq!(
            touched,
            vec![(20, "newsdoc:b".to_string()), (30, "newsdoc:a".to_string())]
        );
        assert_eq!(cache.touched_between(25, 40).await.len(), 1);
    }
}
