use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::{sync::RwLock, task::JoinHandle, time::Instant};
use tracing::debug;

use super::{Cache, CacheError, CacheValue};

const DEFAULT_GC_INTERVAL: i64 = 60;

#[derive(Debug, Clone)]
struct MemoryItem {
    value: CacheValue,
    created: Instant,
    expire: u64,
}

impl MemoryItem {
    fn is_expired(&self) -> bool {
        self.expire > 0 && self.created.elapsed() >= Duration::from_secs(self.expire)
    }
}

#[derive(Debug, Deserialize)]
struct MemoryConfig {
    #[serde(rename = "Interval", default = "default_interval")]
    interval: i64,
}

fn default_interval() -> i64 {
    DEFAULT_GC_INTERVAL
}

#[derive(Default)]
struct Inner {
    items: RwLock<HashMap<String, MemoryItem>>,
}

impl Inner {
    async fn sweep(&self) -> usize {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, item| !item.is_expired());
        before - items.len()
    }
}

/// In-process cache guarded by a single reader/writer lock.
#[derive(Default)]
pub struct MemoryCache {
    inner: Arc<Inner>,
    gc: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until swept.
    pub async fn len(&self) -> usize {
        self.inner.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn update_counter(
        &self,
        key: &str,
        step: fn(&CacheValue, &str) -> Result<CacheValue, CacheError>,
    ) -> Result<(), CacheError> {
        let mut items = self.inner.items.write().await;
        let item = items.get_mut(key).ok_or(CacheError::KeyNotFound)?;
        item.value = step(&item.value, key)?;
        Ok(())
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        if let Some(handle) = self.gc.lock().take() {
            handle.abort();
        }
    }
}

fn increment(value: &CacheValue, key: &str) -> Result<CacheValue, CacheError> {
    match value {
        CacheValue::Int(v) => v
            .checked_add(1)
            .map(CacheValue::Int)
            .ok_or_else(|| CacheError::Overflow(key.to_string())),
        CacheValue::Uint(v) => v
            .checked_add(1)
            .map(CacheValue::Uint)
            .ok_or_else(|| CacheError::Overflow(key.to_string())),
        _ => Err(CacheError::NotNumeric(key.to_string())),
    }
}

fn decrement(value: &CacheValue, key: &str) -> Result<CacheValue, CacheError> {
    match value {
        CacheValue::Int(v) => v
            .checked_sub(1)
            .map(CacheValue::Int)
            .ok_or_else(|| CacheError::Overflow(key.to_string())),
        CacheValue::Uint(v) => v
            .checked_sub(1)
            .map(CacheValue::Uint)
            .ok_or_else(|| CacheError::Overflow(key.to_string())),
        _ => Err(CacheError::NotNumeric(key.to_string())),
    }
}

async fn gc_loop(weak: Weak<Inner>, interval: Duration) {
    loop {
        // The next pass is scheduled only after this one finishes.
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let removed = inner.sweep().await;
        if removed > 0 {
            debug!("cache gc removed {} expired items", removed);
        }
        drop(inner);

        tokio::time::sleep(interval).await;
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn put(&self, key: &str, value: CacheValue, ttl_secs: u64) -> Result<(), CacheError> {
        let mut items = self.inner.items.write().await;
        items.insert(
            key.to_string(),
            MemoryItem {
                value,
                created: Instant::now(),
                expire: ttl_secs,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<CacheValue> {
        let items = self.inner.items.read().await;
        let item = items.get(key)?;

        if item.is_expired() {
            // Deleting needs the write lock; leave it to a background task
            // so readers are not held up.
            let inner = Arc::clone(&self.inner);
            let key = key.to_string();
            tokio::spawn(async move {
                let mut items = inner.items.write().await;
                if items.get(&key).is_some_and(MemoryItem::is_expired) {
                    items.remove(&key);
                }
            });
            return None;
        }

        Some(item.value.clone())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.items.write().await.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<(), CacheError> {
        self.update_counter(key, increment).await
    }

    async fn decr(&self, key: &str) -> Result<(), CacheError> {
        self.update_counter(key, decrement).await
    }

    async fn is_exist(&self, key: &str) -> bool {
        self.inner
            .items
            .read()
            .await
            .get(key)
            .is_some_and(|item| !item.is_expired())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.inner.items.write().await.clear();
        Ok(())
    }

    async fn start_and_gc(&self, config: &str) -> Result<(), CacheError> {
        let config: MemoryConfig =
            serde_json::from_str(config).map_err(|e| CacheError::Config(e.to_string()))?;

        let mut gc = self.gc.lock();
        if let Some(handle) = gc.take() {
            handle.abort();
        }

        if config.interval < 1 {
            debug!("cache gc disabled (Interval = {})", config.interval);
            return Ok(());
        }

        let interval = Duration::from_secs(config.interval as u64);
        *gc = Some(tokio::spawn(gc_loop(Arc::downgrade(&self.inner), interval)));
        debug!("cache gc started, interval {:?}", interval);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_and_expire() {
        let cache = MemoryCache::new();
        cache.start_and_gc(r#"{"Interval":60}"#).await.unwrap();

        cache.put("uname", "unknwon".into(), 1).await.unwrap();
        cache.put("uname2", "unknwon2".into(), 1).await.unwrap();
        assert!(cache.is_exist("uname").await);

        assert_eq!(cache.get("404").await, None);
        assert_eq!(
            cache.get("uname").await.as_ref().and_then(CacheValue::as_str),
            Some("unknwon")
        );

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("uname").await, None);
        assert!(!cache.is_exist("uname2").await);
        assert_eq!(cache.get("uname2").await, None);
    }

    #[tokio::test]
    async fn test_zero_ttl_lives_until_deleted() {
        let cache = MemoryCache::new();

        cache.put("uname", "unknwon".into(), 0).await.unwrap();
        assert!(cache.is_exist("uname").await);
        cache.delete("uname").await.unwrap();
        assert_eq!(cache.get("uname").await, None);

        cache.put("uname", "unknwon".into(), 0).await.unwrap();
        cache.flush().await.unwrap();
        assert_eq!(cache.get("uname").await, None);
    }

    #[tokio::test]
    async fn test_incr_decr_numeric_values() {
        let cache = MemoryCache::new();

        assert!(matches!(
            cache.incr("404").await,
            Err(CacheError::KeyNotFound)
        ));
        assert!(matches!(
            cache.decr("404").await,
            Err(CacheError::KeyNotFound)
        ));

        cache.put("int", 0i64.into(), 0).await.unwrap();
        cache.put("int32", 0i32.into(), 0).await.unwrap();
        cache.put("uint", 0u64.into(), 0).await.unwrap();
        cache.put("uint32", 0u32.into(), 0).await.unwrap();

        // unsigned counters cannot go below zero
        assert!(cache.decr("uint").await.is_err());
        assert!(cache.decr("uint32").await.is_err());
        assert_eq!(cache.get("uint").await, Some(CacheValue::Uint(0)));

        for key in ["int", "int32", "uint", "uint32"] {
            cache.incr(key).await.unwrap();
        }
        assert_eq!(cache.get("int").await, Some(CacheValue::Int(1)));
        assert_eq!(cache.get("uint32").await, Some(CacheValue::Uint(1)));

        for key in ["int", "int32", "uint", "uint32"] {
            cache.decr(key).await.unwrap();
        }
        assert_eq!(cache.get("int").await, Some(CacheValue::Int(0)));
        assert_eq!(cache.get("uint").await, Some(CacheValue::Uint(0)));
    }

    #[tokio::test]
    async fn test_incr_on_text_fails_without_mutation() {
        let cache = MemoryCache::new();
        cache.put("string", "hi".into(), 0).await.unwrap();

        assert!(matches!(
            cache.incr("string").await,
            Err(CacheError::NotNumeric(_))
        ));
        assert!(matches!(
            cache.decr("string").await,
            Err(CacheError::NotNumeric(_))
        ));
        assert_eq!(cache.get("string").await, Some(CacheValue::from("hi")));
    }

    #[tokio::test]
    async fn test_overflow_is_rejected() {
        let cache = MemoryCache::new();
        cache.put("max", i64::MAX.into(), 0).await.unwrap();

        assert!(matches!(
            cache.incr("max").await,
            Err(CacheError::Overflow(_))
        ));
        assert_eq!(cache.get("max").await, Some(CacheValue::Int(i64::MAX)));
    }

    #[tokio::test]
    async fn test_lazy_expiry_removes_entry() {
        let cache = MemoryCache::new();
        cache.put("short", "v".into(), 1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("short").await, None);

        // give the background delete a chance to run
        for _ in 0..50 {
            if cache.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_gc_sweeps_expired_entries() {
        let cache = MemoryCache::new();
        cache.start_and_gc(r#"{"Interval":1}"#).await.unwrap();

        cache.put("a", "1".into(), 1).await.unwrap();
        cache.put("b", "2".into(), 0).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2300)).await;

        assert_eq!(cache.len().await, 1);
        assert!(cache.is_exist("b").await);
    }

    #[tokio::test]
    async fn test_bad_config_is_rejected() {
        let cache = MemoryCache::new();
        assert!(matches!(
            cache.start_and_gc("not json").await,
            Err(CacheError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_interval_uses_default() {
        let config: MemoryConfig = serde_json::from_str(r#"{"Other":1}"#).unwrap();
        assert_eq!(config.interval, DEFAULT_GC_INTERVAL);
    }
}
