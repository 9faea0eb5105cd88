use std::{collections::HashMap, sync::Arc};

use tracing::info;

use super::{CacheError, MemoryCache, RedisCache, SharedCache};

/// Builds a fresh, unstarted adapter instance.
pub type CacheFactory = Arc<dyn Fn() -> SharedCache + Send + Sync>;

/// Lookup table from adapter name to factory, owned by the application's
/// composition root.
#[derive(Clone, Default)]
pub struct CacheRegistry {
    adapters: HashMap<String, CacheFactory>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in "memory" and "redis" adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.adapters.insert(
            "memory".to_string(),
            Arc::new(|| Arc::new(MemoryCache::new()) as SharedCache),
        );
        registry.adapters.insert(
            "redis".to_string(),
            Arc::new(|| Arc::new(RedisCache::new()) as SharedCache),
        );
        registry
    }

    pub fn register(&mut self, name: &str, factory: CacheFactory) -> Result<(), CacheError> {
        if self.adapters.contains_key(name) {
            return Err(CacheError::DuplicateAdapter(name.to_string()));
        }
        self.adapters.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Create the named adapter, apply `config` and start its background work.
    ///
    /// `config` must be a non-empty JSON object such as `{"Interval":60}`.
    pub async fn open(&self, name: &str, config: &str) -> Result<SharedCache, CacheError> {
        let factory = self
            .adapters
            .get(name)
            .ok_or_else(|| CacheError::UnknownAdapter(name.to_string()))?;

        let trimmed = config.trim();
        if trimmed.is_empty() || trimmed == "{}" {
            return Err(CacheError::Config("empty config".to_string()));
        }

        let cache = factory();
        cache.start_and_gc(config).await?;

        info!("cache: adapter '{}' started", name);
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_adapter() {
        let registry = CacheRegistry::with_defaults();
        let cache = registry.open("memory", r#"{"Interval":60}"#).await.unwrap();

        cache.put("k", "v".into(), 0).await.unwrap();
        assert!(cache.is_exist("k").await);
    }

    #[tokio::test]
    async fn test_each_open_gets_its_own_instance() {
        let registry = CacheRegistry::with_defaults();
        let a = registry.open("memory", r#"{"Interval":60}"#).await.unwrap();
        let b = registry.open("memory", r#"{"Interval":60}"#).await.unwrap();

        a.put("k", "v".into(), 0).await.unwrap();
        assert!(!b.is_exist("k").await);
    }

    #[tokio::test]
    async fn test_unknown_adapter() {
        let registry = CacheRegistry::with_defaults();
        let result = registry.open("fake", r#"{"Interval":60}"#).await;
        assert!(matches!(result, Err(CacheError::UnknownAdapter(name)) if name == "fake"));
    }

    #[tokio::test]
    async fn test_empty_config_is_rejected() {
        let registry = CacheRegistry::with_defaults();
        assert!(matches!(
            registry.open("memory", "{}").await,
            Err(CacheError::Config(_))
        ));
        assert!(matches!(
            registry.open("memory", "").await,
            Err(CacheError::Config(_))
        ));
    }

    #[test]
    fn test_register_twice_fails() {
        let mut registry = CacheRegistry::with_defaults();
        let result = registry.register(
            "memory",
            Arc::new(|| Arc::new(MemoryCache::new()) as SharedCache),
        );
        assert!(matches!(result, Err(CacheError::DuplicateAdapter(_))));

        registry
            .register(
                "scratch",
                Arc::new(|| Arc::new(MemoryCache::new()) as SharedCache),
            )
            .unwrap();
        assert_eq!(registry.names(), vec!["memory", "redis", "scratch"]);
    }
}
