use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Connection, Pool};
use parking_lot::RwLock;
use tracing::{info, warn};

use super::{Cache, CacheError, CacheValue};
use crate::kv::{self, RemoteConfig};

const DEFAULT_PREFIX: &str = "cssdb_";

/// Cache adapter backed by a Redis-protocol store.
///
/// Every operation checks a connection out of the pool and returns it when
/// done. Expiry is left to the store itself, so there is no sweep task.
#[derive(Default)]
pub struct RedisCache {
    pool: RwLock<Option<Pool>>,
    prefix: RwLock<String>,
}

impl RedisCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix.read(), key)
    }

    async fn conn(&self) -> Result<Connection, CacheError> {
        let pool = self.pool.read().clone().ok_or(CacheError::NotStarted)?;
        Ok(pool.get().await?)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<(), CacheError> {
        let full_key = self.key(key);
        let mut conn = self.conn().await?;

        let exists: bool = conn.exists(&full_key).await?;
        if !exists {
            return Err(CacheError::KeyNotFound);
        }

        let result: Result<i64, _> = conn.incr(&full_key, delta).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == deadpool_redis::redis::ErrorKind::ResponseError => {
                Err(CacheError::NotNumeric(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn put(&self, key: &str, value: CacheValue, ttl_secs: u64) -> Result<(), CacheError> {
        let full_key = self.key(key);
        let mut conn = self.conn().await?;

        if ttl_secs > 0 {
            let _: () = conn.set_ex(&full_key, value.to_bytes(), ttl_secs).await?;
        } else {
            let _: () = conn.set(&full_key, value.to_bytes()).await?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<CacheValue> {
        let mut conn = match self.conn().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("cache: redis error: {}", e);
                return None;
            }
        };

        let result: Result<Option<Vec<u8>>, _> = conn.get(self.key(key)).await;
        match result {
            Ok(value) => value.map(CacheValue::from_bytes),
            Err(e) => {
                warn!("cache: redis error: {}", e);
                None
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(self.key(key)).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<(), CacheError> {
        self.incr_by(key, 1).await
    }

    async fn decr(&self, key: &str) -> Result<(), CacheError> {
        self.incr_by(key, -1).await
    }

    async fn is_exist(&self, key: &str) -> bool {
        let mut conn = match self.conn().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("cache: redis error: {}", e);
                return false;
            }
        };

        let result: Result<bool, _> = conn.exists(self.key(key)).await;
        result.unwrap_or_else(|e| {
            warn!("cache: redis error: {}", e);
            false
        })
    }

    /// Not supported: clearing a shared remote store is left to its operator.
    async fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn start_and_gc(&self, config: &str) -> Result<(), CacheError> {
        let config = RemoteConfig::parse(config)?;
        let pool = kv::create_pool(&config).await?;

        *self.prefix.write() = config.prefix_or(DEFAULT_PREFIX);
        *self.pool.write() = Some(pool);

        info!("cache: redis adapter ready at {}", config.url()?);
        Ok(())
    }
}
