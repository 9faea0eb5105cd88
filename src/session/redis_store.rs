use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Connection, Pool};
use tracing::{debug, info};

use super::{Container, SessionError, SessionStore};
use crate::kv::{self, RemoteConfig};

const DEFAULT_PREFIX: &str = "sssdb_";

/// Session store on a Redis-protocol server. Containers are kept as JSON
/// under `prefix + id`.
pub struct RedisStore {
    pool: Pool,
    prefix: String,
    max_age: u64,
}

impl RedisStore {
    /// Build the store from a JSON config and check the server answers.
    pub async fn from_config(config: &str) -> Result<Self, SessionError> {
        let config = RemoteConfig::parse(config)?;
        let pool = kv::create_pool(&config).await?;

        info!("Session store connected to {}", config.url()?);
        Ok(Self::with_pool(
            pool,
            config.prefix_or(DEFAULT_PREFIX),
            config.max_age,
        ))
    }

    pub fn with_pool(pool: Pool, prefix: String, max_age: i64) -> Self {
        Self {
            pool,
            prefix,
            max_age: u64::try_from(max_age).unwrap_or(0),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    async fn conn(&self) -> Result<Connection, SessionError> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn get(&self, id: &str) -> Result<Option<Container>, SessionError> {
        let key = self.key(id);
        let mut conn = self.conn().await?;

        let raw: Option<Vec<u8>> = conn.get(&key).await?;
        let Some(raw) = raw.filter(|bytes| !bytes.is_empty()) else {
            return Ok(None);
        };

        // sliding expiry: every read pushes the deadline out again
        if self.max_age > 0 {
            let max_age = i64::try_from(self.max_age).unwrap_or(i64::MAX);
            let _: bool = conn.expire(&key, max_age).await?;
        }

        Ok(Some(serde_json::from_slice(&raw)?))
    }

    async fn set(&self, id: &str, container: &Container) -> Result<(), SessionError> {
        if !container.changed {
            debug!("Session unchanged, skipping write");
            return Ok(());
        }

        if container.data.is_none() {
            // a cleared payload must not come back on the next request
            return self.del(id).await;
        }

        let key = self.key(id);
        let bytes = serde_json::to_vec(container)?;
        let mut conn = self.conn().await?;

        if self.max_age > 0 {
            let _: () = conn.set_ex(&key, bytes, self.max_age).await?;
        } else {
            let _: () = conn.set(&key, bytes).await?;
        }
        Ok(())
    }

    async fn del(&self, id: &str) -> Result<(), SessionError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(self.key(id)).await?;
        Ok(())
    }

    /// Clearing every session on a shared server is an operator task, so
    /// this does nothing.
    async fn flush(&self) -> Result<(), SessionError> {
        Ok(())
    }
}
