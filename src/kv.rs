//! Connection plumbing shared by the remote cache adapter and the remote
//! session store.
//!
//! Both speak the Redis protocol, which SSDB also implements, so a config
//! written for the SSDB-backed deployments keeps working:
//!
//! ```json
//! {"SSDB":{"Host":"127.0.0.1","Port":8888,"MaxPoolSize":50},"Prefix":"sssdb_","MaxAge":0}
//! ```
//!
//! or, with an explicit URL:
//!
//! ```json
//! {"Redis":{"Url":"redis://127.0.0.1:6379","MaxPoolSize":16},"Prefix":"cache_"}
//! ```

use deadpool_redis::{redis, Config, Pool, PoolConfig, Runtime};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("invalid remote store config: {0}")]
    Config(String),

    #[error("failed to create connection pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),

    #[error("failed to acquire connection: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("remote store error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisSection {
    #[serde(rename = "Url")]
    pub url: Option<String>,
    #[serde(rename = "MaxPoolSize", default)]
    pub max_pool_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SsdbSection {
    #[serde(rename = "Host", default)]
    pub host: String,
    #[serde(rename = "Port", default)]
    pub port: u16,
    #[serde(rename = "MaxPoolSize", default)]
    pub max_pool_size: usize,
}

/// Flat JSON config understood by every remote-backed component.
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteConfig {
    #[serde(rename = "Redis")]
    pub redis: Option<RedisSection>,
    #[serde(rename = "SSDB")]
    pub ssdb: Option<SsdbSection>,
    #[serde(rename = "Prefix")]
    pub prefix: Option<String>,
    #[serde(rename = "MaxAge", default)]
    pub max_age: i64,
}

impl RemoteConfig {
    pub fn parse(config: &str) -> Result<Self, KvError> {
        serde_json::from_str(config).map_err(|e| KvError::Config(e.to_string()))
    }

    /// Key prefix, falling back to the component's default.
    pub fn prefix_or(&self, default: &str) -> String {
        self.prefix.clone().unwrap_or_else(|| default.to_string())
    }

    pub fn url(&self) -> Result<String, KvError> {
        if let Some(url) = self.redis.as_ref().and_then(|r| r.url.clone()) {
            return Ok(url);
        }

        match &self.ssdb {
            Some(ssdb) if !ssdb.host.is_empty() && ssdb.port > 0 => {
                Ok(format!("redis://{}:{}", ssdb.host, ssdb.port))
            }
            _ => Err(KvError::Config(
                "either Redis.Url or SSDB.Host/SSDB.Port must be set".to_string(),
            )),
        }
    }

    fn max_pool_size(&self) -> usize {
        let size = self
            .redis
            .as_ref()
            .map(|r| r.max_pool_size)
            .or_else(|| self.ssdb.as_ref().map(|s| s.max_pool_size))
            .unwrap_or(0);
        if size == 0 {
            16
        } else {
            size
        }
    }
}

/// Build a pool and check that the backing store answers a PING.
pub async fn create_pool(config: &RemoteConfig) -> Result<Pool, KvError> {
    let mut cfg = Config::from_url(config.url()?);
    cfg.pool = Some(PoolConfig::new(config.max_pool_size()));

    let pool = cfg.create_pool(Some(Runtime::Tokio1))?;

    let mut conn = pool.get().await?;
    let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    if pong != "PONG" {
        return Err(KvError::Config(format!("unexpected PING reply: {pong}")));
    }

    tracing::debug!("Connected to remote store at {}", config.url()?);
    Ok(pool)
}
