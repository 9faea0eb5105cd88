//! Cache middleware: a small get/put/incr/decr façade over interchangeable
//! backends, selected by name through a [`CacheRegistry`] built at startup.

pub mod memory;
pub mod redis;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use thiserror::Error;

pub use memory::MemoryCache;
pub use redis::RedisCache;
pub use registry::CacheRegistry;

/// Handle stored in request extensions by [`cache_middleware`].
pub type SharedCache = Arc<dyn Cache>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("key not exist")]
    KeyNotFound,

    #[error("value of key '{0}' is not a number")]
    NotNumeric(String),

    #[error("counter '{0}' would overflow")]
    Overflow(String),

    #[error("cache: unknown adapter '{0}'")]
    UnknownAdapter(String),

    #[error("cache: cannot register adapter '{0}' twice")]
    DuplicateAdapter(String),

    #[error("cache: adapter used before start_and_gc")]
    NotStarted,

    #[error("cache: invalid config: {0}")]
    Config(String),

    #[error("cache: backend error: {0}")]
    Backend(#[from] crate::kv::KvError),
}

impl From<deadpool_redis::redis::RedisError> for CacheError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        CacheError::Backend(err.into())
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        CacheError::Backend(err.into())
    }
}

/// A cached value. Only `Int` and `Uint` take part in `incr`/`decr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Int(i64),
    Uint(u64),
    Text(String),
    Bytes(Vec<u8>),
}

impl CacheValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheValue::Text(s) => Some(s),
            CacheValue::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CacheValue::Int(v) => Some(*v),
            CacheValue::Uint(v) => i64::try_from(*v).ok(),
            CacheValue::Text(s) => s.parse().ok(),
            CacheValue::Bytes(_) => None,
        }
    }

    /// Wire form used by remote backends. Numbers are written as decimal
    /// strings so the store's own INCRBY works on them.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            CacheValue::Int(v) => v.to_string().into_bytes(),
            CacheValue::Uint(v) => v.to_string().into_bytes(),
            CacheValue::Text(s) => s.clone().into_bytes(),
            CacheValue::Bytes(b) => b.clone(),
        }
    }

    /// Counterpart of [`CacheValue::to_bytes`]: UTF-8 comes back as text,
    /// anything else as raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(s) => CacheValue::Text(s),
            Err(e) => CacheValue::Bytes(e.into_bytes()),
        }
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Text(value.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Text(value)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(value: Vec<u8>) -> Self {
        CacheValue::Bytes(value)
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for CacheValue {
            fn from(value: $t) -> Self {
                CacheValue::Int(i64::from(value))
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for CacheValue {
            fn from(value: $t) -> Self {
                CacheValue::Uint(u64::from(value))
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64);
impl_from_unsigned!(u8, u16, u32, u64);

/// Operations every cache backend provides.
///
/// `ttl_secs == 0` means the entry never expires by time; it only goes away
/// on `delete` or `flush`.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn put(&self, key: &str, value: CacheValue, ttl_secs: u64) -> Result<(), CacheError>;
    async fn get(&self, key: &str) -> Option<CacheValue>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn incr(&self, key: &str) -> Result<(), CacheError>;
    async fn decr(&self, key: &str) -> Result<(), CacheError>;
    async fn is_exist(&self, key: &str) -> bool;
    async fn flush(&self) -> Result<(), CacheError>;
    /// Apply the backend's JSON config and start any background work.
    async fn start_and_gc(&self, config: &str) -> Result<(), CacheError>;
}

/// Make the cache reachable from handlers via `Extension<SharedCache>`.
pub async fn cache_middleware(
    State(cache): State<SharedCache>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(cache);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(CacheValue::from(5i32), CacheValue::Int(5));
        assert_eq!(CacheValue::from(5u32), CacheValue::Uint(5));
        assert_eq!(CacheValue::from("hi"), CacheValue::Text("hi".to_string()));
        assert_eq!(CacheValue::Text("42".into()).as_i64(), Some(42));
        assert_eq!(CacheValue::Uint(u64::MAX).as_i64(), None);
    }

    #[test]
    fn test_wire_form() {
        assert_eq!(CacheValue::Int(-3).to_bytes(), b"-3".to_vec());
        assert_eq!(
            CacheValue::from_bytes(b"unknwon".to_vec()),
            CacheValue::Text("unknwon".to_string())
        );
        assert_eq!(
            CacheValue::from_bytes(vec![0xff, 0xfe]),
            CacheValue::Bytes(vec![0xff, 0xfe])
        );
    }
}
