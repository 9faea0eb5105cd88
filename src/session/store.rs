use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Container, SessionError};

/// Where session containers live between requests.
///
/// `get` returns `Ok(None)` for ids that were never stored or have expired.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Container>, SessionError>;
    async fn set(&self, id: &str, container: &Container) -> Result<(), SessionError>;
    async fn del(&self, id: &str) -> Result<(), SessionError>;
    async fn flush(&self) -> Result<(), SessionError>;
}

/// Process-local store. Containers never expire on their own.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Container>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Container>, SessionError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id).map(|container| Container {
            changed: false,
            ..container.clone()
        }))
    }

    async fn set(&self, id: &str, container: &Container) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(id.to_string(), container.clone());
        Ok(())
    }

    async fn del(&self, id: &str) -> Result<(), SessionError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SessionError> {
        self.sessions.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryStore::new();
        assert!(store.get("missing").await.unwrap().is_none());

        let mut container = Container::new();
        container.data = Some(serde_json::json!({"name": "water"}));
        store.set("id1", &container).await.unwrap();
        store.set("id2", &Container::new()).await.unwrap();
        assert_eq!(store.len().await, 2);

        let loaded = store.get("id1").await.unwrap().unwrap();
        assert_eq!(loaded.data, container.data);
        assert!(!loaded.changed, "loaded containers start unchanged");

        store.del("id1").await.unwrap();
        assert!(store.get("id1").await.unwrap().is_none());

        store.flush().await.unwrap();
        assert!(store.is_empty().await);
    }
}
