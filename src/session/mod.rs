//! Per-client sessions: an id carried by a [`Tracker`], a JSON payload kept in
//! a [`SessionStore`], and hooks fired when a session starts and when it is
//! written back.

pub mod generator;
pub mod redis_store;
pub mod store;
pub mod tracker;

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

pub use axum_extra::extract::cookie::SameSite;
pub use generator::{IdGenerator, Sha1Generator};
pub use redis_store::RedisStore;
pub use store::{MemoryStore, SessionStore};
pub use tracker::{CookieTracker, HeaderTracker, Tracker};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session: payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session: tracker error: {0}")]
    Tracker(String),

    #[error("session: store error: {0}")]
    Backend(#[from] crate::kv::KvError),
}

impl From<deadpool_redis::redis::RedisError> for SessionError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        SessionError::Backend(err.into())
    }
}

impl From<deadpool_redis::PoolError> for SessionError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        SessionError::Backend(err.into())
    }
}

/// Session data as it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_access: Option<DateTime<Utc>>,
    /// Set for new containers and on every payload write. Stores that care
    /// about write volume skip containers where it is false.
    #[serde(skip)]
    pub changed: bool,
}

impl Container {
    pub fn new() -> Self {
        Self {
            data: None,
            created_at: Utc::now(),
            last_access: None,
            changed: true,
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

pub type SessionCallback = Arc<dyn Fn(&Session) + Send + Sync>;

pub struct SessionOptions {
    pub store: Arc<dyn SessionStore>,
    pub generator: Arc<dyn IdGenerator>,
    pub tracker: Arc<dyn Tracker>,
    pub on_session_new: Option<SessionCallback>,
    pub on_session_release: Option<SessionCallback>,
}

impl SessionOptions {
    pub fn new(
        store: Arc<dyn SessionStore>,
        generator: Arc<dyn IdGenerator>,
        tracker: Arc<dyn Tracker>,
    ) -> Self {
        Self {
            store,
            generator,
            tracker,
            on_session_new: None,
            on_session_release: None,
        }
    }

    pub fn on_session_new(mut self, callback: impl Fn(&Session) + Send + Sync + 'static) -> Self {
        self.on_session_new = Some(Arc::new(callback));
        self
    }

    pub fn on_session_release(
        mut self,
        callback: impl Fn(&Session) + Send + Sync + 'static,
    ) -> Self {
        self.on_session_release = Some(Arc::new(callback));
        self
    }
}

pub struct SessionManager {
    options: SessionOptions,
}

impl SessionManager {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.options.store
    }

    /// Resolve the session for an incoming request. The flag is true when a
    /// new id was issued and still has to be handed to the client.
    pub async fn start(
        self: &Arc<Self>,
        headers: &HeaderMap,
        remote_addr: Option<&str>,
    ) -> (Session, bool) {
        let presented = self.options.tracker.get(headers).unwrap_or_else(|e| {
            warn!("{}", e);
            None
        });

        let existing = presented.filter(|id| self.options.generator.is_valid(id));

        let Some(id) = existing else {
            let id = self.options.generator.generate(remote_addr);
            let session = Session::new(Arc::clone(self), id, Container::new());
            debug!("Started new session");
            if let Some(callback) = &self.options.on_session_new {
                callback(&session);
            }
            return (session, true);
        };

        let container = match self.options.store.get(&id).await {
            Ok(Some(container)) => container,
            Ok(None) => {
                debug!("Session expired or unknown, starting with an empty container");
                Container::new()
            }
            Err(e) => {
                error!("Failed to load session: {}", e);
                Container::new()
            }
        };

        (Session::new(Arc::clone(self), id, container), false)
    }

    /// Persist (or destroy) the session once the handler is done.
    pub async fn release(&self, session: &Session, headers: &mut HeaderMap, issued: bool) {
        if session.is_destroyed() {
            if let Err(e) = self.options.store.del(session.id()).await {
                warn!("Failed to delete destroyed session: {}", e);
            }
            self.options.tracker.clear(headers);
            return;
        }

        if issued {
            self.options.tracker.set(headers, session.id());
        }

        let container = session.touch();
        if let Err(e) = self.options.store.set(session.id(), &container).await {
            error!("Failed to save session: {}", e);
            return;
        }

        if let Some(callback) = &self.options.on_session_release {
            callback(session);
        }
    }
}

struct SessionInner {
    id: String,
    container: Mutex<Container>,
    destroyed: AtomicBool,
    manager: Arc<SessionManager>,
}

/// Handle to the current request's session. Clones share the same container.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("container", &*self.inner.container.lock())
            .finish()
    }
}

impl Session {
    fn new(manager: Arc<SessionManager>, id: String, container: Container) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                container: Mutex::new(container),
                destroyed: AtomicBool::new(false),
                manager,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<Option<T>, SessionError> {
        let container = self.inner.container.lock();
        match &container.data {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn set_payload<T: Serialize>(&self, payload: &T) -> Result<(), SessionError> {
        let value = serde_json::to_value(payload)?;
        let mut container = self.inner.container.lock();
        container.data = Some(value);
        container.changed = true;
        Ok(())
    }

    pub fn clear_payload(&self) {
        let mut container = self.inner.container.lock();
        container.data = None;
        container.changed = true;
    }

    /// Copy of the container as it stands now.
    pub fn container(&self) -> Container {
        self.inner.container.lock().clone()
    }

    /// Drop the stored data and the client's id when the request completes.
    pub fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    fn touch(&self) -> Container {
        let mut container = self.inner.container.lock();
        container.last_access = Some(Utc::now());
        container.clone()
    }

    /// Load another session's container; a missing one comes back empty.
    pub async fn get(&self, id: &str) -> Container {
        match self.inner.manager.store().get(id).await {
            Ok(Some(container)) => container,
            Ok(None) => Container::new(),
            Err(e) => {
                warn!("Failed to load session: {}", e);
                Container::new()
            }
        }
    }

    pub async fn set(&self, id: &str, container: &Container) -> Result<(), SessionError> {
        self.inner.manager.store().set(id, container).await
    }

    pub async fn del(&self, id: &str) -> Result<(), SessionError> {
        self.inner.manager.store().del(id).await
    }

    pub async fn flush(&self) -> Result<(), SessionError> {
        self.inner.manager.store().flush().await
    }
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Session>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "session middleware is not installed",
        ))
    }
}

/// Attach a [`Session`] to every request and write it back afterwards.
pub async fn session_middleware(
    State(manager): State<Arc<SessionManager>>,
    mut request: Request,
    next: Next,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    let (session, issued) = manager
        .start(request.headers(), remote_addr.as_deref())
        .await;
    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    manager
        .release(&session, response.headers_mut(), issued)
        .await;
    response
}
