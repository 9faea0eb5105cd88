use std::{collections::HashMap, env, sync::Arc};

use axum::{
    body::Body,
    http::{header, Request},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serial_test::serial;
use tower::ServiceExt;
use waterworks::{
    config::{
        csrf::csrf_config_from_env,
        session::{validate_production_config, SessionConfig},
        ConfigError,
    },
    middleware::TokenSource,
    session::{session_middleware, MemoryStore, Session, SessionManager, SessionOptions},
};

#[derive(Default)]
struct EnvGuard {
    original: HashMap<String, Option<String>>,
}

impl EnvGuard {
    fn set(&mut self, key: &str, value: impl Into<String>) {
        self.original
            .entry(key.to_string())
            .or_insert_with(|| env::var(key).ok());
        env::set_var(key, value.into());
    }

    fn remove(&mut self, key: &str) {
        self.original
            .entry(key.to_string())
            .or_insert_with(|| env::var(key).ok());
        env::remove_var(key);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.original.drain() {
            match value {
                Some(v) => env::set_var(&key, v),
                None => env::remove_var(&key),
            }
        }
    }
}

fn production_env(env_guard: &mut EnvGuard) {
    env_guard.set("ENVIRONMENT", "production");
    env_guard.set("FORCE_HTTPS", "true");
    env_guard.set("SESSION_SECRET", STANDARD.encode([42u8; 64]));
    env_guard.set("CSRF_SECRET", STANDARD.encode([7u8; 64]));
}

async fn issued_cookie(config: &SessionConfig) -> Cookie<'static> {
    let manager = Arc::new(SessionManager::new(SessionOptions::new(
        Arc::new(MemoryStore::new()),
        Arc::new(config.generator()),
        Arc::new(config.tracker()),
    )));

    async fn touch(session: Session) -> &'static str {
        session.set_payload(&"csrf").unwrap();
        "ok"
    }

    let app = Router::new()
        .route("/", get(touch))
        .layer(from_fn_with_state(manager, session_middleware));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .body(Body::empty())
                .expect("request to build"),
        )
        .await
        .expect("router to respond");

    let cookie_header = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("session cookie to be issued")
        .to_str()
        .expect("cookie header to be valid ASCII")
        .to_string();

    Cookie::parse(cookie_header).expect("cookie header to parse correctly")
}

#[tokio::test]
#[serial]
async fn session_cookie_flags_are_secure_in_production() {
    let mut env_guard = EnvGuard::default();
    production_env(&mut env_guard);

    validate_production_config();

    let cookie = issued_cookie(&SessionConfig::from_env()).await;

    assert_eq!(cookie.name(), "__Host-session", "cookie name should be hardened");
    assert_eq!(cookie.http_only(), Some(true), "HttpOnly flag must be set");
    assert_eq!(cookie.secure(), Some(true), "Secure flag must be enabled");
    assert_eq!(cookie.same_site(), Some(SameSite::Strict));
    assert_eq!(
        cookie.path().unwrap_or("/"),
        "/",
        "cookie path must be root for __Host- prefix"
    );
    assert_eq!(cookie.domain(), None, "__Host- cookies carry no domain");
    assert_eq!(
        cookie.max_age().map(|age| age.whole_seconds()),
        Some(2 * 60 * 60)
    );
}

#[tokio::test]
#[serial]
async fn session_cookie_is_relaxed_in_development() {
    let mut env_guard = EnvGuard::default();
    env_guard.remove("ENVIRONMENT");
    env_guard.remove("SESSION_SECRET");

    validate_production_config();

    let cookie = issued_cookie(&SessionConfig::from_env()).await;

    assert_eq!(cookie.name(), "session");
    assert_eq!(cookie.secure(), None);
    assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    assert_eq!(
        cookie.max_age().map(|age| age.whole_days()),
        Some(7),
        "development sessions last a week"
    );
}

#[test]
#[serial]
fn production_requires_https_flag() {
    let mut env_guard = EnvGuard::default();
    production_env(&mut env_guard);
    env_guard.remove("FORCE_HTTPS");

    let result = std::panic::catch_unwind(|| validate_production_config());
    assert!(result.is_err(), "FORCE_HTTPS must be enforced in production");
}

#[test]
#[serial]
fn production_rejects_weak_secrets() {
    let mut env_guard = EnvGuard::default();
    production_env(&mut env_guard);
    env_guard.set("SESSION_SECRET", "changeme");

    let result = std::panic::catch_unwind(|| validate_production_config());
    assert!(
        result.is_err(),
        "Weak or default session secrets must panic in production"
    );
}

#[test]
#[serial]
fn production_requires_csrf_secret() {
    let mut env_guard = EnvGuard::default();
    production_env(&mut env_guard);
    env_guard.remove("CSRF_SECRET");

    let result = std::panic::catch_unwind(|| validate_production_config());
    assert!(result.is_err(), "CSRF_SECRET must be set in production");
    assert!(matches!(
        csrf_config_from_env(),
        Err(ConfigError::Missing("CSRF_SECRET"))
    ));
}

#[test]
#[serial]
fn csrf_config_reads_environment() {
    let mut env_guard = EnvGuard::default();
    env_guard.remove("ENVIRONMENT");
    env_guard.set("CSRF_SECRET", "csrf secret, not base64!");
    env_guard.set("CSRF_FROM", "form");
    env_guard.set("CSRF_TIMEOUT_SECS", "600");

    let config = csrf_config_from_env().expect("valid csrf config");
    assert_eq!(config.secret, b"csrf secret, not base64!".to_vec());
    assert_eq!(config.from, TokenSource::Form);
    assert_eq!(config.timeout.as_secs(), 600);
    assert!(!config.cookie.secure);

    env_guard.set("CSRF_TIMEOUT_SECS", "soon");
    assert!(matches!(
        csrf_config_from_env(),
        Err(ConfigError::Invalid {
            key: "CSRF_TIMEOUT_SECS",
            ..
        })
    ));
}

#[test]
#[serial]
fn csrf_secret_is_generated_in_development() {
    let mut env_guard = EnvGuard::default();
    env_guard.remove("ENVIRONMENT");
    env_guard.remove("CSRF_SECRET");
    env_guard.remove("CSRF_FROM");
    env_guard.remove("CSRF_TIMEOUT_SECS");

    let config = csrf_config_from_env().expect("development falls back to a random secret");
    assert_eq!(config.secret.len(), 64);
    assert_eq!(config.from, TokenSource::Header);
}
