use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use axum::{
    body::Body,
    http::{header, HeaderName, Request, StatusCode},
    middleware::from_fn_with_state,
    response::Response,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt; // for `oneshot`
use waterworks::{
    session::{
        session_middleware, HeaderTracker, MemoryStore, Session, SessionManager, SessionOptions,
        SessionStore, Sha1Generator,
    },
    test_utils::test_helpers::{cookie_header, memory_session_manager, set_cookie_value},
};

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct Cart {
    items: Vec<String>,
}

async fn add_item(session: Session) -> String {
    let mut cart: Cart = session.payload().unwrap().unwrap_or_default();
    cart.items.push(format!("item{}", cart.items.len() + 1));
    session.set_payload(&cart).unwrap();
    cart.items.join(",")
}

async fn whoami(session: Session) -> String {
    session.id().to_string()
}

async fn logout(session: Session) -> &'static str {
    session.destroy();
    "bye"
}

fn routes() -> Router<()> {
    Router::new()
        .route("/add", post(add_item))
        .route("/whoami", get(whoami))
        .route("/logout", post(logout))
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn request(method: &str, uri: &str, cookies: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookies) = cookies {
        builder = builder.header(header::COOKIE, cookies);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_payload_survives_between_requests() {
    let (manager, store) = memory_session_manager();
    let app = routes().layer(from_fn_with_state(manager, session_middleware));

    let first = app.clone().oneshot(request("POST", "/add", None)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let session_id = set_cookie_value(first.headers(), "session").expect("session cookie");
    let cookies = cookie_header(first.headers());
    assert_eq!(body_string(first).await, "item1");

    let second = app
        .clone()
        .oneshot(request("POST", "/add", Some(&cookies)))
        .await
        .unwrap();
    assert!(
        set_cookie_value(second.headers(), "session").is_none(),
        "known sessions are not re-issued"
    );
    assert_eq!(body_string(second).await, "item1,item2");

    let stored = store.get(&session_id).await.unwrap().expect("stored");
    assert!(stored.last_access.is_some());
    let cart: Cart = serde_json::from_value(stored.data.unwrap()).unwrap();
    assert_eq!(cart.items, vec!["item1", "item2"]);
}

#[tokio::test]
async fn test_cookie_attributes() {
    let (manager, _store) = memory_session_manager();
    let app = routes().layer(from_fn_with_state(manager, session_middleware));

    let response = app.oneshot(request("GET", "/whoami", None)).await.unwrap();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();

    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("Max-Age="));
    assert!(!cookie.contains("Secure"));

    let id = body_string(response).await;
    assert_eq!(id.len(), 27);
    assert!(cookie.starts_with(&format!("session={}", id)));
}

#[tokio::test]
async fn test_invalid_id_gets_a_fresh_session() {
    let (manager, _store) = memory_session_manager();
    let app = routes().layer(from_fn_with_state(manager, session_middleware));

    let response = app
        .oneshot(request("GET", "/whoami", Some("session=too-short")))
        .await
        .unwrap();

    let issued = set_cookie_value(response.headers(), "session").expect("new id issued");
    assert_ne!(issued, "too-short");
    assert_eq!(body_string(response).await, issued);
}

#[tokio::test]
async fn test_destroy_removes_data_and_cookie() {
    let (manager, store) = memory_session_manager();
    let app = routes().layer(from_fn_with_state(manager, session_middleware));

    let first = app.clone().oneshot(request("POST", "/add", None)).await.unwrap();
    let session_id = set_cookie_value(first.headers(), "session").unwrap();
    let cookies = cookie_header(first.headers());
    assert!(store.get(&session_id).await.unwrap().is_some());

    let response = app
        .oneshot(request("POST", "/logout", Some(&cookies)))
        .await
        .unwrap();

    let cleared = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(cleared.starts_with("session=;"));
    assert!(cleared.contains("Max-Age=0"));
    assert!(store.get(&session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_header_tracker_round_trip() {
    let name = HeaderName::from_static("x-session");
    let manager = Arc::new(SessionManager::new(SessionOptions::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Sha1Generator::new("api")),
        Arc::new(HeaderTracker::new(name.clone())),
    )));
    let app = routes().layer(from_fn_with_state(manager, session_middleware));

    let first = app.clone().oneshot(request("POST", "/add", None)).await.unwrap();
    let id = first
        .headers()
        .get(&name)
        .and_then(|v| v.to_str().ok())
        .expect("id echoed in header")
        .to_string();
    assert!(first.headers().get(header::SET_COOKIE).is_none());

    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/add")
                .header(&name, &id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(second.headers().get(&name).is_none());
    assert_eq!(body_string(second).await, "item1,item2");
}

#[tokio::test]
async fn test_lifecycle_callbacks() {
    let created = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));

    let options = SessionOptions::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Sha1Generator::new("callbacks")),
        Arc::new(waterworks::session::CookieTracker::default()),
    )
    .on_session_new({
        let created = created.clone();
        move |_| {
            created.fetch_add(1, Ordering::SeqCst);
        }
    })
    .on_session_release({
        let released = released.clone();
        move |_| {
            released.fetch_add(1, Ordering::SeqCst);
        }
    });
    let manager = Arc::new(SessionManager::new(options));
    let app = routes().layer(from_fn_with_state(manager, session_middleware));

    let first = app.clone().oneshot(request("GET", "/whoami", None)).await.unwrap();
    let cookies = cookie_header(first.headers());
    app.oneshot(request("GET", "/whoami", Some(&cookies)))
        .await
        .unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_session_extractor_without_middleware() {
    let app = routes();

    let response = app.oneshot(request("GET", "/whoami", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
