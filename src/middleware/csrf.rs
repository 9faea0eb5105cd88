use std::{sync::Arc, time::Duration};

use axum::{
    body::{self, Body},
    extract::{FromRequestParts, Request, State},
    http::{
        header::{HeaderName, CONTENT_TYPE},
        request::Parts,
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::session::{tracker::append_cookie, Session};

type HmacSha1 = Hmac<Sha1>;

pub const DEFAULT_TOKEN_NAME: &str = "X-CSRF";
pub const DEFAULT_COOKIE_NAME: &str = "_csrf";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
pub const MIN_SECRET_LEN: usize = 16;

/// Tokens stamped further than this into the future are refused.
const CLOCK_SKEW_NANOS: i64 = 60 * 1_000_000_000;
/// Upper bound on a urlencoded body buffered while looking for the token.
const MAX_FORM_BYTES: usize = 2 * 1024 * 1024;

/// Where unsafe requests carry their token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenSource {
    /// A request header named after `CsrfConfig::name`. Safe requests get
    /// the token echoed in the same header.
    #[default]
    Header,
    /// A query or urlencoded body field named after `CsrfConfig::name`.
    /// Safe requests expose the token as a [`CsrfToken`] extension.
    Form,
}

#[derive(Debug, Clone)]
pub struct CsrfCookie {
    pub name: String,
    pub path: String,
    pub domain: String,
    pub secure: bool,
}

impl Default for CsrfCookie {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            path: "/".to_string(),
            domain: String::new(),
            secure: false,
        }
    }
}

#[derive(Clone)]
pub struct CsrfConfig {
    pub from: TokenSource,
    pub name: String,
    pub cookie: CsrfCookie,
    pub secret: Vec<u8>,
    pub timeout: Duration,
}

impl std::fmt::Debug for CsrfConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfConfig")
            .field("from", &self.from)
            .field("name", &self.name)
            .field("cookie", &self.cookie)
            .field("secret", &"[redacted]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CsrfConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            from: TokenSource::default(),
            name: DEFAULT_TOKEN_NAME.to_string(),
            cookie: CsrfCookie::default(),
            secret: secret.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CsrfConfigError {
    #[error("csrf: secret must be at least 16 bytes, got {0}")]
    SecretTooShort(usize),

    #[error("csrf: token name must not be empty")]
    EmptyName,

    #[error("csrf: '{0}' is not a valid header name")]
    InvalidHeaderName(String),

    #[error("csrf: cookie name and path must be set")]
    IncompleteCookie,

    #[error("csrf: timeout must be positive")]
    ZeroTimeout,
}

pub type CsrfErrorHandler = Arc<dyn Fn() -> Response + Send + Sync>;

fn default_error_handler() -> Response {
    (StatusCode::FORBIDDEN, "csrf : bad token").into_response()
}

fn sign(secret: &[u8], session_id: &str, issued_nanos: i64) -> Vec<u8> {
    let Ok(mut mac) = HmacSha1::new_from_slice(secret) else {
        return Vec::new();
    };
    mac.update(format!("{}:{}", session_id, issued_nanos).as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Token bound to `session_id`, issued at `issued_at`.
pub fn generate_token(secret: &[u8], session_id: &str, issued_at: DateTime<Utc>) -> String {
    let nanos = issued_at.timestamp_nanos_opt().unwrap_or_default();

    let mut raw = sign(secret, session_id, nanos);
    raw.push(b':');
    raw.extend_from_slice(nanos.to_string().as_bytes());

    URL_SAFE.encode(raw)
}

/// Check a token for `session_id` as of `now`.
///
/// Valid tokens were issued less than `timeout` ago and not more than a
/// minute in the future.
pub fn validate_token(
    token: &str,
    secret: &[u8],
    session_id: &str,
    timeout: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Ok(raw) = URL_SAFE.decode(token) else {
        return false;
    };
    // the signature is binary and may contain ':'; the timestamp never does
    let Some(split) = raw.iter().rposition(|&b| b == b':') else {
        return false;
    };
    let (signature, stamp) = (&raw[..split], &raw[split + 1..]);

    let Some(issued) = std::str::from_utf8(stamp)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
    else {
        return false;
    };
    let Some(now) = now.timestamp_nanos_opt() else {
        return false;
    };

    let timeout = i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX);
    if now.saturating_sub(issued) >= timeout {
        return false;
    }
    if issued > now.saturating_add(CLOCK_SKEW_NANOS) {
        return false;
    }

    if signature.is_empty() {
        return false;
    }

    // compare the whole token so the timestamp has exactly one encoding
    let expected = generate_token(secret, session_id, DateTime::from_timestamp_nanos(issued));
    expected.as_bytes().ct_eq(token.as_bytes()).into()
}

/// Validated CSRF settings plus the response used for rejections.
pub struct CsrfGuard {
    config: CsrfConfig,
    header: Option<HeaderName>,
    error_handler: CsrfErrorHandler,
}

impl CsrfGuard {
    pub fn new(config: CsrfConfig) -> Result<Self, CsrfConfigError> {
        if config.secret.len() < MIN_SECRET_LEN {
            return Err(CsrfConfigError::SecretTooShort(config.secret.len()));
        }
        if config.name.is_empty() {
            return Err(CsrfConfigError::EmptyName);
        }
        if config.cookie.name.is_empty() || config.cookie.path.is_empty() {
            return Err(CsrfConfigError::IncompleteCookie);
        }
        if config.timeout.is_zero() {
            return Err(CsrfConfigError::ZeroTimeout);
        }

        let header = match config.from {
            TokenSource::Header => Some(
                HeaderName::from_bytes(config.name.as_bytes())
                    .map_err(|_| CsrfConfigError::InvalidHeaderName(config.name.clone()))?,
            ),
            TokenSource::Form => None,
        };

        Ok(Self {
            config,
            header,
            error_handler: Arc::new(default_error_handler),
        })
    }

    /// Replace the default `403 csrf : bad token` response.
    pub fn with_error_handler(
        mut self,
        handler: impl Fn() -> Response + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    pub fn generate(&self, session_id: &str) -> String {
        generate_token(&self.config.secret, session_id, Utc::now())
    }

    pub fn validate(&self, token: &str, session_id: &str) -> bool {
        validate_token(
            token,
            &self.config.secret,
            session_id,
            self.config.timeout,
            Utc::now(),
        )
    }

    fn token_cookie(&self, value: String) -> Cookie<'static> {
        let cookie = &self.config.cookie;
        let mut built = Cookie::build((cookie.name.clone(), value))
            .path(cookie.path.clone())
            .secure(cookie.secure)
            .http_only(true)
            .build();
        if !cookie.domain.is_empty() {
            built.set_domain(cookie.domain.clone());
        }
        built
    }

    fn cookie_token(&self, headers: &HeaderMap) -> Option<String> {
        CookieJar::from_headers(headers)
            .get(&self.config.cookie.name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }

    async fn issue(&self, session: &Session, mut request: Request, next: Next) -> Response {
        let reusable = self
            .cookie_token(request.headers())
            .filter(|token| self.validate(token, session.id()));

        let (token, fresh) = match reusable {
            Some(token) => (token, false),
            None => (self.generate(session.id()), true),
        };

        request.extensions_mut().insert(CsrfToken(token.clone()));
        let mut response = next.run(request).await;

        if fresh {
            let mut cookie = self.token_cookie(token.clone());
            let max_age = i64::try_from(self.config.timeout.as_secs()).unwrap_or(i64::MAX);
            cookie.set_max_age(time::Duration::seconds(max_age));
            append_cookie(response.headers_mut(), &cookie);
            debug!("Issued new CSRF token");
        }

        if let Some(header) = &self.header {
            match HeaderValue::from_str(&token) {
                Ok(value) => {
                    response.headers_mut().insert(header.clone(), value);
                }
                Err(e) => error!("Cannot echo CSRF token: {}", e),
            }
        }

        response
    }

    /// Pull the submitted token out of the request. Buffered form bodies are
    /// put back so handlers can still read them.
    async fn submitted_token(&self, request: Request) -> (Option<String>, Request) {
        if let Some(header) = &self.header {
            let token = request
                .headers()
                .get(header)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(String::from);
            return (token, request);
        }

        if let Some(token) = request
            .uri()
            .query()
            .and_then(|query| self.form_field(query.as_bytes()))
        {
            return (Some(token), request);
        }

        let is_form = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if !is_form {
            return (None, request);
        }

        let (parts, body) = request.into_parts();
        match body::to_bytes(body, MAX_FORM_BYTES).await {
            Ok(bytes) => {
                let token = self.form_field(&bytes);
                (token, Request::from_parts(parts, Body::from(bytes)))
            }
            Err(e) => {
                warn!("Failed to read form body for CSRF token: {}", e);
                (None, Request::from_parts(parts, Body::empty()))
            }
        }
    }

    fn form_field(&self, encoded: &[u8]) -> Option<String> {
        form_urlencoded::parse(encoded)
            .find(|(key, _)| key == self.config.name.as_str())
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }

    fn reject(&self, had_cookie: bool) -> Response {
        let mut response = (self.error_handler)();
        if had_cookie {
            let mut cookie = self.token_cookie(String::new());
            cookie.set_max_age(time::Duration::ZERO);
            append_cookie(response.headers_mut(), &cookie);
        }
        response
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Issue tokens on safe requests and require a valid one on everything else.
///
/// Must run inside the session middleware; the token is bound to the
/// session id.
pub async fn csrf_middleware(
    State(guard): State<Arc<CsrfGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(session) = request.extensions().get::<Session>().cloned() else {
        error!("CSRF middleware used without a session");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "session middleware is not installed",
        )
            .into_response();
    };

    if is_safe(request.method()) {
        return guard.issue(&session, request, next).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let had_cookie = guard.cookie_token(request.headers()).is_some();

    let (token, request) = guard.submitted_token(request).await;
    let Some(token) = token else {
        warn!("No CSRF token for {} {}", method, path);
        return guard.reject(had_cookie);
    };

    if !guard.validate(&token, session.id()) {
        warn!("Invalid CSRF token for {} {}", method, path);
        return guard.reject(had_cookie);
    }

    next.run(request).await
}

/// Token for the current request, available after [`csrf_middleware`] ran on
/// a safe request. Templates embed it in forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

impl CsrfToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CsrfToken
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<CsrfToken>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "csrf token is not available for this request",
        ))
    }
}
