use axum::http::{
    header::{HeaderName, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::{Duration, OffsetDateTime};
use tracing::warn;

use super::SessionError;

/// Fallback lifetime for cookies configured with a non-positive max-age.
const HUNDRED_YEARS_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Carries the session id between client and server.
pub trait Tracker: Send + Sync {
    /// Id presented by the client, if any.
    fn get(&self, headers: &HeaderMap) -> Result<Option<String>, SessionError>;
    /// Hand `id` to the client on the response.
    fn set(&self, headers: &mut HeaderMap, id: &str);
    /// Tell the client to forget its id.
    fn clear(&self, headers: &mut HeaderMap);
}

#[derive(Debug, Clone)]
pub struct CookieTracker {
    pub name: String,
    pub max_age: i64,
    pub secure: bool,
    pub path: String,
    pub domain: String,
    pub same_site: Option<SameSite>,
}

impl CookieTracker {
    pub fn new(name: &str, max_age: i64, secure: bool, path: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            max_age: if max_age < 1 {
                HUNDRED_YEARS_SECS
            } else {
                max_age
            },
            secure,
            path: path.to_string(),
            domain: domain.to_string(),
            same_site: None,
        }
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    fn cookie(&self, value: String) -> Cookie<'static> {
        let mut cookie = Cookie::build((self.name.clone(), value))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(true)
            .build();
        if !self.domain.is_empty() {
            cookie.set_domain(self.domain.clone());
        }
        if let Some(same_site) = self.same_site {
            cookie.set_same_site(same_site);
        }
        cookie
    }
}

impl Default for CookieTracker {
    fn default() -> Self {
        Self::new("session", 0, false, "/", "")
    }
}

pub(crate) fn append_cookie(headers: &mut HeaderMap, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(e) => warn!("Refusing to write malformed cookie '{}': {}", cookie.name(), e),
    }
}

impl Tracker for CookieTracker {
    fn get(&self, headers: &HeaderMap) -> Result<Option<String>, SessionError> {
        let jar = CookieJar::from_headers(headers);
        Ok(jar
            .get(&self.name)
            .map(|cookie| cookie.value().to_string())
            .filter(|value| !value.is_empty()))
    }

    fn set(&self, headers: &mut HeaderMap, id: &str) {
        let mut cookie = self.cookie(id.to_string());
        cookie.set_max_age(Duration::seconds(self.max_age));
        append_cookie(headers, &cookie);
    }

    fn clear(&self, headers: &mut HeaderMap) {
        // path and domain must match the original cookie for the browser to drop it
        let mut cookie = self.cookie(String::new());
        cookie.set_max_age(Duration::ZERO);
        cookie.set_expires(OffsetDateTime::UNIX_EPOCH);
        append_cookie(headers, &cookie);
    }
}

/// Reads the id from a request header and echoes it in the same response
/// header. Suited to API clients that manage the id themselves.
#[derive(Debug, Clone)]
pub struct HeaderTracker {
    pub name: HeaderName,
}

impl HeaderTracker {
    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }
}

impl Tracker for HeaderTracker {
    fn get(&self, headers: &HeaderMap) -> Result<Option<String>, SessionError> {
        let Some(value) = headers.get(&self.name) else {
            return Ok(None);
        };
        let value = value
            .to_str()
            .map_err(|e| SessionError::Tracker(format!("header {}: {}", self.name, e)))?;

        Ok(Some(value.to_string()).filter(|v| !v.is_empty()))
    }

    fn set(&self, headers: &mut HeaderMap, id: &str) {
        match HeaderValue::from_str(id) {
            Ok(value) => {
                headers.insert(self.name.clone(), value);
            }
            Err(e) => warn!("Cannot write session id header {}: {}", self.name, e),
        }
    }

    fn clear(&self, _headers: &mut HeaderMap) {}
}
