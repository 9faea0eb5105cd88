use std::env;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use time::Duration;
use tracing::warn;

use crate::session::{CookieTracker, SameSite, Sha1Generator};

const DEFAULT_SECRET_LEN: usize = 64;

/// Cookie tracker settings for the current `ENVIRONMENT`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secure: bool,
    pub same_site: SameSite,
    pub expiry: Duration,
    pub name: String,
    pub path: String,
    pub domain: String,
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let environment = current_environment();
        let is_production = environment == "production";

        let domain = env::var("SESSION_DOMAIN").unwrap_or_default();
        if is_production {
            SessionConfig {
                secure: true,
                same_site: SameSite::Strict,
                expiry: Duration::hours(2),
                // __Host- cookies may not carry a domain
                name: "__Host-session".to_string(),
                path: "/".to_string(),
                domain: String::new(),
            }
        } else {
            SessionConfig {
                secure: false,
                same_site: SameSite::Lax,
                expiry: Duration::days(7),
                name: "session".to_string(),
                path: "/".to_string(),
                domain,
            }
        }
    }

    pub fn tracker(&self) -> CookieTracker {
        CookieTracker::new(
            &self.name,
            self.expiry.whole_seconds(),
            self.secure,
            &self.path,
            &self.domain,
        )
        .with_same_site(self.same_site)
    }

    /// Id generator keyed with `SESSION_SECRET`.
    pub fn generator(&self) -> Sha1Generator {
        Sha1Generator::new(hex::encode(load_session_secret()))
    }
}

/// Refuse to start a production process with insecure settings.
pub fn validate_production_config() {
    if current_environment() != "production" {
        return;
    }

    if !env_flag_enabled("FORCE_HTTPS") {
        panic!("FATAL: Production environment requires HTTPS. Set FORCE_HTTPS=true");
    }

    for key in ["SESSION_SECRET", "CSRF_SECRET"] {
        let Ok(secret) = env::var(key) else {
            panic!("FATAL: {} must be set in production", key);
        };

        if decode_secret_bytes(&secret).len() < DEFAULT_SECRET_LEN {
            panic!("FATAL: {} must be at least 64 bytes in production", key);
        }

        let lowered = secret.to_ascii_lowercase();
        if lowered.contains("example") || lowered.contains("changeme") || lowered.contains("default")
        {
            panic!(
                "FATAL: {} appears to be a default value. Generate a secure secret!",
                key
            );
        }
    }
}

pub(crate) fn current_environment() -> String {
    env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

pub(crate) fn is_production() -> bool {
    current_environment() == "production"
}

pub(crate) fn env_flag_enabled(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

/// Bytes of `SESSION_SECRET`, or a random key when it is unset.
pub fn load_session_secret() -> Vec<u8> {
    load_secret("SESSION_SECRET")
}

pub(crate) fn load_secret(key: &str) -> Vec<u8> {
    match env::var(key) {
        Ok(secret) if !secret.is_empty() => decode_secret_bytes(&secret),
        _ => {
            warn!("{} not set; generating ephemeral key (development only)", key);
            random_secret()
        }
    }
}

fn random_secret() -> Vec<u8> {
    let mut bytes = vec![0u8; DEFAULT_SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Secrets may be given base64-encoded or as raw text.
pub fn decode_secret_bytes(secret: &str) -> Vec<u8> {
    STANDARD
        .decode(secret.as_bytes())
        .unwrap_or_else(|_| secret.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_secret_bytes() {
        assert_eq!(decode_secret_bytes(&STANDARD.encode([7u8; 8])), vec![7u8; 8]);
        assert_eq!(decode_secret_bytes("not base64!"), b"not base64!".to_vec());
    }

    #[test]
    fn test_random_secret_length() {
        let a = random_secret();
        assert_eq!(a.len(), DEFAULT_SECRET_LEN);
        assert_ne!(a, random_secret());
    }

    #[test]
    fn test_tracker_uses_expiry_as_max_age() {
        let config = SessionConfig {
            secure: true,
            same_site: SameSite::Strict,
            expiry: Duration::hours(2),
            name: "sid".to_string(),
            path: "/app".to_string(),
            domain: String::new(),
        };
        let tracker = config.tracker();
        assert_eq!(tracker.max_age, 7200);
        assert_eq!(tracker.name, "sid");
        assert_eq!(tracker.path, "/app");
        assert!(tracker.secure);
        assert_eq!(tracker.same_site, Some(SameSite::Strict));
    }
}
