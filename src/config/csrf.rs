use std::{env, time::Duration};

use super::{
    session::{is_production, load_secret},
    ConfigError,
};
use crate::middleware::csrf::{CsrfConfig, TokenSource};

/// Build the CSRF guard config from `CSRF_SECRET` and the optional
/// `CSRF_FROM` (`header` or `form`) and `CSRF_TIMEOUT_SECS`.
///
/// In production a missing secret is an error; elsewhere an ephemeral one
/// is generated, so tokens do not survive a restart.
pub fn csrf_config_from_env() -> Result<CsrfConfig, ConfigError> {
    if is_production() && env::var("CSRF_SECRET").map_or(true, |s| s.is_empty()) {
        return Err(ConfigError::Missing("CSRF_SECRET"));
    }

    let mut config = CsrfConfig::new(load_secret("CSRF_SECRET"));
    config.cookie.secure = is_production();

    if let Ok(from) = env::var("CSRF_FROM") {
        config.from = parse_source(&from)?;
    }

    if let Ok(timeout) = env::var("CSRF_TIMEOUT_SECS") {
        let secs = timeout
            .parse::<u64>()
            .map_err(|e| ConfigError::Invalid {
                key: "CSRF_TIMEOUT_SECS",
                reason: e.to_string(),
            })?;
        config.timeout = Duration::from_secs(secs);
    }

    Ok(config)
}

fn parse_source(value: &str) -> Result<TokenSource, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "header" => Ok(TokenSource::Header),
        "form" => Ok(TokenSource::Form),
        other => Err(ConfigError::Invalid {
            key: "CSRF_FROM",
            reason: format!("expected 'header' or 'form', got '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source() {
        assert_eq!(parse_source("header").unwrap(), TokenSource::Header);
        assert_eq!(parse_source("Form").unwrap(), TokenSource::Form);
        assert!(matches!(
            parse_source("cookie"),
            Err(ConfigError::Invalid { key: "CSRF_FROM", .. })
        ));
    }
}
