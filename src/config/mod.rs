//! Process-level configuration read from the environment (after `dotenvy`
//! has loaded any `.env` file).

pub mod csrf;
pub mod session;

use thiserror::Error;

use crate::middleware::CsrfConfigError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error(transparent)]
    Csrf(#[from] CsrfConfigError),
}
