use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    cache::CacheError, config::ConfigError, middleware::CsrfConfigError, render::RenderError,
    session::SessionError,
};

// Type alias for Result with our AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors a handler built on the add-ons can bubble up with `?`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("CSRF configuration error: {0}")]
    Csrf(#[from] CsrfConfigError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Not found")]
    NotFound,

    #[error("Validation error: {0}")]
    Validation(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Render(err) => {
                tracing::error!("Template rendering failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            AppError::Cache(CacheError::KeyNotFound) => {
                (StatusCode::NOT_FOUND, "key not exist".to_string())
            }
            other => {
                tracing::error!("{}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, error_message).into_response()
    }
}
