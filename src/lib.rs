pub mod cache;
pub mod config;
pub mod error;
pub mod kv;
pub mod middleware;
pub mod openapi;
pub mod render;
pub mod session;
pub mod statistics;

// Make test_utils available for both unit tests and integration tests
pub mod test_utils;

use std::sync::Arc;

/// Shared handles the demo server's handlers read.
#[derive(Clone)]
pub struct AppState {
    pub cache: cache::SharedCache,
    pub templates: render::TemplateSet,
    pub theme: String,
    pub csrf_field: String,
    pub sessions: Arc<session::SessionManager>,
    pub statistics: Arc<statistics::UrlStatistics>,
}
