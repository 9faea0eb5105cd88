//! Serve an OpenAPI document together with a Swagger UI or Swagger Editor
//! page that loads it.

use std::path::PathBuf;

use askama::Template;
use askama_web::WebTemplate;
use axum::{routing::get, Router};
use tower_http::services::ServeFile;
use tracing::debug;

pub const DEFAULT_UI_URL: &str = "/docs/openapi-ui";
pub const DEFAULT_EDITOR_URL: &str = "/docs/openapi-editor";
pub const DEFAULT_SPEC_URL: &str = "/docs/openapi";
pub const DEFAULT_SPEC_FILE: &str = "openapi.yaml";

/// Empty fields take the defaults above.
#[derive(Debug, Clone, Default)]
pub struct OpenApiOptions {
    /// Where the viewer/editor page is served.
    pub docs_url: String,
    /// Where the document itself is served.
    pub url: String,
    pub file: PathBuf,
}

impl OpenApiOptions {
    fn with_defaults(mut self, docs_url: &str) -> Self {
        if self.docs_url.is_empty() {
            self.docs_url = docs_url.to_string();
        }
        if self.url.is_empty() {
            self.url = DEFAULT_SPEC_URL.to_string();
        }
        if self.file.as_os_str().is_empty() {
            self.file = PathBuf::from(DEFAULT_SPEC_FILE);
        }
        self
    }
}

#[derive(Template, WebTemplate, Clone)]
#[template(path = "openapi/swagger_ui.html")]
struct SwaggerUiPage {
    url: String,
}

#[derive(Template, WebTemplate, Clone)]
#[template(path = "openapi/swagger_editor.html")]
struct SwaggerEditorPage {
    url: String,
}

fn spec_route(options: &OpenApiOptions) -> Router {
    debug!(
        "Serving {} at {}",
        options.file.display(),
        options.url
    );
    Router::new().route_service(&options.url, ServeFile::new(&options.file))
}

/// Routes for the document and a Swagger UI page.
pub fn swagger_ui(options: OpenApiOptions) -> Router {
    let options = options.with_defaults(DEFAULT_UI_URL);
    let page = SwaggerUiPage {
        url: options.url.clone(),
    };

    spec_route(&options).route(
        &options.docs_url,
        get(move || {
            let page = page.clone();
            async move { page }
        }),
    )
}

/// Routes for the document and a Swagger Editor page.
pub fn swagger_editor(options: OpenApiOptions) -> Router {
    let options = options.with_defaults(DEFAULT_EDITOR_URL);
    let page = SwaggerEditorPage {
        url: options.url.clone(),
    };

    spec_route(&options).route(
        &options.docs_url,
        get(move || {
            let page = page.clone();
            async move { page }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ui = OpenApiOptions::default().with_defaults(DEFAULT_UI_URL);
        assert_eq!(ui.docs_url, "/docs/openapi-ui");
        assert_eq!(ui.url, "/docs/openapi");
        assert_eq!(ui.file, PathBuf::from("openapi.yaml"));

        let editor = OpenApiOptions {
            url: "/spec".to_string(),
            ..OpenApiOptions::default()
        }
        .with_defaults(DEFAULT_EDITOR_URL);
        assert_eq!(editor.docs_url, "/docs/openapi-editor");
        assert_eq!(editor.url, "/spec");
    }

    #[test]
    fn test_pages_point_at_document() {
        let ui = SwaggerUiPage {
            url: "/docs/openapi".to_string(),
        }
        .render()
        .unwrap();
        assert!(ui.contains("url: '/docs/openapi'"));
        assert!(ui.contains("swagger-ui-bundle.js"));

        let editor = SwaggerEditorPage {
            url: "/spec".to_string(),
        }
        .render()
        .unwrap();
        assert!(editor.contains("url: '/spec'"));
        assert!(editor.contains("height: 100%;"));
    }
}
