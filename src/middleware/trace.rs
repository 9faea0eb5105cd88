use std::sync::Arc;

use axum::http::Request;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    trace::{MakeSpan, TraceLayer},
};
use tracing::{info_span, Span};

/// Names every request span after the service that handled it.
#[derive(Debug, Clone)]
pub struct ServiceSpan {
    service: Arc<str>,
}

impl ServiceSpan {
    pub fn new(service: &str) -> Self {
        Self {
            service: Arc::from(service),
        }
    }
}

impl<B> MakeSpan<B> for ServiceSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        info_span!(
            "request",
            service = %self.service,
            method = %request.method(),
            uri = %request.uri(),
            version = ?request.version(),
        )
    }
}

pub type ServiceTraceLayer = TraceLayer<SharedClassifier<ServerErrorsAsFailures>, ServiceSpan>;

/// Request tracing for `service`. 5xx responses are reported as failures.
pub fn trace_layer(service: &str) -> ServiceTraceLayer {
    TraceLayer::new_for_http().make_span_with(ServiceSpan::new(service))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_layer_passes_responses_through() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(trace_layer("demo"));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_success());
    }
}
