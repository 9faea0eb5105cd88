use axum::{
    body::{self, Body},
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

/// Largest body the dump will buffer.
const MAX_DUMP_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct DumpOptions {
    /// Include the request body. The body is buffered and handed on intact.
    pub body: bool,
}

fn dump_head(request: &Request) -> String {
    let mut dump = format!(
        "{} {} {:?}\n",
        request.method(),
        request.uri(),
        request.version()
    );
    for (name, value) in request.headers() {
        dump.push_str(name.as_str());
        dump.push_str(": ");
        dump.push_str(value.to_str().unwrap_or("<binary>"));
        dump.push('\n');
    }
    dump
}

/// Log every incoming request at debug level.
pub async fn request_dump(
    State(options): State<DumpOptions>,
    request: Request,
    next: Next,
) -> Response {
    let mut dump = dump_head(&request);

    let request = if options.body {
        let (parts, body) = request.into_parts();
        let bytes = match body::to_bytes(body, MAX_DUMP_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
            }
        };
        dump.push('\n');
        dump.push_str(&String::from_utf8_lossy(&bytes));
        Request::from_parts(parts, Body::from(bytes))
    } else {
        request
    };

    debug!("request in:\n{}", dump);
    next.run(request).await
}
