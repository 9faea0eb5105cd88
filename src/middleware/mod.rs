pub mod csrf;
pub mod debug;
pub mod trace;

pub use csrf::{
    csrf_middleware, generate_token, validate_token, CsrfConfig, CsrfConfigError, CsrfCookie,
    CsrfGuard, CsrfToken, TokenSource,
};
pub use debug::{request_dump, DumpOptions};
pub use trace::trace_layer;
