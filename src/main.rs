use waterworks::{
    cache::{cache_middleware, CacheRegistry, CacheValue},
    config::{
        csrf::csrf_config_from_env,
        session::{validate_production_config, SessionConfig},
    },
    error::AppError,
    middleware::{csrf_middleware, request_dump, trace_layer, CsrfGuard, CsrfToken, DumpOptions},
    openapi::{self, OpenApiOptions},
    render::{RenderOptions, TemplateSet},
    session::{
        session_middleware, MemoryStore, RedisStore, Session, SessionManager, SessionOptions,
        SessionStore,
    },
    statistics::{self, statistics_middleware, UrlStatistics},
    AppState,
};

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "waterworks")]
#[command(about = "Demo server wiring every waterworks add-on together", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000")]
    addr: SocketAddr,

    /// Root directory holding one sub-directory per theme
    #[arg(long, default_value = "demos/templates")]
    templates: PathBuf,

    /// Theme rendered by the demo pages
    #[arg(long, default_value = "default")]
    theme: String,

    /// Recompile templates when files change
    #[arg(long)]
    watch: bool,

    /// OpenAPI document served under /docs
    #[arg(long, default_value = "demos/openapi.yaml")]
    openapi: PathBuf,

    /// Cache adapter name
    #[arg(long, default_value = "memory")]
    cache: String,

    /// JSON config handed to the cache adapter
    #[arg(long, default_value = r#"{"Interval":60}"#)]
    cache_config: String,

    /// JSON config for a remote session store; sessions stay in memory if unset
    #[arg(long)]
    session_store: Option<String>,

    /// Include request bodies in the debug dump
    #[arg(long)]
    dump_body: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Visits {
    count: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waterworks=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    validate_production_config();

    // Cache
    let registry = CacheRegistry::with_defaults();
    let cache = registry.open(&args.cache, &args.cache_config).await?;

    // Sessions
    let session_config = SessionConfig::from_env();
    let store: Arc<dyn SessionStore> = match &args.session_store {
        Some(config) => Arc::new(RedisStore::from_config(config).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let session_options = SessionOptions::new(
        store,
        Arc::new(session_config.generator()),
        Arc::new(session_config.tracker()),
    )
    .on_session_new(|session| tracing::debug!("New session {}", session.id()));
    let sessions = Arc::new(SessionManager::new(session_options));

    // CSRF
    let csrf_guard = Arc::new(CsrfGuard::new(csrf_config_from_env()?)?);
    let csrf_field = csrf_guard.config().name.clone();

    // Templates
    let templates = TemplateSet::new(vec![RenderOptions {
        directory: args.templates.clone(),
        theme: args.theme.clone(),
        watch: args.watch,
        ..RenderOptions::default()
    }])?;

    let stats = Arc::new(UrlStatistics::new(0));

    let app_state = AppState {
        cache: cache.clone(),
        templates,
        theme: args.theme.clone(),
        csrf_field,
        sessions: sessions.clone(),
        statistics: stats.clone(),
    };

    // Pages behind session + CSRF
    let pages = Router::new()
        .route("/", get(index_handler))
        .route("/visit", post(visit_handler))
        .route("/logout", post(logout_handler))
        .route("/hits", get(hits_handler))
        .with_state(app_state)
        .layer(middleware::from_fn_with_state(cache, cache_middleware))
        .layer(middleware::from_fn_with_state(csrf_guard, csrf_middleware))
        .layer(middleware::from_fn_with_state(sessions, session_middleware));

    let app = Router::new()
        .merge(pages)
        .merge(statistics::routes("/statistics", stats.clone()))
        .merge(openapi::swagger_ui(OpenApiOptions {
            docs_url: "/docs".to_string(),
            url: "/docs/openapi.yaml".to_string(),
            file: args.openapi.clone(),
        }))
        .layer(middleware::from_fn_with_state(stats, statistics_middleware))
        .layer(middleware::from_fn_with_state(
            DumpOptions {
                body: args.dump_body,
            },
            request_dump,
        ))
        .layer(trace_layer("waterworks"));

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    tracing::info!("Server listening on http://{}", args.addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn index_handler(
    State(state): State<AppState>,
    session: Session,
    token: CsrfToken,
) -> Response {
    let visits = session
        .payload::<Visits>()
        .ok()
        .flatten()
        .unwrap_or_default();

    state.templates.html(
        StatusCode::OK,
        &state.theme,
        "index.html",
        json!({
            "session_id": session.id(),
            "visits": visits.count,
            "csrf_field": state.csrf_field,
            "csrf_token": token.as_str(),
        }),
    )
}

async fn visit_handler(session: Session) -> Result<Redirect, AppError> {
    let mut visits = session.payload::<Visits>()?.unwrap_or_default();
    visits.count += 1;
    session.set_payload(&visits)?;
    Ok(Redirect::to("/"))
}

async fn logout_handler(session: Session) -> Redirect {
    session.destroy();
    Redirect::to("/")
}

async fn hits_handler(State(state): State<AppState>) -> Result<Response, AppError> {
    if !state.cache.is_exist("hits").await {
        state.cache.put("hits", CacheValue::from(0i64), 0).await?;
    }
    state.cache.incr("hits").await?;

    let hits = state
        .cache
        .get("hits")
        .await
        .and_then(|value| value.as_i64())
        .unwrap_or_default();
    Ok(format!("{}\n", hits).into_response())
}
