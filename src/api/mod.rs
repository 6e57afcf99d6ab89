use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::query_engine::QueryEngine;

pub mod handlers;
pub mod models;

/// Shared by every handler. Cloning is cheap: pools and the index are
/// reference counted.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub engine: Arc<QueryEngine>,
}

impl AppState {
    pub fn new(engine: Arc<QueryEngine>) -> Self {
        Self {
            catalog: Catalog::new(engine.db()),
            engine,
        }
    }
}

pub fn create_router(state: AppState, config: &Config) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut api = Router::new()
        .route("/api/tables", get(handlers::tables_handler))
        .route("/api/table/:name", get(handlers::table_rows_handler))
        .route("/api/schema/:name", get(handlers::table_schema_handler))
        .route("/api/search", post(handlers::search_handler));

    if config.raw_query_enabled {
        api = api.route("/api/query", post(handlers::query_handler));
    } else {
        log::warn!("raw query passthrough disabled; /api/query will return 404");
    }

    let mut router = api.with_state(state);

    // Static file serving for a built client bundle
    if let Some(dir) = &config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(GlobalConcurrencyLimitLayer::new(config.max_concurrent_requests.max(1)))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
