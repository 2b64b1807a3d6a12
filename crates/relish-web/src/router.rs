//! Router assembly for the three listeners.

use std::path::PathBuf;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Application traffic. Every path goes to the dispatch fallback, which
/// routes by package walk rather than by a fixed route table.
pub fn build_app_router(state: AppState) -> Router {
    Router::new()
        .fallback(handlers::app::dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Read-only file serving of the shared directory.
pub fn build_share_router(dir: impl Into<PathBuf>) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(dir.into()))
        .layer(TraceLayer::new_for_http())
}

/// JSON introspection API. CORS is permissive so browser tools on other
/// origins can call it.
pub fn build_explore_router(state: AppState) -> Router {
    Router::new()
        .route("/types", get(handlers::explore::list_types))
        .route("/methods", get(handlers::explore::list_methods))
        .route("/names", get(handlers::explore::list_names))
        .route("/threads", get(handlers::explore::list_threads))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
