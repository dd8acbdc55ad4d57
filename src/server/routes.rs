//! Router configuration for the web server.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::services::ServeDir;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);
    let upload_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route(
            "/generate_exam",
            post(handlers::generate_exam).layer(DefaultBodyLimit::max(upload_limit)),
        )
        // Front-end assets (script.js, styles)
        .nest_service("/static", static_files)
        .with_state(state)
}
