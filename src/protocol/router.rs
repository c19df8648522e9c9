//! Route table

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::{cors, logging};
use crate::protocol::handlers;
use crate::server::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/sources", get(handlers::sources))
        .route("/api/list", get(handlers::list))
        .route("/api/info", get(handlers::info))
        .route("/api/create", post(handlers::create))
        .route("/api/delete", delete(handlers::delete))
        .route("/api/rename", post(handlers::rename))
        .route("/api/copy", post(handlers::copy))
        .route("/api/move", post(handlers::move_item))
        // uploads enforce their own limit while streaming
        .route(
            "/api/upload",
            post(handlers::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/preview", get(handlers::preview))
        .route("/api/serve", get(handlers::serve))
        .route("/api/download", get(handlers::download))
        .route("/api/storage", get(handlers::storage))
        .route(
            "/api/settings",
            get(handlers::get_settings).post(handlers::save_settings),
        )
        .fallback(handlers::not_found)
        .layer(middleware::from_fn(cors::cors))
        .layer(middleware::from_fn(logging::log_requests))
        .with_state(state)
}
