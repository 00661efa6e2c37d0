//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Public viewer endpoints live under `/api/map` and are read-only apart from
//! per-process camera toggles. Editor endpoints under `/api/editor` require
//! the admin bearer token. The viewer also pushes every applied scene over
//! `/api/map/ws`.

pub mod auth;
pub mod editor;
pub mod error;
pub mod map;
pub mod ws;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/map", get(map::get_map))
        .route("/api/map/render.png", get(map::render_png))
        .route("/api/map/refresh", post(map::refresh))
        .route("/api/map/center", post(map::center))
        .route("/api/map/follow", put(map::set_follow))
        .route("/api/map/fallback", put(map::set_fallback))
        .route("/api/map/ws", get(ws::handle_ws))
        .merge(editor_routes(state.config.editor_max_body_bytes))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Editor scenes carry image files inline, so they get their own body limit.
fn editor_routes(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/api/editor", get(editor::status))
        .route("/api/editor/scene", put(editor::put_scene))
        .route("/api/editor/save", post(editor::save))
        .route("/api/editor/reset", post(editor::reset))
        .route("/api/editor/images", post(editor::insert_images))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
