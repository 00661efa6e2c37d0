//! Viewer routes — public, read-only access to the live map.

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::routes::error::ApiError;
use crate::services::viewer::{CenterOutcome, LoadOutcome, ViewerSnapshot};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ToggleBody {
    pub enabled: bool,
}

/// `GET /api/map` — renderable scene plus viewer status.
pub async fn get_map(State(state): State<AppState>) -> Json<ViewerSnapshot> {
    Json(state.viewer.snapshot())
}

/// `GET /api/map/render.png` — static fallback raster of the current scene.
pub async fn render_png(State(state): State<AppState>) -> Result<Response, ApiError> {
    let viewer = state.viewer.clone();
    let rendered = tokio::task::spawn_blocking(move || viewer.render_fallback()).await;
    let png = match rendered {
        Ok(result) => result?,
        Err(e) => {
            tracing::error!(error = %e, "fallback render task failed");
            return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
    };
    Ok(([(CONTENT_TYPE, "image/png"), (CACHE_CONTROL, "no-store")], png).into_response())
}

/// `POST /api/map/refresh` — re-read the board from the store.
pub async fn refresh(State(state): State<AppState>) -> Result<Json<LoadOutcome>, ApiError> {
    Ok(Json(state.viewer.refresh().await?))
}

/// `POST /api/map/center` — fit the camera to the renderable content.
pub async fn center(State(state): State<AppState>) -> Json<CenterOutcome> {
    Json(state.viewer.center())
}

/// `PUT /api/map/follow` — toggle follow mode.
pub async fn set_follow(State(state): State<AppState>, Json(body): Json<ToggleBody>) -> Json<ViewerSnapshot> {
    state.viewer.set_follow_mode(body.enabled);
    Json(state.viewer.snapshot())
}

/// `PUT /api/map/fallback` — request the static raster instead of the live surface.
pub async fn set_fallback(State(state): State<AppState>, Json(body): Json<ToggleBody>) -> Json<ViewerSnapshot> {
    state.viewer.set_fallback(body.enabled);
    Json(state.viewer.snapshot())
}
