//! Editor routes — admin authoring over the sync controller.
//!
//! Every handler requires [`AdminUser`]. When the editor session could not be
//! opened at startup the routes answer 503.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::routes::auth::AdminUser;
use crate::routes::error::ApiError;
use crate::scene::Scene;
use crate::services::editor::{InsertReport, WhiteboardEditor};
use crate::services::sync::{ChangeOutcome, SaveReport, SyncError, SyncStatus};
use crate::state::AppState;

/// Upper bound on URLs accepted by one gallery insert.
const MAX_IMAGES_PER_INSERT: usize = 20;

#[derive(Deserialize)]
pub struct InsertImagesBody {
    pub urls: Vec<String>,
}

#[derive(Serialize)]
pub struct ChangeResponse {
    pub change: ChangeOutcome,
    pub status: SyncStatus,
}

fn editor(state: &AppState) -> Result<&Arc<WhiteboardEditor>, StatusCode> {
    state.editor.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// `GET /api/editor` — sync status of the editor session.
pub async fn status(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<SyncStatus>, StatusCode> {
    Ok(Json(editor(&state)?.status()))
}

/// `PUT /api/editor/scene` — feed a local change `{elements, appState, files}`.
pub async fn put_scene(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(body): Json<Value>,
) -> Result<Json<ChangeResponse>, StatusCode> {
    if !body.is_object() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let editor = editor(&state)?;
    let change = editor.apply_local_edit(Scene::from_value(&body));
    Ok(Json(ChangeResponse { change, status: editor.status() }))
}

/// `POST /api/editor/save` — save immediately, bypassing the debounce.
pub async fn save(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<SaveReport>, ApiError> {
    let Some(editor) = state.editor.as_ref() else {
        return Err(ApiError::from(SyncError::NotLoaded));
    };
    Ok(Json(editor.save().await?))
}

/// `POST /api/editor/reset` — clear the board and persist the empty scene.
pub async fn reset(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<SaveReport>, ApiError> {
    let Some(editor) = state.editor.as_ref() else {
        return Err(ApiError::from(SyncError::NotLoaded));
    };
    Ok(Json(editor.reset().await?))
}

/// `POST /api/editor/images` — download gallery images and place them on the board.
pub async fn insert_images(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(body): Json<InsertImagesBody>,
) -> Result<Json<InsertReport>, StatusCode> {
    if body.urls.is_empty() || body.urls.len() > MAX_IMAGES_PER_INSERT {
        return Err(StatusCode::BAD_REQUEST);
    }
    let editor = editor(&state)?;
    Ok(Json(editor.insert_gallery_images(&body.urls).await))
}
