//! Headless drawing surface — scene state without a renderer.
//!
//! Backs the server-side viewer and editor sessions: it holds exactly what a
//! browser canvas would hold, so the HTTP/websocket layer can serve it and
//! the fallback raster can draw it.

use std::sync::{PoisonError, RwLock};

use super::{DrawingSurface, SceneUpdate};
use crate::camera::{self, FitOptions};
use crate::scene::{Element, FilePayload, Files, ViewportState, Zoom};

#[derive(Default)]
struct HeadlessState {
    elements: Vec<Element>,
    files: Files,
    app_state: ViewportState,
    displaying: bool,
}

pub struct HeadlessSurface {
    state: RwLock<HeadlessState>,
}

impl HeadlessSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::with_viewport(camera::FALLBACK_VIEWPORT.0, camera::FALLBACK_VIEWPORT.1)
    }

    /// Surface reporting a fixed viewport size in CSS pixels.
    #[must_use]
    pub fn with_viewport(width: f64, height: f64) -> Self {
        let app_state = ViewportState { width: Some(width), height: Some(height), ..ViewportState::default() };
        Self { state: RwLock::new(HeadlessState { app_state, displaying: true, ..HeadlessState::default() }) }
    }

    /// Mark the surface as (not) showing content.
    pub fn set_displaying(&self, displaying: bool) {
        self.write().displaying = displaying;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HeadlessState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HeadlessState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawingSurface for HeadlessSurface {
    fn scene_elements(&self) -> Vec<Element> {
        self.read().elements.clone()
    }

    fn files(&self) -> Files {
        self.read().files.clone()
    }

    fn app_state(&self) -> ViewportState {
        self.read().app_state.clone()
    }

    fn update_scene(&self, update: SceneUpdate) {
        let mut state = self.write();
        if let Some(elements) = update.elements {
            state.elements = elements;
        }
        if let Some(incoming) = update.app_state {
            // The surface owns its own size; persisted sizes belong to whoever saved.
            let (width, height) = (state.app_state.width, state.app_state.height);
            state.app_state = ViewportState { width, height, ..incoming };
        }
    }

    fn add_files(&self, files: Vec<FilePayload>) {
        let mut state = self.write();
        for file in files {
            state.files.insert(file.id.clone(), file);
        }
    }

    fn reset_scene(&self) {
        let mut state = self.write();
        let (width, height) = (state.app_state.width, state.app_state.height);
        state.elements.clear();
        state.files.clear();
        state.app_state = ViewportState { width, height, ..ViewportState::default() };
    }

    fn scroll_to_content(&self, elements: &[Element], fit: FitOptions) {
        let Some(bounds) = camera::element_bounds(elements) else {
            return;
        };
        let mut state = self.write();
        let (width, height) = camera::viewport_size(&state.app_state);
        let placed = camera::fit_camera(bounds, width, height, fit);
        state.app_state.scroll_x = placed.scroll_x;
        state.app_state.scroll_y = placed.scroll_y;
        state.app_state.zoom = Zoom { value: placed.zoom };
    }

    fn is_displaying_content(&self) -> bool {
        self.read().displaying
    }
}

#[cfg(test)]
#[path = "headless_test.rs"]
mod tests;
