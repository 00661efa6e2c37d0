//! Drawing surface — the imperative canvas API the sync layer drives.
//!
//! DESIGN
//! ======
//! The trait mirrors what an embeddable whiteboard canvas exposes: read the
//! current elements/files/viewport, merge a partial scene update, register
//! binary files, reset, and fit the camera to a set of elements. Calls are
//! synchronous and infallible, like the canvas API they stand in for.

pub mod headless;

pub use headless::HeadlessSurface;

use crate::camera::FitOptions;
use crate::scene::{Element, FilePayload, Files, ViewportState};

/// Partial scene replacement. `None` fields are left as they are.
#[derive(Debug, Clone, Default)]
pub struct SceneUpdate {
    pub elements: Option<Vec<Element>>,
    pub app_state: Option<ViewportState>,
}

pub trait DrawingSurface: Send + Sync {
    fn scene_elements(&self) -> Vec<Element>;

    fn files(&self) -> Files;

    fn app_state(&self) -> ViewportState;

    fn update_scene(&self, update: SceneUpdate);

    /// Register file payloads. Does not emit a change on its own.
    fn add_files(&self, files: Vec<FilePayload>);

    /// Drop all elements and files and restore the default viewport.
    fn reset_scene(&self);

    /// Move the camera so `elements` fill the viewport.
    fn scroll_to_content(&self, elements: &[Element], fit: FitOptions);

    /// Whether the surface is confirmed to be showing content. When it is not,
    /// viewers switch to the static fallback render.
    fn is_displaying_content(&self) -> bool {
        true
    }
}
