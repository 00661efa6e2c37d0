//! Live viewer — read-only consumer that mirrors the persisted board.
//!
//! DESIGN
//! ======
//! The viewer loads the latest row, pushes it into its drawing surface
//! (files first, then normalized elements), and keeps a store subscription
//! open so every newer row is re-applied as a full snapshot. Rows carry a
//! monotonic revision; anything not newer than what is shown is dropped, so
//! out-of-order delivery never moves the view backwards.
//!
//! CAMERA
//! ======
//! Follow mode (default on) fits the camera to the renderable set after every
//! applied scene. With follow off, updates land without moving the camera.
//! `center` always fits, and reports `NothingToCenter` instead of touching
//! the camera when the renderable set is empty.
//!
//! Every state change is published as a `ViewerSnapshot` on a broadcast
//! channel for websocket clients.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::raster::{self, RasterError};
use crate::camera::FitOptions;
use crate::clock::now_ms;
use crate::config::RenderLimits;
use crate::scene::{self, Element, Scene};
use crate::store::{SceneStore, StoreError, WhiteboardRow};
use crate::surface::{DrawingSurface, SceneUpdate};

const EVENT_CHANNEL_CAPACITY: usize = 16;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

// =============================================================================
// TYPES
// =============================================================================

/// Result of a load, refresh, or applied remote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// No board yet, or a board with no visible elements.
    Empty,
    Loaded { elements: usize, files: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CenterOutcome {
    Centered { elements: usize },
    NothingToCenter,
}

/// Everything a viewer client needs to draw the board and its status bar.
#[derive(Debug, Clone, Serialize)]
pub struct ViewerSnapshot {
    pub board_id: Option<Uuid>,
    pub revision: Option<i64>,
    pub follow_mode: bool,
    pub fallback_active: bool,
    pub connected: bool,
    pub last_update_at: Option<i64>,
    pub element_count: usize,
    /// Renderable elements, the files they reference, and the current viewport.
    pub scene: Scene,
}

#[derive(Debug)]
struct ViewerInner {
    board_id: Option<Uuid>,
    revision: Option<i64>,
    follow_mode: bool,
    fallback_requested: bool,
    connected: bool,
    last_update_ms: Option<i64>,
}

// =============================================================================
// VIEWER
// =============================================================================

pub struct LiveViewer {
    store: Arc<dyn SceneStore>,
    board_name: String,
    surface: Arc<dyn DrawingSurface>,
    fit: FitOptions,
    render: RenderLimits,
    inner: Mutex<ViewerInner>,
    events: broadcast::Sender<ViewerSnapshot>,
}

impl LiveViewer {
    #[must_use]
    pub fn new(
        store: Arc<dyn SceneStore>,
        board_name: impl Into<String>,
        surface: Arc<dyn DrawingSurface>,
        fit: FitOptions,
        render: RenderLimits,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            board_name: board_name.into(),
            surface,
            fit,
            render,
            inner: Mutex::new(ViewerInner {
                board_id: None,
                revision: None,
                follow_mode: true,
                fallback_requested: false,
                connected: false,
                last_update_ms: None,
            }),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ViewerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initial load of the board, including its persisted viewport.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store read fails; the surface is untouched.
    pub async fn load(&self) -> Result<LoadOutcome, StoreError> {
        let row = self.store.load_by_name(&self.board_name).await?;
        let outcome = self.apply_loaded(row.as_ref());
        info!(board = %self.board_name, ?outcome, "viewer loaded");
        Ok(outcome)
    }

    /// Re-read the board on demand, regardless of what the subscription delivered.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store read fails; the surface is untouched.
    pub async fn refresh(&self) -> Result<LoadOutcome, StoreError> {
        let row = self.store.load_by_name(&self.board_name).await?;
        let outcome = self.apply_loaded(row.as_ref());
        info!(board = %self.board_name, ?outcome, "viewer refreshed");
        Ok(outcome)
    }

    fn apply_loaded(&self, row: Option<&WhiteboardRow>) -> LoadOutcome {
        let Some(row) = row else {
            self.publish();
            return LoadOutcome::Empty;
        };
        {
            let mut inner = self.lock();
            // The live task may have applied a newer row while this read was in flight.
            if inner.board_id == Some(row.id) && inner.revision.is_some_and(|rev| row.revision < rev) {
                debug!(board_id = %row.id, revision = row.revision, "read an older row than shown; keeping current scene");
                drop(inner);
                return self.current_outcome();
            }
            inner.board_id = Some(row.id);
            inner.revision = Some(row.revision);
            inner.last_update_ms = Some(now_ms());
        }
        let outcome = self.apply_scene(&row.scene(), true);
        self.publish();
        outcome
    }

    /// Apply a row from the change subscription. `None` when it is not newer
    /// than what is already shown, or belongs to another board.
    pub fn apply_remote(&self, row: &WhiteboardRow) -> Option<LoadOutcome> {
        {
            let mut inner = self.lock();
            if inner.board_id.is_some_and(|id| id != row.id) {
                return None;
            }
            if inner.revision.is_some_and(|rev| row.revision <= rev) {
                debug!(board_id = %row.id, revision = row.revision, "viewer skipping stale row");
                return None;
            }
            inner.board_id = Some(row.id);
            inner.revision = Some(row.revision);
            inner.last_update_ms = Some(now_ms());
        }
        let outcome = self.apply_scene(&row.scene(), false);
        info!(board_id = %row.id, revision = row.revision, ?outcome, "viewer applied remote update");
        self.publish();
        Some(outcome)
    }

    fn current_outcome(&self) -> LoadOutcome {
        match self.surface.scene_elements().len() {
            0 => LoadOutcome::Empty,
            elements => LoadOutcome::Loaded { elements, files: self.surface.files().len() },
        }
    }

    fn apply_scene(&self, scene: &Scene, with_app_state: bool) -> LoadOutcome {
        let elements = scene::normalize_elements(&scene.elements, &scene.files);
        let count = elements.len();

        self.surface.add_files(scene.files.values().cloned().collect());
        self.surface.update_scene(SceneUpdate {
            elements: Some(elements),
            app_state: with_app_state.then(|| scene.app_state.clone()),
        });

        if self.follow_mode() {
            self.surface.scroll_to_content(&self.renderable_elements(), self.fit);
        }

        if count == 0 {
            LoadOutcome::Empty
        } else {
            LoadOutcome::Loaded { elements: count, files: scene.files.len() }
        }
    }

    // =========================================================================
    // CAMERA
    // =========================================================================

    #[must_use]
    pub fn follow_mode(&self) -> bool {
        self.lock().follow_mode
    }

    /// Switch follow mode. Turning it on fits the camera right away.
    pub fn set_follow_mode(&self, enabled: bool) {
        let was = std::mem::replace(&mut self.lock().follow_mode, enabled);
        if enabled && !was {
            self.surface.scroll_to_content(&self.renderable_elements(), self.fit);
        }
        debug!(enabled, "viewer follow mode");
        self.publish();
    }

    /// Fit the camera to the renderable set, whatever the follow mode.
    pub fn center(&self) -> CenterOutcome {
        let renderable = self.renderable_elements();
        if renderable.is_empty() {
            return CenterOutcome::NothingToCenter;
        }
        self.surface.scroll_to_content(&renderable, self.fit);
        self.publish();
        CenterOutcome::Centered { elements: renderable.len() }
    }

    /// Elements on the surface that survive normalization and status filtering.
    #[must_use]
    pub fn renderable_elements(&self) -> Vec<Element> {
        scene::renderable_elements(&self.surface.scene_elements(), &self.surface.files())
    }

    // =========================================================================
    // FALLBACK
    // =========================================================================

    pub fn set_fallback(&self, enabled: bool) {
        self.lock().fallback_requested = enabled;
        self.publish();
    }

    /// Requested by the user, or forced because the surface shows nothing.
    #[must_use]
    pub fn fallback_active(&self) -> bool {
        self.lock().fallback_requested || !self.surface.is_displaying_content()
    }

    /// Static PNG of the renderable set.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Empty`] when there is nothing to draw.
    pub fn render_fallback(&self) -> Result<Vec<u8>, RasterError> {
        let app_state = self.surface.app_state();
        raster::render_png(
            &self.surface.scene_elements(),
            &self.surface.files(),
            app_state.view_background_color.as_deref(),
            self.render,
        )
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    #[must_use]
    pub fn snapshot(&self) -> ViewerSnapshot {
        let (board_id, revision, follow_mode, connected, last_update_at) = {
            let inner = self.lock();
            (inner.board_id, inner.revision, inner.follow_mode, inner.connected, inner.last_update_ms)
        };
        let files = self.surface.files();
        let elements = scene::renderable_elements(&self.surface.scene_elements(), &files);
        let files = scene::referenced_files(&elements, &files);
        ViewerSnapshot {
            board_id,
            revision,
            follow_mode,
            fallback_active: self.fallback_active(),
            connected,
            last_update_at,
            element_count: elements.len(),
            scene: Scene { elements, app_state: self.surface.app_state(), files },
        }
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewerSnapshot> {
        self.events.subscribe()
    }

    fn publish(&self) {
        // No listeners is fine.
        let _ = self.events.send(self.snapshot());
    }

    fn set_connected(&self, connected: bool) {
        let changed = std::mem::replace(&mut self.lock().connected, connected) != connected;
        if changed {
            self.publish();
        }
    }

    /// Keep the change subscription alive and apply every newer row. Loads
    /// again until the board exists, and catches up after every reconnect.
    /// Stops once the viewer is dropped.
    pub fn spawn_live_updates(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let Some(this) = weak.upgrade() else {
                    return;
                };
                let board_id = this.lock().board_id;
                let Some(board_id) = board_id else {
                    if let Err(e) = this.load().await {
                        warn!(error = %e, board = %this.board_name, "viewer load failed; retrying");
                    }
                    drop(this);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                };

                let mut rx = match this.store.subscribe(board_id).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        warn!(error = %e, %board_id, "viewer subscription failed; retrying");
                        drop(this);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                };
                this.set_connected(true);
                info!(%board_id, "viewer live updates connected");

                // Rows written before the subscription was live.
                match this.store.load_by_name(&this.board_name).await {
                    Ok(Some(row)) => {
                        this.apply_remote(&row);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, %board_id, "viewer catch-up read failed"),
                }
                drop(this);

                while let Some(row) = rx.recv().await {
                    let Some(this) = weak.upgrade() else {
                        return;
                    };
                    this.apply_remote(&row);
                }

                let Some(this) = weak.upgrade() else {
                    return;
                };
                this.set_connected(false);
                warn!(%board_id, "viewer live updates disconnected; reconnecting");
                drop(this);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }
}

#[cfg(test)]
#[path = "viewer_test.rs"]
mod tests;
