//! Sync controller — debounced persistence and remote reconciliation for one board.
//!
//! DESIGN
//! ======
//! The controller owns the one authoritative local copy of the scene. Local
//! edits arrive through `on_local_change`, are compared against the last
//! saved snapshot by content fingerprint, and arm a debounce task that saves
//! after a quiet period. Remote rows arrive through `on_remote_change` and are
//! applied to the drawing surface unless they are our own echo.
//!
//! STATE MACHINE
//! =============
//! `Idle -> Dirty` on a material local edit.
//! `Dirty -> Saving` when a write starts (debounce expiry or `save_now`).
//! `Saving -> Idle | Dirty` on success, depending on whether the local scene
//! moved on while the write was in flight.
//! `Saving -> Error` on a store failure; local state is left untouched so a
//! retry writes the same content.
//!
//! CONCURRENCY
//! ===========
//! Mutable state sits behind a std `Mutex` that is never held across an
//! await. A separate async `write_lock` serialises store writes, so at most
//! one write is in flight; a second caller queues behind it and then sees an
//! unchanged scene. Cancelling the debounce bumps an epoch before aborting,
//! so a timer that already woke up drops out instead of saving twice.
//!
//! ECHO SUPPRESSION
//! ================
//! Every write carries this controller's `client_id` as `updated_by`. A
//! remote row written by us is an echo. A row whose revision is not newer
//! than the saved snapshot is stale. Concurrent editors are last-write-wins.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::ErrorCode;
use crate::scene::{self, Element, Files, Scene, SceneStats, ViewportState};
use crate::store::{SceneStore, StoreError, WhiteboardRow};
use crate::surface::{DrawingSurface, SceneUpdate};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("whiteboard scene has not been loaded")]
    NotLoaded,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotLoaded => "E_SCENE_NOT_LOADED",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::NotLoaded => true,
            Self::Store(e) => e.retryable(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Dirty,
    Saving,
    Error,
}

/// Result of feeding a local surface state to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// No surface attached yet; change tracking is not armed.
    Ignored,
    /// Content matches the last saved snapshot.
    Unchanged,
    /// Content differs; an auto-save is scheduled.
    Dirty,
}

/// Result of feeding a remote row to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Row was written by this controller.
    Echo,
    /// Row is not newer than the saved snapshot.
    Stale,
    /// Row content equals what we already have.
    Unchanged,
    /// Row was applied to the local scene and surface.
    Applied { elements: usize },
    /// Row became the new baseline but unsaved local edits were kept.
    Deferred,
    /// Not loaded yet, or the row belongs to another board.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    /// Revision of the stored row, if the board exists.
    pub revision: Option<i64>,
    pub stats: SceneStats,
    /// The row echoed by the store matches what was sent.
    pub verified: bool,
    /// False when there was nothing to write.
    pub wrote: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub board_id: Option<Uuid>,
    pub revision: Option<i64>,
    pub local: SceneStats,
    pub saved: Option<SceneStats>,
    pub has_unsaved_changes: bool,
    pub is_saving: bool,
    pub last_saved_at: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
struct SavedSnapshot {
    fingerprint: String,
    stats: SceneStats,
    revision: i64,
    at_ms: i64,
    verified: bool,
}

struct Inner {
    loaded: bool,
    board_id: Option<Uuid>,
    surface: Option<Arc<dyn DrawingSurface>>,
    local: Scene,
    local_fingerprint: String,
    saved: Option<SavedSnapshot>,
    state: SyncState,
    last_error: Option<String>,
    debounce: Option<JoinHandle<()>>,
    debounce_epoch: u64,
}

impl Inner {
    fn baseline(&self) -> &str {
        self.saved.as_ref().map_or(EMPTY_FINGERPRINT.as_str(), |s| s.fingerprint.as_str())
    }

    fn has_pending_edits(&self) -> bool {
        self.local_fingerprint != self.baseline()
    }
}

static EMPTY_FINGERPRINT: std::sync::LazyLock<String> = std::sync::LazyLock::new(|| Scene::default().fingerprint());

// =============================================================================
// CONTROLLER
// =============================================================================

pub struct SyncController {
    store: Arc<dyn SceneStore>,
    board_name: String,
    client_id: Uuid,
    config: SyncConfig,
    inner: Mutex<Inner>,
    write_lock: tokio::sync::Mutex<()>,
}

impl SyncController {
    #[must_use]
    pub fn new(store: Arc<dyn SceneStore>, board_name: impl Into<String>, config: SyncConfig) -> Self {
        Self {
            store,
            board_name: board_name.into(),
            client_id: Uuid::new_v4(),
            config,
            inner: Mutex::new(Inner {
                loaded: false,
                board_id: None,
                surface: None,
                local: Scene::default(),
                local_fingerprint: EMPTY_FINGERPRINT.clone(),
                saved: None,
                state: SyncState::Idle,
                last_error: None,
                debounce: None,
                debounce_epoch: 0,
            }),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Identity written as `updated_by` on every save.
    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    #[must_use]
    pub fn board_name(&self) -> &str {
        &self.board_name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the board from the store. A missing board loads as an empty scene
    /// and is created by the first save.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the store read fails; local state is unchanged.
    pub async fn load(&self) -> Result<SceneStats, SyncError> {
        let row = self.store.load_by_name(&self.board_name).await?;

        let mut inner = self.lock();
        match row {
            Some(row) => {
                let scene = row.scene();
                let fingerprint = scene.fingerprint();
                inner.board_id = Some(row.id);
                inner.saved = Some(SavedSnapshot {
                    fingerprint: fingerprint.clone(),
                    stats: scene.stats(),
                    revision: row.revision,
                    at_ms: row.updated_at_ms,
                    verified: true,
                });
                inner.local = scene;
                inner.local_fingerprint = fingerprint;
                info!(board = %self.board_name, board_id = %row.id, revision = row.revision, "whiteboard loaded");
            }
            None => {
                inner.board_id = None;
                inner.saved = None;
                inner.local = Scene::default();
                inner.local_fingerprint = EMPTY_FINGERPRINT.clone();
                info!(board = %self.board_name, "whiteboard not found; starting empty");
            }
        }
        inner.loaded = true;
        inner.state = SyncState::Idle;
        inner.last_error = None;
        Ok(inner.local.stats())
    }

    /// Bind a drawing surface and push the loaded scene into it once.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotLoaded`] if `load` has not completed.
    pub fn attach(&self, surface: Arc<dyn DrawingSurface>) -> Result<(), SyncError> {
        let mut inner = self.lock();
        if !inner.loaded {
            return Err(SyncError::NotLoaded);
        }
        push_scene(surface.as_ref(), &inner.local, true);
        let elements = inner.local.elements.len();
        inner.surface = Some(surface);
        debug!(board = %self.board_name, elements, "drawing surface attached");
        Ok(())
    }

    #[must_use]
    pub fn surface(&self) -> Option<Arc<dyn DrawingSurface>> {
        self.lock().surface.clone()
    }

    #[must_use]
    pub fn board_id(&self) -> Option<Uuid> {
        self.lock().board_id
    }

    /// Copy of the current local scene.
    #[must_use]
    pub fn local_scene(&self) -> Scene {
        self.lock().local.clone()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let inner = self.lock();
        SyncStatus {
            state: inner.state,
            board_id: inner.board_id,
            revision: inner.saved.as_ref().map(|s| s.revision),
            local: inner.local.stats(),
            saved: inner.saved.as_ref().map(|s| s.stats),
            has_unsaved_changes: inner.has_pending_edits(),
            is_saving: inner.state == SyncState::Saving,
            last_saved_at: inner.saved.as_ref().map(|s| s.at_ms),
            last_error: inner.last_error.clone(),
        }
    }

    // =========================================================================
    // LOCAL EDITS
    // =========================================================================

    /// Record the surface's current state. Schedules an auto-save when the
    /// content differs from the last saved snapshot.
    pub fn on_local_change(self: &Arc<Self>, elements: Vec<Element>, app_state: ViewportState, files: Files) -> ChangeOutcome {
        let mut inner = self.lock();
        if !inner.loaded || inner.surface.is_none() {
            return ChangeOutcome::Ignored;
        }

        let local = Scene { elements, app_state, files };
        inner.local_fingerprint = local.fingerprint();
        inner.local = local;

        if !inner.has_pending_edits() {
            cancel_debounce(&mut inner);
            if matches!(inner.state, SyncState::Dirty | SyncState::Error) {
                inner.state = SyncState::Idle;
            }
            return ChangeOutcome::Unchanged;
        }

        if inner.state != SyncState::Saving {
            inner.state = SyncState::Dirty;
        }
        self.arm_debounce(&mut inner);
        ChangeOutcome::Dirty
    }

    /// Read the attached surface and feed it through `on_local_change`.
    /// Used after imperative inserts that do not raise a change event.
    pub fn capture_current_state(self: &Arc<Self>) -> ChangeOutcome {
        let Some(surface) = self.surface() else {
            return ChangeOutcome::Ignored;
        };
        let elements = surface.scene_elements();
        let app_state = surface.app_state();
        let files = surface.files();
        self.on_local_change(elements, app_state, files)
    }

    fn arm_debounce(self: &Arc<Self>, inner: &mut Inner) {
        cancel_debounce(inner);
        let epoch = inner.debounce_epoch;
        let delay = self.config.autosave_delay;
        let weak = Arc::downgrade(self);

        inner.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            {
                let mut inner = this.lock();
                if inner.debounce_epoch != epoch {
                    return;
                }
                inner.debounce = None;
            }
            if let Err(e) = this.save_now().await {
                warn!(error = %e, board = %this.board_name, "auto-save failed");
            }
        }));
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Persist the local scene now, superseding any pending auto-save.
    ///
    /// A no-op when the local scene equals the last saved snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] if the scene is not loaded or the write fails.
    /// On failure the local scene is kept for a retry.
    pub async fn save_now(self: &Arc<Self>) -> Result<SaveReport, SyncError> {
        {
            let mut inner = self.lock();
            if !inner.loaded {
                return Err(SyncError::NotLoaded);
            }
            cancel_debounce(&mut inner);
        }

        let _write = self.write_lock.lock().await;

        let (scene, fingerprint, board_id) = {
            let mut inner = self.lock();
            if !inner.has_pending_edits() {
                debug!(board = %self.board_name, "save skipped; no changes since last save");
                return Ok(SaveReport {
                    revision: inner.saved.as_ref().map(|s| s.revision),
                    stats: inner.local.stats(),
                    verified: inner.saved.as_ref().is_some_and(|s| s.verified),
                    wrote: false,
                });
            }
            inner.state = SyncState::Saving;
            (inner.local.clone(), inner.local_fingerprint.clone(), inner.board_id)
        };

        let result = self.persist(board_id, &scene).await;
        self.finish_save(result, &scene, fingerprint)
    }

    /// Clear every element and file locally and persist the empty scene.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] if the scene is not loaded or the write fails.
    pub async fn reset_whiteboard(self: &Arc<Self>) -> Result<SaveReport, SyncError> {
        {
            let mut inner = self.lock();
            if !inner.loaded {
                return Err(SyncError::NotLoaded);
            }
            cancel_debounce(&mut inner);
        }

        let _write = self.write_lock.lock().await;

        let (scene, fingerprint, board_id) = {
            let mut inner = self.lock();
            inner.local = Scene::default();
            inner.local_fingerprint = EMPTY_FINGERPRINT.clone();
            if let Some(surface) = &inner.surface {
                surface.reset_scene();
            }
            inner.state = SyncState::Saving;
            (inner.local.clone(), inner.local_fingerprint.clone(), inner.board_id)
        };
        info!(board = %self.board_name, "whiteboard reset");

        let result = self.persist(board_id, &scene).await;
        self.finish_save(result, &scene, fingerprint)
    }

    async fn persist(&self, board_id: Option<Uuid>, scene: &Scene) -> Result<WhiteboardRow, StoreError> {
        let data = scene.to_value();
        let Some(id) = board_id else {
            return match self.store.create(&self.board_name, &data, self.client_id).await {
                // Another client created the board first; overwrite it.
                Err(StoreError::AlreadyExists(name)) => match self.store.load_by_name(&name).await? {
                    Some(row) => self.store.update(row.id, &data, self.client_id).await,
                    None => Err(StoreError::AlreadyExists(name)),
                },
                other => other,
            };
        };
        self.store.update(id, &data, self.client_id).await
    }

    fn finish_save(
        self: &Arc<Self>,
        result: Result<WhiteboardRow, StoreError>,
        sent: &Scene,
        fingerprint: String,
    ) -> Result<SaveReport, SyncError> {
        let mut inner = self.lock();
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, board = %self.board_name, "whiteboard save failed");
                inner.state = SyncState::Error;
                inner.last_error = Some(e.to_string());
                return Err(e.into());
            }
        };

        let stats = sent.stats();
        let echoed = row.scene();
        let verified = echoed.stats() == stats && echoed.fingerprint() == fingerprint;
        if !verified {
            warn!(board_id = %row.id, revision = row.revision, "stored scene does not match what was sent");
        }

        let caught_up = inner.local_fingerprint == fingerprint;
        inner.board_id = Some(row.id);
        inner.saved = Some(SavedSnapshot { fingerprint, stats, revision: row.revision, at_ms: row.updated_at_ms, verified });
        inner.last_error = None;
        if caught_up {
            inner.state = SyncState::Idle;
        } else {
            // Edits landed while the write was in flight; make sure they get saved too.
            inner.state = SyncState::Dirty;
            if inner.debounce.is_none() {
                self.arm_debounce(&mut inner);
            }
        }

        info!(
            board_id = %row.id,
            revision = row.revision,
            elements = stats.element_count,
            files = stats.file_count,
            verified,
            "whiteboard saved"
        );
        Ok(SaveReport { revision: Some(row.revision), stats, verified, wrote: true })
    }

    // =========================================================================
    // REMOTE CHANGES
    // =========================================================================

    /// Reconcile a row reported by the store's change subscription.
    pub fn on_remote_change(&self, row: &WhiteboardRow) -> RemoteOutcome {
        let mut inner = self.lock();
        if !inner.loaded || inner.board_id.is_some_and(|id| id != row.id) {
            return RemoteOutcome::Ignored;
        }
        if row.updated_by == Some(self.client_id) {
            debug!(board_id = %row.id, revision = row.revision, "skipping own echo");
            return RemoteOutcome::Echo;
        }
        if inner.saved.as_ref().is_some_and(|s| row.revision <= s.revision) {
            debug!(board_id = %row.id, revision = row.revision, "skipping stale remote row");
            return RemoteOutcome::Stale;
        }

        let remote = row.scene();
        let fingerprint = remote.fingerprint();
        let had_pending = inner.has_pending_edits();
        inner.board_id = Some(row.id);
        inner.saved = Some(SavedSnapshot {
            fingerprint: fingerprint.clone(),
            stats: remote.stats(),
            revision: row.revision,
            at_ms: row.updated_at_ms,
            verified: true,
        });

        if inner.local_fingerprint == fingerprint {
            if inner.state != SyncState::Saving {
                cancel_debounce(&mut inner);
                inner.state = SyncState::Idle;
            }
            return RemoteOutcome::Unchanged;
        }

        if had_pending {
            // Last write wins: the pending local scene overwrites this row on the next save.
            info!(board_id = %row.id, revision = row.revision, "remote change deferred behind local edits");
            return RemoteOutcome::Deferred;
        }

        if let Some(surface) = &inner.surface {
            push_scene(surface.as_ref(), &remote, false);
        }
        let elements = scene::normalize_elements(&remote.elements, &remote.files).len();
        inner.local = remote;
        inner.local_fingerprint = fingerprint;
        info!(board_id = %row.id, revision = row.revision, elements, "remote change applied");
        RemoteOutcome::Applied { elements }
    }

    /// Keep a store subscription for this board alive and feed every row into
    /// `on_remote_change`. Waits until the board exists; resubscribes when the
    /// subscription closes. Stops once the controller is dropped.
    pub fn spawn_remote_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let subscription = {
                    let Some(this) = weak.upgrade() else {
                        return;
                    };
                    match this.board_id() {
                        Some(board_id) => Some((board_id, this.store.subscribe(board_id).await)),
                        None => None,
                    }
                };

                match subscription {
                    Some((board_id, Ok(mut rx))) => {
                        debug!(%board_id, "remote change subscription established");
                        while let Some(row) = rx.recv().await {
                            let Some(this) = weak.upgrade() else {
                                return;
                            };
                            let outcome = this.on_remote_change(&row);
                            debug!(%board_id, revision = row.revision, ?outcome, "remote row handled");
                        }
                        warn!(%board_id, "remote change subscription closed; resubscribing");
                    }
                    Some((board_id, Err(e))) => {
                        warn!(error = %e, %board_id, "remote change subscription failed; retrying");
                    }
                    None => {}
                }
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            }
        })
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        cancel_debounce(inner);
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn cancel_debounce(inner: &mut Inner) {
    inner.debounce_epoch = inner.debounce_epoch.wrapping_add(1);
    if let Some(handle) = inner.debounce.take() {
        handle.abort();
    }
}

/// Files first, so image elements never render against a missing payload.
fn push_scene(surface: &dyn DrawingSurface, scene: &Scene, with_app_state: bool) {
    surface.add_files(scene.files.values().cloned().collect());
    surface.update_scene(SceneUpdate {
        elements: Some(scene::normalize_elements(&scene.elements, &scene.files)),
        app_state: with_app_state.then(|| scene.app_state.clone()),
    });
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
