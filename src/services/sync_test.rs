use super::*;
use crate::scene::FilePayload;
use crate::store::MemorySceneStore;
use crate::surface::HeadlessSurface;
use serde_json::json;
use tokio::time::{sleep, timeout};

const DELAY: Duration = Duration::from_millis(40);
const SETTLE: Duration = Duration::from_millis(200);

fn rect(id: &str, x: f64) -> Element {
    serde_json::from_value(json!({"id": id, "type": "rectangle", "x": x, "y": 0.0, "width": 10.0, "height": 10.0}))
        .unwrap()
}

fn deleted(id: &str) -> Element {
    serde_json::from_value(json!({"id": id, "type": "rectangle", "isDeleted": true})).unwrap()
}

fn sync_config() -> SyncConfig {
    SyncConfig { autosave_delay: DELAY }
}

async fn loaded(store: &Arc<MemorySceneStore>) -> (Arc<SyncController>, Arc<HeadlessSurface>) {
    let sync = Arc::new(SyncController::new(store.clone(), "map", sync_config()));
    sync.load().await.unwrap();
    let surface = Arc::new(HeadlessSurface::new());
    sync.attach(surface.clone()).unwrap();
    (sync, surface)
}

fn edit(sync: &Arc<SyncController>, elements: Vec<Element>) -> ChangeOutcome {
    sync.on_local_change(elements, ViewportState::default(), Files::new())
}

/// Row for `map` written by some other client.
async fn remote_write(store: &MemorySceneStore, scene: &serde_json::Value) -> WhiteboardRow {
    let other = Uuid::new_v4();
    match store.load_by_name("map").await.unwrap() {
        Some(row) => store.update(row.id, scene, other).await.unwrap(),
        None => store.create("map", scene, other).await.unwrap(),
    }
}

// =============================================================================
// load / attach
// =============================================================================

#[tokio::test]
async fn load_missing_board_starts_empty() {
    let store = Arc::new(MemorySceneStore::new());
    let sync = SyncController::new(store.clone(), "map", sync_config());
    let stats = sync.load().await.unwrap();
    assert_eq!(stats, SceneStats::default());
    let status = sync.status();
    assert_eq!(status.state, SyncState::Idle);
    assert!(status.board_id.is_none());
    assert!(!status.has_unsaved_changes);
}

#[tokio::test]
async fn load_failure_is_reported() {
    let store = Arc::new(MemorySceneStore::new());
    store.set_unavailable(true);
    let sync = SyncController::new(store.clone(), "map", sync_config());
    let err = sync.load().await.unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Unavailable)));
    assert!(err.retryable());
}

#[tokio::test]
async fn attach_before_load_fails() {
    let store = Arc::new(MemorySceneStore::new());
    let sync = SyncController::new(store.clone(), "map", sync_config());
    let err = sync.attach(Arc::new(HeadlessSurface::new())).unwrap_err();
    assert!(matches!(err, SyncError::NotLoaded));
}

#[tokio::test]
async fn attach_pushes_normalized_scene_and_files() {
    let store = Arc::new(MemorySceneStore::new());
    remote_write(
        &store,
        &json!({
            "elements": [
                {"id": "a", "type": "rectangle", "width": 10.0, "height": 10.0},
                {"id": "gone", "type": "rectangle", "isDeleted": true},
                {"id": "img", "type": "image", "fileId": "f1", "status": "pending"}
            ],
            "appState": {"scrollX": 7.0, "zoom": {"value": 0.5}},
            "files": {"f1": {"mimeType": "image/png", "dataURL": "data:image/png;base64,AQID"}}
        }),
    )
    .await;

    let (_sync, surface) = loaded(&store).await;
    let elements = surface.scene_elements();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[1].status, Some(crate::scene::ImageStatus::Saved));
    assert!(surface.files().contains_key("f1"));
    assert!((surface.app_state().scroll_x - 7.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn local_change_before_attach_is_ignored() {
    let store = Arc::new(MemorySceneStore::new());
    let sync = Arc::new(SyncController::new(store.clone(), "map", sync_config()));
    sync.load().await.unwrap();
    assert_eq!(edit(&sync, vec![rect("a", 0.0)]), ChangeOutcome::Ignored);
}

// =============================================================================
// dirty tracking and debounce
// =============================================================================

#[tokio::test]
async fn rerender_without_content_change_is_unchanged() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;

    assert_eq!(edit(&sync, vec![]), ChangeOutcome::Unchanged);
    let panned = ViewportState { scroll_x: 300.0, ..ViewportState::default() };
    assert_eq!(sync.on_local_change(vec![], panned, Files::new()), ChangeOutcome::Unchanged);
    assert_eq!(sync.on_local_change(vec![deleted("x")], ViewportState::default(), Files::new()), ChangeOutcome::Unchanged);

    sleep(SETTLE).await;
    assert_eq!(store.write_count(), 0);
    assert_eq!(sync.status().state, SyncState::Idle);
}

#[tokio::test]
async fn rapid_edits_coalesce_into_one_write() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;

    for i in 0..5 {
        let x = f64::from(i) * 10.0;
        assert_eq!(edit(&sync, vec![rect("a", x)]), ChangeOutcome::Dirty);
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(sync.status().state, SyncState::Dirty);

    sleep(SETTLE).await;
    assert_eq!(store.write_count(), 1);

    let stored = store.load_by_name("map").await.unwrap().unwrap().scene();
    assert!((stored.elements[0].x - 40.0).abs() < f64::EPSILON);
    let status = sync.status();
    assert_eq!(status.state, SyncState::Idle);
    assert!(!status.has_unsaved_changes);
    assert_eq!(status.revision, Some(1));
}

#[tokio::test]
async fn reverting_an_edit_cancels_the_autosave() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;

    assert_eq!(edit(&sync, vec![rect("a", 0.0)]), ChangeOutcome::Dirty);
    assert_eq!(edit(&sync, vec![]), ChangeOutcome::Unchanged);
    sleep(SETTLE).await;
    assert_eq!(store.write_count(), 0);
}

// =============================================================================
// save_now
// =============================================================================

#[tokio::test]
async fn save_now_supersedes_pending_autosave() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;

    edit(&sync, vec![rect("a", 0.0)]);
    let report = sync.save_now().await.unwrap();
    assert!(report.wrote);
    assert!(report.verified);
    assert_eq!(report.stats.element_count, 1);

    sleep(SETTLE).await;
    assert_eq!(store.write_count(), 1);
}

#[tokio::test]
async fn repeated_save_is_idempotent() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;

    edit(&sync, vec![rect("a", 0.0)]);
    let first = sync.save_now().await.unwrap();
    let second = sync.save_now().await.unwrap();

    assert!(first.wrote);
    assert!(!second.wrote);
    assert_eq!(first.revision, second.revision);
    assert_eq!(store.write_count(), 1);
    let row = store.load_by_name("map").await.unwrap().unwrap();
    assert_eq!(row.revision, 1);
}

#[tokio::test]
async fn save_of_untouched_empty_board_writes_nothing() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;
    let report = sync.save_now().await.unwrap();
    assert!(!report.wrote);
    assert_eq!(report.revision, None);
    assert!(store.load_by_name("map").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_saves_issue_one_write() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;

    edit(&sync, vec![rect("a", 0.0), rect("b", 20.0)]);
    let (a, b) = tokio::join!(sync.save_now(), sync.save_now());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.wrote ^ b.wrote);
    assert_eq!(a.revision, b.revision);
    assert_eq!(store.write_count(), 1);
}

/// Memory store whose writes take a while, so edits can land mid-save.
struct SlowStore(Arc<MemorySceneStore>);

const WRITE_LATENCY: Duration = Duration::from_millis(100);

#[async_trait::async_trait]
impl SceneStore for SlowStore {
    async fn load_by_name(&self, name: &str) -> Result<Option<WhiteboardRow>, StoreError> {
        self.0.load_by_name(name).await
    }

    async fn create(&self, name: &str, scene_data: &serde_json::Value, editor: Uuid) -> Result<WhiteboardRow, StoreError> {
        sleep(WRITE_LATENCY).await;
        self.0.create(name, scene_data, editor).await
    }

    async fn update(&self, id: Uuid, scene_data: &serde_json::Value, editor: Uuid) -> Result<WhiteboardRow, StoreError> {
        sleep(WRITE_LATENCY).await;
        self.0.update(id, scene_data, editor).await
    }

    async fn subscribe(&self, id: Uuid) -> Result<tokio::sync::mpsc::Receiver<WhiteboardRow>, StoreError> {
        self.0.subscribe(id).await
    }
}

#[tokio::test]
async fn edit_during_in_flight_save_is_written_afterwards() {
    let memory = Arc::new(MemorySceneStore::new());
    let sync = Arc::new(SyncController::new(Arc::new(SlowStore(memory.clone())), "map", sync_config()));
    sync.load().await.unwrap();
    sync.attach(Arc::new(HeadlessSurface::new())).unwrap();

    edit(&sync, vec![rect("a", 0.0)]);
    let saving = tokio::spawn({
        let sync = sync.clone();
        async move { sync.save_now().await }
    });
    sleep(WRITE_LATENCY / 2).await;
    assert_eq!(sync.status().state, SyncState::Saving);
    edit(&sync, vec![rect("a", 0.0), rect("b", 20.0)]);

    let first = saving.await.unwrap().unwrap();
    assert!(first.wrote);
    assert!(sync.status().has_unsaved_changes);

    sleep(DELAY + WRITE_LATENCY + SETTLE).await;
    assert_eq!(memory.write_count(), 2);
    let row = memory.load_by_name("map").await.unwrap().unwrap();
    assert_eq!(row.scene_data["elements"].as_array().map(Vec::len), Some(2));
    assert!(!sync.status().has_unsaved_changes);
}

#[tokio::test]
async fn store_failure_keeps_local_scene_for_retry() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;

    edit(&sync, vec![rect("a", 0.0)]);
    store.set_unavailable(true);
    let err = sync.save_now().await.unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Unavailable)));

    let status = sync.status();
    assert_eq!(status.state, SyncState::Error);
    assert!(status.has_unsaved_changes);
    assert!(status.last_error.is_some());
    assert_eq!(sync.local_scene().elements.len(), 1);

    store.set_unavailable(false);
    let report = sync.save_now().await.unwrap();
    assert!(report.wrote);
    let status = sync.status();
    assert_eq!(status.state, SyncState::Idle);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn save_before_load_fails() {
    let store = Arc::new(MemorySceneStore::new());
    let sync = Arc::new(SyncController::new(store.clone(), "map", sync_config()));
    assert!(matches!(sync.save_now().await, Err(SyncError::NotLoaded)));
}

#[tokio::test]
async fn first_save_adopts_board_created_meanwhile() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;
    let created = remote_write(&store, &json!({"elements": []})).await;

    edit(&sync, vec![rect("a", 0.0)]);
    let report = sync.save_now().await.unwrap();
    assert_eq!(report.revision, Some(created.revision + 1));
    assert_eq!(sync.board_id(), Some(created.id));
}

#[tokio::test]
async fn save_reports_file_stats() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;

    let mut files = Files::new();
    files.insert("f1".into(), FilePayload::from_bytes("f1", "image/png", &[1, 2], 5));
    let image = Element::image("f1", 0.0, 0.0, 400.0, 300.0);
    sync.on_local_change(vec![image], ViewportState::default(), files);

    let report = sync.save_now().await.unwrap();
    assert_eq!(report.stats, SceneStats { element_count: 1, file_count: 1 });
    assert!(report.verified);
    assert_eq!(sync.status().saved, Some(report.stats));
}

// =============================================================================
// reset
// =============================================================================

#[tokio::test]
async fn reset_then_load_is_empty() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, surface) = loaded(&store).await;
    edit(&sync, vec![rect("a", 0.0)]);
    sync.save_now().await.unwrap();

    let report = sync.reset_whiteboard().await.unwrap();
    assert!(report.wrote);
    assert!(surface.scene_elements().is_empty());

    let fresh = SyncController::new(store.clone(), "map", sync_config());
    let stats = fresh.load().await.unwrap();
    assert_eq!(stats, SceneStats::default());
}

#[tokio::test]
async fn reset_failure_is_reported() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;
    store.set_unavailable(true);
    assert!(sync.reset_whiteboard().await.is_err());
    assert_eq!(sync.status().state, SyncState::Error);
}

// =============================================================================
// remote changes
// =============================================================================

#[tokio::test]
async fn own_echo_is_suppressed() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;
    edit(&sync, vec![rect("a", 0.0)]);
    sync.save_now().await.unwrap();

    let mut rx = store.subscribe(sync.board_id().unwrap()).await.unwrap();
    edit(&sync, vec![rect("a", 5.0)]);
    sync.save_now().await.unwrap();
    let row = timeout(SETTLE, rx.recv()).await.unwrap().unwrap();

    assert_eq!(sync.on_remote_change(&row), RemoteOutcome::Echo);
    assert!(!sync.status().has_unsaved_changes);
    assert_eq!(store.write_count(), 2);
}

#[tokio::test]
async fn remote_equal_to_saved_scene_stays_clean() {
    let store = Arc::new(MemorySceneStore::new());
    let (sync, _surface) = loaded(&store).await;
    edit(&sync, vec![rect("a", 0.0)]);
    sync.save_now().await.unwrap();

    let same = sync.local_scene().to_value();
    let row = remote_write(&store, &same).await;
    assert_eq!(sync.on_remote_change(&row), RemoteOutcome::Unchanged);
    let status = sync.status();
    assert!(!status.has_unsaved_changes);
    assert_eq!(status.revision, Some(row.revision));
}

#[tokio::test]
async fn remote_change_applies_normalized_scene() {
    let store = Arc::new(MemorySceneStore::new());
    remote_write(&store, &json!({"elements": []})).await;
    let (sync, surface) = loaded(&store).await;

    let row = remote_write(
        &store,
        &json!({"elements": [
            {"id": "1", "type": "rectangle", "isDeleted": true},
            {"id": "2", "type": "rectangle"},
            {"id": "3", "type": "ellipse", "isDeleted": true},
            {"id": "4", "type": "text"},
            {"id": "5", "type": "diamond", "isDeleted": true}
        ]}),
    )
    .await;

    assert_eq!(sync.on_remote_change(&row), RemoteOutcome::Applied { elements: 2 });
    assert_eq!(surface.scene_elements().len(), 2);
    assert!(!sync.status().has_unsaved_changes);

    // The surface re-emitting the applied scene is not a local edit.
    assert_eq!(sync.capture_current_state(), ChangeOutcome::Unchanged);
}

#[tokio::test]
async fn stale_remote_row_is_skipped() {
    let store = Arc::new(MemorySceneStore::new());
    let first = remote_write(&store, &json!({"elements": [{"id": "old", "type": "rectangle"}]})).await;
    remote_write(&store, &json!({"elements": []})).await;
    let (sync, surface) = loaded(&store).await;

    assert_eq!(sync.on_remote_change(&first), RemoteOutcome::Stale);
    assert!(surface.scene_elements().is_empty());
}

#[tokio::test]
async fn remote_change_for_other_board_is_ignored() {
    let store = Arc::new(MemorySceneStore::new());
    remote_write(&store, &json!({"elements": []})).await;
    let (sync, _surface) = loaded(&store).await;
    let other = store.create("other", &json!({"elements": []}), Uuid::new_v4()).await.unwrap();
    assert_eq!(sync.on_remote_change(&other), RemoteOutcome::Ignored);
}

#[tokio::test]
async fn remote_change_is_deferred_behind_local_edits() {
    let store = Arc::new(MemorySceneStore::new());
    remote_write(&store, &json!({"elements": []})).await;
    let (sync, surface) = loaded(&store).await;

    edit(&sync, vec![rect("mine", 0.0)]);
    let row = remote_write(&store, &json!({"elements": [{"id": "theirs", "type": "rectangle"}]})).await;
    assert_eq!(sync.on_remote_change(&row), RemoteOutcome::Deferred);
    assert!(surface.scene_elements().is_empty());

    sleep(SETTLE).await;
    let stored = store.load_by_name("map").await.unwrap().unwrap();
    assert_eq!(stored.updated_by, Some(sync.client_id()));
    assert_eq!(stored.scene().elements[0].id, "mine");
}

#[tokio::test]
async fn remote_listener_applies_other_clients_writes() {
    let store = Arc::new(MemorySceneStore::new());
    remote_write(&store, &json!({"elements": []})).await;
    let (sync, surface) = loaded(&store).await;

    let listener = sync.spawn_remote_listener();
    sleep(Duration::from_millis(50)).await;
    remote_write(&store, &json!({"elements": [{"id": "a", "type": "rectangle", "width": 5.0, "height": 5.0}]})).await;
    sleep(SETTLE).await;

    assert_eq!(surface.scene_elements().len(), 1);
    listener.abort();
}

#[test]
fn sync_error_codes() {
    assert_eq!(SyncError::NotLoaded.error_code(), "E_SCENE_NOT_LOADED");
    assert_eq!(SyncError::Store(StoreError::Unavailable).error_code(), "E_STORE_UNAVAILABLE");
}
