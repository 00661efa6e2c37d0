use super::*;
use crate::config::SyncConfig;
use crate::scene::{ImageStatus, ViewportState};
use crate::services::sync::RemoteOutcome;
use crate::store::{MemorySceneStore, SceneStore, StoreError};
use crate::surface::HeadlessSurface;
use axum::Router;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::routing::get;
use serde_json::json;
use std::collections::HashSet;
use std::io::Cursor;
use tokio::time::sleep;

const DELAY: Duration = Duration::from_millis(40);

/// Serves every URL not containing `bad` as a tiny PNG.
struct MockFetcher;

#[async_trait::async_trait]
impl ImageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, EditorError> {
        if url.contains("bad") {
            return Err(EditorError::NotAnImage { url: url.to_owned(), content_type: Some("text/html".into()) });
        }
        Ok(FetchedImage { bytes: png_bytes(), mime_type: "image/png".into() })
    }
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 0, 0xff, 0xff]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).expect("png encodes");
    out.into_inner()
}

async fn open_editor(store: &Arc<MemorySceneStore>) -> (WhiteboardEditor, Arc<HeadlessSurface>) {
    let sync = Arc::new(SyncController::new(store.clone(), "map", SyncConfig { autosave_delay: DELAY }));
    let surface = Arc::new(HeadlessSurface::with_viewport(800.0, 600.0));
    let editor = WhiteboardEditor::open(sync, surface.clone(), Arc::new(MockFetcher)).await.expect("editor opens");
    (editor, surface)
}

fn urls(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

// =============================================================================
// gallery insert
// =============================================================================

#[tokio::test]
async fn inserting_two_images_into_empty_scene() {
    let store = Arc::new(MemorySceneStore::new());
    let (editor, surface) = open_editor(&store).await;

    let report = editor.insert_gallery_images(&urls(&["https://cdn/a.png", "https://cdn/b.png"])).await;
    assert_eq!(report.inserted.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(report.change, ChangeOutcome::Dirty);

    let elements = surface.scene_elements();
    assert_eq!(elements.len(), 2);
    assert!(elements.iter().all(|el| el.is_image() && el.status == Some(ImageStatus::Saved)));

    let file_ids: HashSet<_> = elements.iter().filter_map(|el| el.file_id.clone()).collect();
    assert_eq!(file_ids.len(), 2);
    assert!(file_ids.iter().all(|id| id.starts_with("gallery_") && surface.files().contains_key(id)));

    let (a, b) = (&elements[0], &elements[1]);
    assert!((b.x - a.x).abs() > 0.0 && (b.y - a.y).abs() > 0.0);
    assert!(editor.status().has_unsaved_changes);
}

#[tokio::test]
async fn inserted_images_are_staggered_around_viewport_center() {
    let store = Arc::new(MemorySceneStore::new());
    let (editor, surface) = open_editor(&store).await;
    let panned = ViewportState { scroll_x: -1000.0, scroll_y: 0.0, ..ViewportState::default() };
    surface.update_scene(SceneUpdate { elements: None, app_state: Some(panned) });

    editor.insert_gallery_images(&urls(&["a", "b", "c"])).await;
    let elements = surface.scene_elements();

    // Viewport center is (400 + 1000, 300).
    let expected = [(1200.0, 150.0), (1250.0, 200.0), (1300.0, 250.0)];
    for (el, (x, y)) in elements.iter().zip(expected) {
        assert!((el.x - x).abs() < 1e-9, "x {} != {x}", el.x);
        assert!((el.y - y).abs() < 1e-9, "y {} != {y}", el.y);
        assert!((el.width - INSERT_WIDTH).abs() < f64::EPSILON);
        assert!((el.height - INSERT_HEIGHT).abs() < f64::EPSILON);
    }
}

#[tokio::test]
async fn failed_fetch_is_reported_without_rollback() {
    let store = Arc::new(MemorySceneStore::new());
    let (editor, surface) = open_editor(&store).await;

    let report = editor.insert_gallery_images(&urls(&["ok-1", "bad", "ok-2"])).await;
    assert_eq!(report.inserted.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].url, "bad");
    assert_eq!(report.failed[0].code, "E_NOT_AN_IMAGE");
    assert_eq!(surface.scene_elements().len(), 2);
}

#[tokio::test]
async fn all_failed_inserts_leave_scene_clean() {
    let store = Arc::new(MemorySceneStore::new());
    let (editor, _surface) = open_editor(&store).await;
    let report = editor.insert_gallery_images(&urls(&["bad"])).await;
    assert!(report.inserted.is_empty());
    assert_eq!(report.change, ChangeOutcome::Unchanged);
}

#[tokio::test]
async fn inserted_images_are_autosaved_with_their_files() {
    let store = Arc::new(MemorySceneStore::new());
    let (editor, _surface) = open_editor(&store).await;

    editor.insert_gallery_images(&urls(&["a", "b"])).await;
    sleep(Duration::from_millis(200)).await;

    assert_eq!(store.write_count(), 1);
    let stored = store.load_by_name("map").await.unwrap().unwrap().scene();
    assert_eq!(stored.stats().element_count, 2);
    assert_eq!(stored.stats().file_count, 2);
    assert!(stored.files.values().all(|f| f.decode_bytes() == Some(png_bytes())));
}

/// Delays every download so a batch spans several scheduler turns.
struct SlowFetcher;

#[async_trait::async_trait]
impl ImageFetcher for SlowFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchedImage, EditorError> {
        sleep(Duration::from_millis(80)).await;
        Ok(FetchedImage { bytes: png_bytes(), mime_type: "image/png".into() })
    }
}

#[tokio::test]
async fn remote_row_during_insert_batch_is_deferred() {
    let store = Arc::new(MemorySceneStore::new());
    let board = store.create("map", &json!({"elements": []}), Uuid::new_v4()).await.unwrap();
    let sync = Arc::new(SyncController::new(store.clone(), "map", SyncConfig { autosave_delay: Duration::from_secs(30) }));
    let surface = Arc::new(HeadlessSurface::with_viewport(800.0, 600.0));
    let editor = WhiteboardEditor::open(sync, surface.clone(), Arc::new(SlowFetcher)).await.expect("editor opens");

    let other_client = Uuid::new_v4();
    let gallery = urls(&["a", "b"]);
    let (report, remote) = tokio::join!(editor.insert_gallery_images(&gallery), async {
        // First image is placed at ~80ms, second fetch still running.
        sleep(Duration::from_millis(120)).await;
        let row = store
            .update(board.id, &json!({"elements": [{"id": "x", "type": "rectangle", "width": 5.0, "height": 5.0}]}), other_client)
            .await
            .unwrap();
        editor.sync().on_remote_change(&row)
    });

    assert_eq!(remote, RemoteOutcome::Deferred);
    assert_eq!(report.inserted.len(), 2);
    let images = surface.scene_elements().into_iter().filter(Element::is_image).count();
    assert_eq!(images, 2);
    assert!(editor.status().has_unsaved_changes);
}

// =============================================================================
// edit / save / reset
// =============================================================================

#[tokio::test]
async fn open_fails_when_store_is_down() {
    let store = Arc::new(MemorySceneStore::new());
    store.set_unavailable(true);
    let sync = Arc::new(SyncController::new(store.clone(), "map", SyncConfig::default()));
    let result = WhiteboardEditor::open(sync, Arc::new(HeadlessSurface::new()), Arc::new(MockFetcher)).await;
    assert!(matches!(result, Err(EditorError::Sync(SyncError::Store(StoreError::Unavailable)))));
}

#[tokio::test]
async fn local_edit_then_manual_save() {
    let store = Arc::new(MemorySceneStore::new());
    let (editor, _surface) = open_editor(&store).await;

    let scene = Scene::from_value(&json!({
        "elements": [{"id": "a", "type": "rectangle", "width": 10.0, "height": 10.0}]
    }));
    assert_eq!(editor.apply_local_edit(scene), ChangeOutcome::Dirty);

    let report = editor.save().await.unwrap();
    assert!(report.wrote && report.verified);
    assert_eq!(report.stats.element_count, 1);
    assert!(!editor.status().has_unsaved_changes);
}

#[tokio::test]
async fn reset_clears_surface_and_store() {
    let store = Arc::new(MemorySceneStore::new());
    let (editor, surface) = open_editor(&store).await;
    editor.insert_gallery_images(&urls(&["a"])).await;
    editor.save().await.unwrap();

    editor.reset().await.unwrap();
    assert!(surface.scene_elements().is_empty());
    assert!(surface.files().is_empty());
    let stored = store.load_by_name("map").await.unwrap().unwrap().scene();
    assert_eq!(stored.stats(), crate::scene::SceneStats::default());
}

// =============================================================================
// HttpImageFetcher
// =============================================================================

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    format!("http://{addr}")
}

fn image_routes() -> Router {
    Router::new()
        .route("/typed.png", get(|| async { ([(CONTENT_TYPE, "image/png; charset=binary")], png_bytes()) }))
        .route("/octet", get(|| async { ([(CONTENT_TYPE, "application/octet-stream")], png_bytes()) }))
        .route("/page", get(|| async { ([(CONTENT_TYPE, "text/html")], "<html></html>") }))
        .route("/empty.png", get(|| async { ([(CONTENT_TYPE, "image/png")], Vec::<u8>::new()) }))
        .route("/gone", get(|| async { StatusCode::NOT_FOUND }))
        .route("/huge.png", get(|| async { ([(CONTENT_TYPE, "image/png")], vec![0_u8; 4096]) }))
}

#[tokio::test]
async fn http_fetcher_classifies_responses() {
    let base = serve(image_routes()).await;
    let fetcher = HttpImageFetcher::new(Duration::from_secs(5), 1024).unwrap();

    let typed = fetcher.fetch(&format!("{base}/typed.png")).await.unwrap();
    assert_eq!(typed.mime_type, "image/png");
    assert_eq!(typed.bytes, png_bytes());

    let sniffed = fetcher.fetch(&format!("{base}/octet")).await.unwrap();
    assert_eq!(sniffed.mime_type, "image/png");

    let page = fetcher.fetch(&format!("{base}/page")).await.unwrap_err();
    assert!(matches!(page, EditorError::NotAnImage { content_type: Some(ref ct), .. } if ct == "text/html"));

    let empty = fetcher.fetch(&format!("{base}/empty.png")).await.unwrap_err();
    assert!(matches!(empty, EditorError::EmptyImage(_)));

    let gone = fetcher.fetch(&format!("{base}/gone")).await.unwrap_err();
    assert!(matches!(gone, EditorError::Fetch(_)));
    assert!(gone.retryable());

    let huge = fetcher.fetch(&format!("{base}/huge.png")).await.unwrap_err();
    assert!(matches!(huge, EditorError::TooLarge { limit: 1024, .. }));
    assert_eq!(huge.error_code(), "E_IMAGE_TOO_LARGE");
}

#[tokio::test]
async fn http_fetcher_caps_bodies_without_content_length() {
    let streamed = Router::new().route(
        "/chunked.png",
        get(|| async {
            let chunks = (0..8).map(|_| Ok::<_, std::io::Error>(vec![0_u8; 512]));
            axum::body::Body::from_stream(futures::stream::iter(chunks))
        }),
    );
    let base = serve(streamed).await;
    let fetcher = HttpImageFetcher::new(Duration::from_secs(5), 1024).unwrap();

    let err = fetcher.fetch(&format!("{base}/chunked.png")).await.unwrap_err();
    assert!(matches!(err, EditorError::TooLarge { .. }));
}
