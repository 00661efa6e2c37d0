use std::sync::Arc;

use livemap::config::AppConfig;
use livemap::services::editor::{HttpImageFetcher, WhiteboardEditor};
use livemap::services::sync::SyncController;
use livemap::services::viewer::LiveViewer;
use livemap::state::AppState;
use livemap::store::{MemorySceneStore, PgSceneStore, SceneStore};
use livemap::surface::HeadlessSurface;
use livemap::{db, routes};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();

    let store: Arc<dyn SceneStore> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgSceneStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory scene store");
            Arc::new(MemorySceneStore::new())
        }
    };

    let viewer = Arc::new(LiveViewer::new(
        store.clone(),
        config.whiteboard_name.clone(),
        Arc::new(HeadlessSurface::new()),
        config.fit,
        config.render,
    ));
    if let Err(e) = viewer.load().await {
        tracing::error!(error = %e, "initial viewer load failed; live updates will retry");
    }
    let _live_updates = viewer.spawn_live_updates();

    let editor = if config.admin_token.is_some() {
        open_editor(&config, store.clone()).await
    } else {
        tracing::info!("ADMIN_TOKEN not set; editor routes disabled");
        None
    };

    let port = config.port;
    let board = config.whiteboard_name.clone();
    let state = AppState::new(config, viewer, editor);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, %board, "livemap listening");
    axum::serve(listener, app).await.expect("server failed");
}

/// Open the editor session and start its remote listener. Failures are
/// logged and leave editing unavailable instead of stopping the viewer.
async fn open_editor(config: &AppConfig, store: Arc<dyn SceneStore>) -> Option<Arc<WhiteboardEditor>> {
    let fetcher = match HttpImageFetcher::new(config.image_fetch_timeout, config.image_max_bytes) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            tracing::error!(error = %e, "image fetcher init failed; editor disabled");
            return None;
        }
    };

    let sync = Arc::new(SyncController::new(store, config.whiteboard_name.clone(), config.sync));
    match WhiteboardEditor::open(sync.clone(), Arc::new(HeadlessSurface::new()), fetcher).await {
        Ok(editor) => {
            // Detached for the process lifetime.
            let _ = sync.spawn_remote_listener();
            Some(Arc::new(editor))
        }
        Err(e) => {
            tracing::error!(error = %e, "editor session failed to open; editor disabled");
            None
        }
    }
}
