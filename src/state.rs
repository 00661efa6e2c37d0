//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the configuration, the live viewer mirroring the board, and the
//! editor session when admin editing is enabled.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::editor::WhiteboardEditor;
use crate::services::viewer::LiveViewer;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub viewer: Arc<LiveViewer>,
    /// `None` when editing is disabled or the editor failed to open.
    pub editor: Option<Arc<WhiteboardEditor>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, viewer: Arc<LiveViewer>, editor: Option<Arc<WhiteboardEditor>>) -> Self {
        Self { config: Arc::new(config), viewer, editor }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::time::Duration;

    use super::*;
    use crate::config::SyncConfig;
    use crate::services::editor::ImageFetcher;
    use crate::services::sync::SyncController;
    use crate::store::MemorySceneStore;
    use crate::surface::HeadlessSurface;

    pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";

    pub struct TestApp {
        pub state: AppState,
        pub store: Arc<MemorySceneStore>,
        pub viewer_surface: Arc<HeadlessSurface>,
        pub editor_surface: Arc<HeadlessSurface>,
    }

    /// Memory-backed state with editing enabled. The autosave delay is long so
    /// tests drive saves explicitly.
    pub async fn test_app(fetcher: Arc<dyn ImageFetcher>) -> TestApp {
        let config = AppConfig {
            admin_token: Some(TEST_ADMIN_TOKEN.to_owned()),
            sync: SyncConfig { autosave_delay: Duration::from_secs(30) },
            ..AppConfig::default()
        };
        let store = Arc::new(MemorySceneStore::new());

        let viewer_surface = Arc::new(HeadlessSurface::with_viewport(800.0, 600.0));
        let viewer = Arc::new(LiveViewer::new(
            store.clone(),
            config.whiteboard_name.clone(),
            viewer_surface.clone(),
            config.fit,
            config.render,
        ));
        viewer.load().await.expect("viewer loads from memory store");

        let editor_surface = Arc::new(HeadlessSurface::with_viewport(800.0, 600.0));
        let sync = Arc::new(SyncController::new(store.clone(), config.whiteboard_name.clone(), config.sync));
        let editor = WhiteboardEditor::open(sync, editor_surface.clone(), fetcher).await.expect("editor opens");

        TestApp {
            state: AppState::new(config, viewer, Some(Arc::new(editor))),
            store,
            viewer_surface,
            editor_surface,
        }
    }

    /// Same as [`test_app`] with editing disabled.
    pub async fn test_app_read_only(fetcher: Arc<dyn ImageFetcher>) -> TestApp {
        let mut app = test_app(fetcher).await;
        let mut config = (*app.state.config).clone();
        config.admin_token = None;
        app.state = AppState::new(config, app.state.viewer.clone(), None);
        app
    }
}
