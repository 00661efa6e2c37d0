//! Whiteboard editor — authoring session over the sync controller.
//!
//! DESIGN
//! ======
//! The editor owns a drawing surface bound to a `SyncController` and adds
//! the admin operations on top: feed a local edit, save, reset, and import
//! gallery images. Image insertion goes through the surface's imperative
//! API, which raises no change event, so every placement is followed by an
//! explicit state capture to let dirty tracking see the new element.
//!
//! ERROR HANDLING
//! ==============
//! A failed download or a non-image response is reported per URL. Images
//! already inserted in the same batch stay in place.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::sync::{ChangeOutcome, SaveReport, SyncController, SyncError, SyncStatus};
use crate::camera;
use crate::clock::now_ms;
use crate::error::ErrorCode;
use crate::scene::{Element, FilePayload, Scene};
use crate::surface::{DrawingSurface, SceneUpdate};

/// Scene size of an inserted gallery image.
pub const INSERT_WIDTH: f64 = 400.0;
pub const INSERT_HEIGHT: f64 = 300.0;
/// Diagonal offset between consecutive inserts of one batch.
pub const INSERT_STAGGER: f64 = 50.0;

const GALLERY_FILE_PREFIX: &str = "gallery_";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("image download failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("not an image: {url} ({})", .content_type.as_deref().unwrap_or("no content type"))]
    NotAnImage { url: String, content_type: Option<String> },
    #[error("image is empty: {0}")]
    EmptyImage(String),
    #[error("image exceeds {limit} bytes: {url}")]
    TooLarge { url: String, limit: usize },
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl ErrorCode for EditorError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "E_IMAGE_FETCH",
            Self::NotAnImage { .. } => "E_NOT_AN_IMAGE",
            Self::EmptyImage(_) => "E_EMPTY_IMAGE",
            Self::TooLarge { .. } => "E_IMAGE_TOO_LARGE",
            Self::Sync(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Fetch(_) => true,
            Self::NotAnImage { .. } | Self::EmptyImage(_) | Self::TooLarge { .. } => false,
            Self::Sync(e) => e.retryable(),
        }
    }
}

// =============================================================================
// IMAGE FETCHING
// =============================================================================

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Downloads gallery images. Enables mocking in tests.
#[async_trait::async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, EditorError>;
}

/// `reqwest` fetcher for publicly reachable image URLs, capped at `max_bytes`.
pub struct HttpImageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpImageFetcher {
    /// # Errors
    ///
    /// Returns [`EditorError::Fetch`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, EditorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait::async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, EditorError> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;
        let too_large = || EditorError::TooLarge { url: url.to_owned(), limit: self.max_bytes };
        if response.content_length().is_some_and(|len| len > u64::try_from(self.max_bytes).unwrap_or(u64::MAX)) {
            return Err(too_large());
        }
        let declared = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase());
        // Content-Length can be absent or wrong; enforce the cap while reading.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(EditorError::EmptyImage(url.to_owned()));
        }

        // Storage buckets often serve images as octet-stream; trust the bytes then.
        let mime_type = match declared {
            Some(mime) if mime.starts_with("image/") => mime,
            other => match image::guess_format(&bytes) {
                Ok(format) => format.to_mime_type().to_owned(),
                Err(_) => return Err(EditorError::NotAnImage { url: url.to_owned(), content_type: other }),
            },
        };
        Ok(FetchedImage { bytes, mime_type })
    }
}

// =============================================================================
// EDITOR
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct InsertedImage {
    pub url: String,
    pub file_id: String,
    pub element_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedImage {
    pub url: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsertReport {
    pub inserted: Vec<InsertedImage>,
    pub failed: Vec<FailedImage>,
    /// Dirty-tracking result of the final state capture.
    pub change: ChangeOutcome,
}

pub struct WhiteboardEditor {
    sync: Arc<SyncController>,
    surface: Arc<dyn DrawingSurface>,
    fetcher: Arc<dyn ImageFetcher>,
}

impl WhiteboardEditor {
    /// Load the board and bind `surface` to it.
    ///
    /// # Errors
    ///
    /// Returns [`EditorError::Sync`] if the initial load fails.
    pub async fn open(
        sync: Arc<SyncController>,
        surface: Arc<dyn DrawingSurface>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Result<Self, EditorError> {
        sync.load().await?;
        sync.attach(surface.clone())?;
        Ok(Self { sync, surface, fetcher })
    }

    #[must_use]
    pub fn sync(&self) -> &Arc<SyncController> {
        &self.sync
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// Replace the surface content with `scene`, as a user edit would, and
    /// hand the result to dirty tracking.
    pub fn apply_local_edit(&self, scene: Scene) -> ChangeOutcome {
        self.surface.add_files(scene.files.into_values().collect());
        self.surface.update_scene(SceneUpdate { elements: Some(scene.elements), app_state: Some(scene.app_state) });
        self.sync.capture_current_state()
    }

    /// # Errors
    ///
    /// Returns [`EditorError::Sync`] if the write fails.
    pub async fn save(&self) -> Result<SaveReport, EditorError> {
        Ok(self.sync.save_now().await?)
    }

    /// # Errors
    ///
    /// Returns [`EditorError::Sync`] if the write fails.
    pub async fn reset(&self) -> Result<SaveReport, EditorError> {
        Ok(self.sync.reset_whiteboard().await?)
    }

    /// Download each URL and place it as an image element around the current
    /// viewport center, staggered so a batch does not stack exactly.
    pub async fn insert_gallery_images(&self, urls: &[String]) -> InsertReport {
        let center = camera::viewport_center(&self.surface.app_state());
        let mut inserted = Vec::new();
        let mut failed = Vec::new();
        let mut offset = 0.0;

        for url in urls {
            let placement = offset;
            offset += INSERT_STAGGER;

            let image = match self.fetcher.fetch(url).await {
                Ok(image) => image,
                Err(e) => {
                    warn!(%url, error = %e, "gallery image insert failed");
                    failed.push(FailedImage { url: url.clone(), code: e.error_code(), message: e.to_string() });
                    continue;
                }
            };

            let file_id = format!("{GALLERY_FILE_PREFIX}{}", Uuid::new_v4().simple());
            self.surface.add_files(vec![FilePayload::from_bytes(&file_id, &image.mime_type, &image.bytes, now_ms())]);

            let element = Element::image(
                &file_id,
                center.x - INSERT_WIDTH / 2.0 + placement,
                center.y - INSERT_HEIGHT / 2.0 + placement,
                INSERT_WIDTH,
                INSERT_HEIGHT,
            );
            let element_id = element.id.clone();
            let mut elements = self.surface.scene_elements();
            elements.push(element);
            self.surface.update_scene(SceneUpdate { elements: Some(elements), app_state: None });
            // Mark the batch dirty before the next fetch yields, so a remote row
            // arriving mid-batch is deferred instead of replacing these images.
            self.sync.capture_current_state();

            inserted.push(InsertedImage { url: url.clone(), file_id, element_id });
        }

        let change = self.sync.capture_current_state();
        info!(inserted = inserted.len(), failed = failed.len(), ?change, "gallery images inserted");
        InsertReport { inserted, failed, change }
    }
}

#[cfg(test)]
#[path = "editor_test.rs"]
mod tests;
