//! Scene store — persisted whiteboard rows and change notifications.
//!
//! DESIGN
//! ======
//! A whiteboard is one row: `{id, name, scene_data, revision, updated_by}`.
//! `scene_data` is an opaque JSON document; the store never interprets it.
//! Every update bumps `revision` and records the writing client, which the
//! sync controller uses to recognise its own echoes.
//!
//! Subscriptions deliver the full updated row for a single board id. Delivery
//! is best-effort: a lagging or reconnecting listener may miss rows, which is
//! tolerable because every row is a full-replacement snapshot.

pub mod memory;
pub mod postgres;

pub use memory::MemorySceneStore;
pub use postgres::PgSceneStore;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::scene::Scene;

/// Buffer for rows forwarded to one subscriber.
pub const CHANGE_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("whiteboard not found: {0}")]
    NotFound(Uuid),
    #[error("whiteboard already exists: {0}")]
    AlreadyExists(String),
    #[error("scene store unavailable")]
    Unavailable,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_WHITEBOARD_NOT_FOUND",
            Self::AlreadyExists(_) => "E_WHITEBOARD_EXISTS",
            Self::Unavailable => "E_STORE_UNAVAILABLE",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Database(_))
    }
}

/// One persisted whiteboard.
#[derive(Debug, Clone, PartialEq)]
pub struct WhiteboardRow {
    pub id: Uuid,
    pub name: String,
    pub scene_data: Value,
    /// Monotonic per-row counter, bumped by every update.
    pub revision: i64,
    /// Client that wrote this revision, if known.
    pub updated_by: Option<Uuid>,
    pub updated_at_ms: i64,
}

impl WhiteboardRow {
    /// Parse `scene_data`, degrading malformed parts to empty.
    #[must_use]
    pub fn scene(&self) -> Scene {
        Scene::from_value(&self.scene_data)
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Backend-neutral scene persistence. Enables mocking in tests.
#[async_trait::async_trait]
pub trait SceneStore: Send + Sync {
    /// Point read by board name.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend cannot be reached.
    async fn load_by_name(&self, name: &str) -> Result<Option<WhiteboardRow>, StoreError>;

    /// Create the named board with an initial scene.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the name is taken.
    async fn create(&self, name: &str, scene_data: &Value, editor: Uuid) -> Result<WhiteboardRow, StoreError>;

    /// Replace the scene of an existing board and return the stored row.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no row has this id.
    async fn update(&self, id: Uuid, scene_data: &Value, editor: Uuid) -> Result<WhiteboardRow, StoreError>;

    /// Receive every subsequent row written for `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the subscription cannot be established.
    async fn subscribe(&self, id: Uuid) -> Result<mpsc::Receiver<WhiteboardRow>, StoreError>;
}
