//! Postgres scene store.
//!
//! DESIGN
//! ======
//! Rows live in the `whiteboards` table. A trigger publishes the row id on the
//! `whiteboard_changes` channel after every insert/update; subscribers hold a
//! `PgListener`, filter payloads by board id, and re-read the row so the
//! notification payload stays small regardless of scene size.
//!
//! ERROR HANDLING
//! ==============
//! `PgListener` reconnects on its own after a dropped connection; notifications
//! sent while disconnected are lost. A listener error is logged and the loop
//! keeps going until the subscriber drops its receiver.

use std::time::Duration;

use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{CHANGE_CHANNEL_CAPACITY, SceneStore, StoreError, WhiteboardRow};

const CHANGE_CHANNEL: &str = "whiteboard_changes";
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

const ROW_COLUMNS: &str =
    "id, name, scene_data, revision, updated_by, (extract(epoch FROM updated_at) * 1000)::bigint AS updated_at_ms";

type RowTuple = (Uuid, String, Value, i64, Option<Uuid>, i64);

fn to_row((id, name, scene_data, revision, updated_by, updated_at_ms): RowTuple) -> WhiteboardRow {
    WhiteboardRow { id, name, scene_data, revision, updated_by, updated_at_ms }
}

#[derive(Clone)]
pub struct PgSceneStore {
    pool: PgPool,
}

impl PgSceneStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_by_id(pool: &PgPool, id: Uuid) -> Result<Option<WhiteboardRow>, sqlx::Error> {
        let row = sqlx::query_as::<_, RowTuple>(&format!("SELECT {ROW_COLUMNS} FROM whiteboards WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(to_row))
    }
}

#[async_trait::async_trait]
impl SceneStore for PgSceneStore {
    async fn load_by_name(&self, name: &str) -> Result<Option<WhiteboardRow>, StoreError> {
        let row = sqlx::query_as::<_, RowTuple>(&format!("SELECT {ROW_COLUMNS} FROM whiteboards WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(to_row))
    }

    async fn create(&self, name: &str, scene_data: &Value, editor: Uuid) -> Result<WhiteboardRow, StoreError> {
        let result = sqlx::query_as::<_, RowTuple>(&format!(
            "INSERT INTO whiteboards (id, name, scene_data, revision, updated_by, updated_at) \
             VALUES ($1, $2, $3, 1, $4, now()) \
             RETURNING {ROW_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(scene_data)
        .bind(editor)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(to_row(row)),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::AlreadyExists(name.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, id: Uuid, scene_data: &Value, editor: Uuid) -> Result<WhiteboardRow, StoreError> {
        let row = sqlx::query_as::<_, RowTuple>(&format!(
            "UPDATE whiteboards \
             SET scene_data = $2, updated_by = $3, revision = revision + 1, updated_at = now() \
             WHERE id = $1 \
             RETURNING {ROW_COLUMNS}"
        ))
        .bind(id)
        .bind(scene_data)
        .bind(editor)
        .fetch_optional(&self.pool)
        .await?;

        row.map(to_row).ok_or(StoreError::NotFound(id))
    }

    async fn subscribe(&self, id: Uuid) -> Result<mpsc::Receiver<WhiteboardRow>, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);
        let pool = self.pool.clone();
        let wanted = id.to_string();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    () = tx.closed() => break,
                    received = listener.recv() => received,
                };
                let notification = match received {
                    Ok(notification) => notification,
                    Err(e) => {
                        warn!(error = %e, %id, "whiteboard listener error; retrying");
                        tokio::time::sleep(LISTENER_RETRY_DELAY).await;
                        continue;
                    }
                };
                if notification.payload() != wanted {
                    continue;
                }

                match Self::load_by_id(&pool, id).await {
                    Ok(Some(row)) => {
                        debug!(%id, revision = row.revision, "whiteboard change received");
                        if tx.send(row).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => warn!(%id, "notified whiteboard no longer exists"),
                    Err(e) => error!(error = %e, %id, "failed to read notified whiteboard"),
                }
            }
        });

        Ok(rx)
    }
}
