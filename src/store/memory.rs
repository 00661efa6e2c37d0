//! In-memory scene store.
//!
//! Used when no database is configured and as the store double in tests.
//! Change notifications fan out through a broadcast channel, filtered per
//! subscriber by board id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::warn;
use uuid::Uuid;

use super::{CHANGE_CHANNEL_CAPACITY, SceneStore, StoreError, WhiteboardRow};
use crate::clock::now_ms;

const BROADCAST_CAPACITY: usize = 256;

pub struct MemorySceneStore {
    rows: RwLock<HashMap<Uuid, WhiteboardRow>>,
    changes: broadcast::Sender<WhiteboardRow>,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl MemorySceneStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { rows: RwLock::new(HashMap::new()), changes, writes: AtomicU64::new(0), unavailable: AtomicBool::new(false) }
    }

    /// Number of successful create/update calls.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    fn publish(&self, row: &WhiteboardRow) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        // No subscribers is fine.
        let _ = self.changes.send(row.clone());
    }
}

impl Default for MemorySceneStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SceneStore for MemorySceneStore {
    async fn load_by_name(&self, name: &str) -> Result<Option<WhiteboardRow>, StoreError> {
        self.check_available()?;
        let rows = self.rows.read().await;
        Ok(rows.values().find(|row| row.name == name).cloned())
    }

    async fn create(&self, name: &str, scene_data: &Value, editor: Uuid) -> Result<WhiteboardRow, StoreError> {
        self.check_available()?;
        let row = {
            let mut rows = self.rows.write().await;
            if rows.values().any(|row| row.name == name) {
                return Err(StoreError::AlreadyExists(name.to_owned()));
            }
            let row = WhiteboardRow {
                id: Uuid::new_v4(),
                name: name.to_owned(),
                scene_data: scene_data.clone(),
                revision: 1,
                updated_by: Some(editor),
                updated_at_ms: now_ms(),
            };
            rows.insert(row.id, row.clone());
            row
        };
        self.publish(&row);
        Ok(row)
    }

    async fn update(&self, id: Uuid, scene_data: &Value, editor: Uuid) -> Result<WhiteboardRow, StoreError> {
        self.check_available()?;
        let row = {
            let mut rows = self.rows.write().await;
            let row = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            row.scene_data = scene_data.clone();
            row.revision += 1;
            row.updated_by = Some(editor);
            row.updated_at_ms = now_ms();
            row.clone()
        };
        self.publish(&row);
        Ok(row)
    }

    async fn subscribe(&self, id: Uuid) -> Result<mpsc::Receiver<WhiteboardRow>, StoreError> {
        self.check_available()?;
        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    () = tx.closed() => break,
                    received = changes.recv() => received,
                };
                match received {
                    Ok(row) if row.id == id => {
                        if tx.send(row).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(%id, skipped, "memory store subscriber lagged; rows dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
