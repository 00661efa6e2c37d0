//! Live map service — a whiteboard scene kept in sync with a remote row.
//!
//! ARCHITECTURE
//! ============
//! - `scene`: document model and normalization rules.
//! - `store`: persisted whiteboard rows and change notifications.
//! - `surface`: the imperative drawing-surface API the sync layer drives.
//! - `services`: sync controller, live viewer, editor, fallback raster.
//! - `routes`: HTTP + websocket surface over the viewer and editor.

pub mod camera;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod scene;
pub mod services;
pub mod state;
pub mod store;
pub mod surface;
