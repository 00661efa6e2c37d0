//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! - `sync`: the authoritative local scene, debounced saves, echo suppression.
//! - `viewer`: read-only mirror of the board with follow/center camera logic.
//! - `editor`: admin session over `sync` with the gallery image insert flow.
//! - `raster`: static PNG fallback for viewers whose live surface fails.
//!
//! Route handlers stay focused on protocol translation and auth plumbing.

pub mod editor;
pub mod raster;
pub mod sync;
pub mod viewer;
