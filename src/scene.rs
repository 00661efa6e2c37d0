//! Scene model — elements, binary files, and viewport state for one board.
//!
//! DESIGN
//! ======
//! A scene is persisted as one opaque JSON document. Only the fields the sync
//! layer reasons about are typed; everything else a drawing surface writes is
//! kept in `extra` maps and round-trips untouched.
//!
//! NORMALIZATION
//! =============
//! Before any render, camera fit, or export:
//! 1. tombstoned elements (`isDeleted`) are dropped;
//! 2. image status is re-derived from file presence (`saved` / `error`).
//! The renderable set additionally drops images that did not end up `saved`.
//!
//! ERROR HANDLING
//! ==============
//! Malformed payloads never fail a load. A non-array `elements`, a missing
//! `files` object, or an individual element that does not parse is logged
//! and treated as absent.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

pub const KIND_IMAGE: &str = "image";

pub type FileId = String;
pub type Files = BTreeMap<FileId, FilePayload>;

// =============================================================================
// ELEMENT
// =============================================================================

/// Load state of an image element's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Saved,
    Error,
}

/// One drawing primitive. `kind` is the surface's element type
/// (`rectangle`, `ellipse`, `text`, `image`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ImageStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Element {
    /// New image element bound to `file_id`, already marked `saved`.
    #[must_use]
    pub fn image(file_id: &str, x: f64, y: f64, width: f64, height: f64) -> Self {
        let mut extra = Map::new();
        extra.insert("angle".into(), Value::from(0));
        extra.insert("strokeColor".into(), Value::from("transparent"));
        extra.insert("backgroundColor".into(), Value::from("transparent"));
        extra.insert("opacity".into(), Value::from(100));
        extra.insert("version".into(), Value::from(1));
        extra.insert("scale".into(), serde_json::json!([1, 1]));

        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            kind: KIND_IMAGE.to_owned(),
            x,
            y,
            width,
            height,
            is_deleted: false,
            file_id: Some(file_id.to_owned()),
            status: Some(ImageStatus::Saved),
            extra,
        }
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        self.kind == KIND_IMAGE
    }

    /// String property from the surface-specific fields.
    #[must_use]
    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Numeric property from the surface-specific fields.
    #[must_use]
    pub fn prop_f64(&self, key: &str) -> Option<f64> {
        self.extra.get(key).and_then(Value::as_f64)
    }
}

// =============================================================================
// FILES
// =============================================================================

/// Binary image payload, carried as a base64 data URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub id: FileId,
    pub mime_type: String,
    #[serde(rename = "dataURL")]
    pub data_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FilePayload {
    #[must_use]
    pub fn from_bytes(id: &str, mime_type: &str, bytes: &[u8], created_ms: i64) -> Self {
        Self {
            id: id.to_owned(),
            mime_type: mime_type.to_owned(),
            data_url: format!("data:{mime_type};base64,{}", STANDARD.encode(bytes)),
            created: Some(created_ms),
            extra: Map::new(),
        }
    }

    /// Decode the data URL body. `None` if it is not a base64 data URL.
    #[must_use]
    pub fn decode_bytes(&self) -> Option<Vec<u8>> {
        let (_, body) = self.data_url.split_once(";base64,")?;
        STANDARD.decode(body.trim()).ok()
    }
}

// =============================================================================
// VIEWPORT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zoom {
    pub value: f64,
}

impl Default for Zoom {
    fn default() -> Self {
        Self { value: 1.0 }
    }
}

/// Camera and canvas settings persisted with the scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportState {
    #[serde(default)]
    pub scroll_x: f64,
    #[serde(default)]
    pub scroll_y: f64,
    #[serde(default)]
    pub zoom: Zoom,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_background_color: Option<String>,
    /// Surface size in CSS pixels, when the surface reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =============================================================================
// SCENE
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneStats {
    pub element_count: usize,
    pub file_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub app_state: ViewportState,
    #[serde(default)]
    pub files: Files,
}

impl Scene {
    /// Parse a stored scene document, degrading malformed parts to empty.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            if !value.is_null() {
                warn!(kind = json_kind(value), "scene document is not an object; treating as empty");
            }
            return Self::default();
        };

        let elements = match obj.get("elements") {
            Some(Value::Array(items)) => items.iter().filter_map(parse_element).collect(),
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                warn!(kind = json_kind(other), "scene elements is not an array; treating as empty");
                Vec::new()
            }
        };

        let files = match obj.get("files") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(key, raw)| parse_file(key, raw).map(|file| (key.clone(), file)))
                .collect(),
            None | Some(Value::Null) => Files::new(),
            Some(other) => {
                warn!(kind = json_kind(other), "scene files is not an object; treating as empty");
                Files::new()
            }
        };

        let app_state = match obj.get("appState") {
            None | Some(Value::Null) => ViewportState::default(),
            Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
                warn!(error = %e, "scene appState is malformed; using defaults");
                ViewportState::default()
            }),
        };

        Self { elements, app_state, files }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    #[must_use]
    pub fn stats(&self) -> SceneStats {
        SceneStats { element_count: self.elements.len(), file_count: self.files.len() }
    }

    /// Copy of this scene with tombstones dropped and image status corrected.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            elements: normalize_elements(&self.elements, &self.files),
            app_state: self.app_state.clone(),
            files: self.files.clone(),
        }
    }

    #[must_use]
    pub fn renderable_elements(&self) -> Vec<Element> {
        renderable_elements(&self.elements, &self.files)
    }

    /// Content hash over the normalized elements and the files.
    ///
    /// Viewport changes, tombstones, and status corrections do not change the
    /// fingerprint, so re-renders of the same content compare equal.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.elements, &self.files)
    }
}

/// Drop tombstones and force image status from file presence.
#[must_use]
pub fn normalize_elements(elements: &[Element], files: &Files) -> Vec<Element> {
    normalize_with(elements, files, true)
}

/// Normalized elements that can actually be drawn: no images without bytes.
#[must_use]
pub fn renderable_elements(elements: &[Element], files: &Files) -> Vec<Element> {
    normalize_elements(elements, files)
        .into_iter()
        .filter(|el| !el.is_image() || el.status == Some(ImageStatus::Saved))
        .collect()
}

/// Files referenced by the given elements.
#[must_use]
pub fn referenced_files(elements: &[Element], files: &Files) -> Files {
    elements
        .iter()
        .filter_map(|el| el.file_id.as_ref())
        .filter_map(|id| files.get(id).map(|file| (id.clone(), file.clone())))
        .collect()
}

#[must_use]
pub fn fingerprint(elements: &[Element], files: &Files) -> String {
    #[derive(Serialize)]
    struct Content<'a> {
        elements: &'a [Element],
        files: &'a Files,
    }

    let normalized = normalize_with(elements, files, false);
    let bytes = serde_json::to_vec(&Content { elements: &normalized, files }).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect::<String>()
}

// `report_missing` is off for fingerprinting, which runs on every local change.
fn normalize_with(elements: &[Element], files: &Files, report_missing: bool) -> Vec<Element> {
    elements
        .iter()
        .filter(|el| !el.is_deleted)
        .map(|el| {
            let mut el = el.clone();
            if el.is_image() {
                let present = el.file_id.as_ref().is_some_and(|id| files.contains_key(id));
                if !present && report_missing && el.status != Some(ImageStatus::Error) {
                    warn!(element_id = %el.id, file_id = ?el.file_id, "image file missing; marking element as error");
                }
                el.status = Some(if present { ImageStatus::Saved } else { ImageStatus::Error });
            }
            el
        })
        .collect()
}

// =============================================================================
// HELPERS
// =============================================================================

fn parse_element(raw: &Value) -> Option<Element> {
    match serde_json::from_value::<Element>(raw.clone()) {
        Ok(el) => Some(el),
        Err(e) => {
            warn!(error = %e, "skipping malformed scene element");
            None
        }
    }
}

fn parse_file(key: &str, raw: &Value) -> Option<FilePayload> {
    let mut raw = raw.clone();
    if let Value::Object(map) = &mut raw {
        map.entry("id").or_insert_with(|| Value::from(key));
    }
    match serde_json::from_value::<FilePayload>(raw) {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(error = %e, file_id = key, "skipping malformed scene file");
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[path = "scene_test.rs"]
mod tests;
