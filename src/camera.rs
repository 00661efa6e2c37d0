//! Camera math — content bounds, viewport center, and fit-to-content.
//!
//! Scene coordinates follow the drawing surface convention:
//! `screen = (scene + scroll) * zoom`, with the viewport origin at the
//! surface's top-left corner.

use crate::scene::{Element, ViewportState};

/// Viewport size assumed when the surface has not reported one.
pub const FALLBACK_VIEWPORT: (f64, f64) = (1280.0, 720.0);

const DEFAULT_FIT_ZOOM_FACTOR: f64 = 0.9;
const DEFAULT_FIT_MIN_ZOOM: f64 = 0.1;
const DEFAULT_FIT_MAX_ZOOM: f64 = 1.0;

/// A point in scene space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounds in scene space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }
}

/// Fit-to-content tuning: `zoom_factor` leaves a margin around the content,
/// the result is bounded by `[min_zoom, max_zoom]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub zoom_factor: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self { zoom_factor: DEFAULT_FIT_ZOOM_FACTOR, min_zoom: DEFAULT_FIT_MIN_ZOOM, max_zoom: DEFAULT_FIT_MAX_ZOOM }
    }
}

impl FitOptions {
    /// Replace non-positive or inverted values with defaults.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let zoom_factor = if self.zoom_factor > 0.0 { self.zoom_factor } else { defaults.zoom_factor };
        let (min_zoom, max_zoom) = if self.min_zoom > 0.0 && self.max_zoom >= self.min_zoom {
            (self.min_zoom, self.max_zoom)
        } else {
            (defaults.min_zoom, defaults.max_zoom)
        };
        Self { zoom_factor, min_zoom, max_zoom }
    }
}

/// Camera placement produced by a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraFit {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub zoom: f64,
}

/// Union of element boxes, each rotated by its `angle` about its center.
/// `None` for an empty slice.
#[must_use]
pub fn element_bounds(elements: &[Element]) -> Option<Bounds> {
    elements.iter().map(element_box).reduce(|a, b| Bounds {
        min_x: a.min_x.min(b.min_x),
        min_y: a.min_y.min(b.min_y),
        max_x: a.max_x.max(b.max_x),
        max_y: a.max_y.max(b.max_y),
    })
}

fn element_box(el: &Element) -> Bounds {
    let (x0, x1) = ordered(el.x, el.x + el.width);
    let (y0, y1) = ordered(el.y, el.y + el.height);
    let angle = el.prop_f64("angle").unwrap_or(0.0);
    if angle.abs() < f64::EPSILON {
        return Bounds { min_x: x0, min_y: y0, max_x: x1, max_y: y1 };
    }

    let (sin, cos) = angle.sin_cos();
    let (hx, hy) = ((x1 - x0) / 2.0, (y1 - y0) / 2.0);
    let ex = (hx * cos).abs() + (hy * sin).abs();
    let ey = (hx * sin).abs() + (hy * cos).abs();
    let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);
    Bounds { min_x: cx - ex, min_y: cy - ey, max_x: cx + ex, max_y: cy + ey }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Viewport size from the surface state, falling back when unreported.
#[must_use]
pub fn viewport_size(state: &ViewportState) -> (f64, f64) {
    match (state.width, state.height) {
        (Some(w), Some(h)) if w > 0.0 && h > 0.0 => (w, h),
        _ => FALLBACK_VIEWPORT,
    }
}

/// Camera that centers `bounds` in a `width` x `height` viewport.
#[must_use]
pub fn fit_camera(bounds: Bounds, width: f64, height: f64, opts: FitOptions) -> CameraFit {
    let opts = opts.sanitized();
    let content_w = bounds.width().max(1.0);
    let content_h = bounds.height().max(1.0);
    let raw = (width / content_w).min(height / content_h) * opts.zoom_factor;
    let zoom = raw.max(opts.min_zoom).min(opts.max_zoom);
    let center = bounds.center();
    CameraFit {
        scroll_x: width / (2.0 * zoom) - center.x,
        scroll_y: height / (2.0 * zoom) - center.y,
        zoom,
    }
}

/// Scene coordinates of the viewport center.
#[must_use]
pub fn viewport_center(state: &ViewportState) -> Point {
    let (width, height) = viewport_size(state);
    let zoom = if state.zoom.value > 0.0 { state.zoom.value } else { 1.0 };
    Point::new(width / (2.0 * zoom) - state.scroll_x, height / (2.0 * zoom) - state.scroll_y)
}

#[cfg(test)]
#[path = "camera_test.rs"]
mod tests;
