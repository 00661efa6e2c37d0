//! Fallback raster — draws the renderable element set to a static PNG.
//!
//! DESIGN
//! ======
//! Used when the live drawing surface cannot be confirmed to show content.
//! Elements go through the same normalization as the live path, so
//! tombstones and images without bytes never appear here either.
//!
//! Shapes are rasterized per pixel from signed distance functions (negative
//! inside), which gives anti-aliased fills and strokes plus rotation for
//! free. Text is laid out line by line with a bundled sans font and drawn
//! in the stroke color, unrotated. Image elements are decoded, resized, and
//! composited without rotation.

use std::io::Cursor;
use std::sync::LazyLock;

use ab_glyph::{Font, FontArc, GlyphId, ScaleFont, point};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::Value;
use tracing::warn;

use crate::camera;
use crate::config::RenderLimits;
use crate::error::ErrorCode;
use crate::scene::{self, Element, Files};

/// Margin around the content, in scene units.
const PADDING: f64 = 40.0;
const DEFAULT_BACKGROUND: [u8; 3] = [0xff, 0xff, 0xff];
const DEFAULT_STROKE: [u8; 3] = [0x1e, 0x1e, 0x1e];
const DEFAULT_STROKE_WIDTH: f64 = 2.0;
const DEFAULT_FONT_SIZE: f64 = 20.0;
const MISSING_IMAGE_FILL: [u8; 3] = [0xe0, 0xe0, 0xe0];

static FONT: LazyLock<Option<FontArc>> = LazyLock::new(|| {
    match FontArc::try_from_slice(include_bytes!("../../assets/fonts/DejaVuSans.ttf")) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!(error = %e, "bundled font failed to load; text will not be rendered");
            None
        }
    }
});

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("nothing to render")]
    Empty,
    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

impl ErrorCode for RasterError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Empty => "E_RENDER_EMPTY",
            Self::Encode(_) => "E_RENDER_ENCODE",
        }
    }
}

/// Render the renderable subset of `elements` to PNG bytes, fitted inside `limits`.
///
/// Never upscales: content smaller than the limits renders at scale 1.
///
/// # Errors
///
/// Returns [`RasterError::Empty`] when no element survives normalization.
pub fn render_png(
    elements: &[Element],
    files: &Files,
    background: Option<&str>,
    limits: RenderLimits,
) -> Result<Vec<u8>, RasterError> {
    let renderable = scene::renderable_elements(elements, files);
    let Some(bounds) = camera::element_bounds(&renderable) else {
        return Err(RasterError::Empty);
    };

    let content_w = bounds.width() + 2.0 * PADDING;
    let content_h = bounds.height() + 2.0 * PADDING;
    let scale = (f64::from(limits.max_width.max(1)) / content_w)
        .min(f64::from(limits.max_height.max(1)) / content_h)
        .min(1.0);
    let view = View { origin_x: bounds.min_x - PADDING, origin_y: bounds.min_y - PADDING, scale };

    let bg = background.and_then(parse_color).unwrap_or(DEFAULT_BACKGROUND);
    let mut canvas = RgbaImage::from_pixel(to_px_len(content_w * scale), to_px_len(content_h * scale), opaque(bg));

    for el in &renderable {
        draw_element(&mut canvas, el, files, view);
    }

    let mut out = Cursor::new(Vec::new());
    canvas.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

// =============================================================================
// ELEMENTS
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct View {
    origin_x: f64,
    origin_y: f64,
    scale: f64,
}

impl View {
    fn to_px(self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.origin_x) * self.scale, (y - self.origin_y) * self.scale)
    }

    fn to_scene(self, px: f64, py: f64) -> (f64, f64) {
        (px / self.scale + self.origin_x, py / self.scale + self.origin_y)
    }
}

#[derive(Debug, Clone, Copy)]
struct Style {
    stroke: Option<[u8; 3]>,
    fill: Option<[u8; 3]>,
    stroke_width: f64,
    opacity: f64,
}

impl Style {
    fn of(el: &Element) -> Self {
        let stroke = match el.prop_str("strokeColor") {
            Some(raw) => parse_color(raw),
            None => Some(DEFAULT_STROKE),
        };
        let opacity = el.prop_f64("opacity").map_or(1.0, |o| (o / 100.0).clamp(0.0, 1.0));
        Self {
            stroke,
            fill: el.prop_str("backgroundColor").and_then(parse_color),
            stroke_width: el.prop_f64("strokeWidth").filter(|w| *w > 0.0).unwrap_or(DEFAULT_STROKE_WIDTH),
            opacity,
        }
    }
}

#[derive(Debug, Clone)]
enum Outline {
    Box,
    Ellipse,
    Diamond,
    /// Open polyline through points relative to the element center.
    Path(Vec<(f64, f64)>),
}

fn draw_element(canvas: &mut RgbaImage, el: &Element, files: &Files, view: View) {
    let style = Style::of(el);
    match el.kind.as_str() {
        "ellipse" => draw_outline(canvas, el, &Outline::Ellipse, style, view),
        "diamond" => draw_outline(canvas, el, &Outline::Diamond, style, view),
        "line" | "arrow" | "freedraw" => {
            let path = Outline::Path(relative_points(el));
            draw_outline(canvas, el, &path, Style { fill: None, ..style }, view);
        }
        "text" => draw_text(canvas, el, style, view),
        scene::KIND_IMAGE => draw_image(canvas, el, files, style, view),
        _ => draw_outline(canvas, el, &Outline::Box, style, view),
    }
}

fn relative_points(el: &Element) -> Vec<(f64, f64)> {
    let (cx, cy) = (el.width / 2.0, el.height / 2.0);
    el.extra
        .get("points")
        .and_then(Value::as_array)
        .map(|points| {
            points
                .iter()
                .filter_map(|p| {
                    let pair = p.as_array()?;
                    Some((pair.first()?.as_f64()? - cx, pair.get(1)?.as_f64()? - cy))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn draw_outline(canvas: &mut RgbaImage, el: &Element, outline: &Outline, style: Style, view: View) {
    if style.stroke.is_none() && style.fill.is_none() {
        return;
    }

    let (hx, hy) = (el.width.abs() / 2.0, el.height.abs() / 2.0);
    let (cx, cy) = (el.x + el.width / 2.0, el.y + el.height / 2.0);
    let (sin, cos) = el.prop_f64("angle").unwrap_or(0.0).sin_cos();
    let extent = match outline {
        Outline::Path(points) => points.iter().map(|(x, y)| x.hypot(*y)).fold(0.0, f64::max),
        _ => hx.hypot(hy),
    };
    let reach = extent + style.stroke_width;
    let Some(span) = pixel_span(canvas, view, (cx - reach, cy - reach), (cx + reach, cy + reach)) else {
        return;
    };

    let half_stroke_px = (style.stroke_width * view.scale / 2.0).max(0.5);
    for py in span.y0..span.y1 {
        for px in span.x0..span.x1 {
            let (sx, sy) = view.to_scene(f64::from(px) + 0.5, f64::from(py) + 0.5);
            let (dx, dy) = (sx - cx, sy - cy);
            let (lx, ly) = (dx * cos + dy * sin, -dx * sin + dy * cos);

            let d = match outline {
                Outline::Box => sdf_box(lx, ly, hx, hy),
                Outline::Ellipse => sdf_ellipse(lx, ly, hx, hy),
                Outline::Diamond => sdf_diamond(lx, ly, hx, hy),
                Outline::Path(points) => sdf_polyline(lx, ly, points),
            };
            let d_px = d * view.scale;

            if let Some(fill) = style.fill {
                blend(canvas, px, py, fill, (0.5 - d_px).clamp(0.0, 1.0) * style.opacity);
            }
            if let Some(stroke) = style.stroke {
                blend(canvas, px, py, stroke, (half_stroke_px + 0.5 - d_px.abs()).clamp(0.0, 1.0) * style.opacity);
            }
        }
    }
}

fn draw_image(canvas: &mut RgbaImage, el: &Element, files: &Files, style: Style, view: View) {
    let decoded = el
        .file_id
        .as_ref()
        .and_then(|id| files.get(id))
        .and_then(|file| file.decode_bytes())
        .and_then(|bytes| match image::load_from_memory(&bytes) {
            Ok(img) => Some(img.to_rgba8()),
            Err(e) => {
                warn!(element_id = %el.id, error = %e, "image payload does not decode; drawing placeholder");
                None
            }
        });

    let Some(source) = decoded else {
        let placeholder = Style { fill: Some(MISSING_IMAGE_FILL), stroke: None, ..style };
        draw_outline(canvas, el, &Outline::Box, placeholder, view);
        return;
    };

    let (x, y) = view.to_px(el.x.min(el.x + el.width), el.y.min(el.y + el.height));
    let width = to_px_len(el.width.abs() * view.scale);
    let height = to_px_len(el.height.abs() * view.scale);
    let mut resized = imageops::resize(&source, width, height, FilterType::Triangle);
    if style.opacity < 1.0 {
        for pixel in resized.pixels_mut() {
            pixel.0[3] = scale_channel(pixel.0[3], style.opacity);
        }
    }
    imageops::overlay(canvas, &resized, round_i64(x), round_i64(y));
}

fn draw_text(canvas: &mut RgbaImage, el: &Element, style: Style, view: View) {
    let (Some(font), Some(color)) = (FONT.as_ref(), style.stroke) else {
        return;
    };
    let Some(text) = el.prop_str("text").filter(|t| !t.trim().is_empty()) else {
        return;
    };

    let size = el.prop_f64("fontSize").filter(|s| *s > 0.0).unwrap_or(DEFAULT_FONT_SIZE) * view.scale;
    let scaled = font.as_scaled(to_f32(size));
    let line_height = f64::from(scaled.height());
    let (left, top) = view.to_px(el.x, el.y);
    let box_width = el.width.abs() * view.scale;

    for (row, line) in text.lines().enumerate() {
        let mut glyphs: Vec<(GlyphId, f64)> = Vec::new();
        let mut cursor = 0.0;
        let mut previous: Option<GlyphId> = None;
        for ch in line.chars() {
            let id = font.glyph_id(ch);
            if let Some(prev) = previous {
                cursor += f64::from(scaled.kern(prev, id));
            }
            glyphs.push((id, cursor));
            cursor += f64::from(scaled.h_advance(id));
            previous = Some(id);
        }

        let offset = match el.prop_str("textAlign") {
            Some("center") => (box_width - cursor) / 2.0,
            Some("right") => box_width - cursor,
            _ => 0.0,
        };
        #[allow(clippy::cast_precision_loss)]
        let baseline = top + f64::from(scaled.ascent()) + row as f64 * line_height;

        for (id, x) in glyphs {
            let glyph = id.with_scale_and_position(scaled.scale(), point(to_f32(left + offset + x), to_f32(baseline)));
            let Some(outlined) = font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            let (gx, gy) = (round_i64(f64::from(bounds.min.x)), round_i64(f64::from(bounds.min.y)));
            outlined.draw(|dx, dy, coverage| {
                let (x, y) = (gx + i64::from(dx), gy + i64::from(dy));
                if let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) {
                    if x < canvas.width() && y < canvas.height() {
                        blend(canvas, x, y, color, f64::from(coverage) * style.opacity);
                    }
                }
            });
        }
    }
}

// =============================================================================
// SIGNED DISTANCE FUNCTIONS
// =============================================================================

fn sdf_box(px: f64, py: f64, hx: f64, hy: f64) -> f64 {
    let dx = px.abs() - hx;
    let dy = py.abs() - hy;
    let outside = dx.max(0.0).hypot(dy.max(0.0));
    let inside = dx.max(dy).min(0.0);
    outside + inside
}

/// Approximate: exact on the axes, close enough elsewhere for a preview.
fn sdf_ellipse(px: f64, py: f64, rx: f64, ry: f64) -> f64 {
    if rx <= f64::EPSILON || ry <= f64::EPSILON {
        return sdf_box(px, py, rx, ry);
    }
    let nx = px / rx;
    let ny = py / ry;
    let len = nx.hypot(ny);
    if len < 1e-9 {
        return -rx.min(ry);
    }
    let scale = (rx * rx * ny * ny + ry * ry * nx * nx).sqrt() / (rx * ry * len);
    (len - 1.0) / scale
}

fn sdf_diamond(px: f64, py: f64, hx: f64, hy: f64) -> f64 {
    if hx <= f64::EPSILON || hy <= f64::EPSILON {
        return sdf_box(px, py, hx, hy);
    }
    let d = px.abs() / hx + py.abs() / hy - 1.0;
    d / (1.0 / (hx * hx) + 1.0 / (hy * hy)).sqrt()
}

/// Unsigned distance to the nearest segment; a path has no inside.
fn sdf_polyline(px: f64, py: f64, points: &[(f64, f64)]) -> f64 {
    match points {
        [] => f64::INFINITY,
        [(x, y)] => (px - x).hypot(py - y),
        _ => points
            .windows(2)
            .map(|w| sdf_segment(px, py, w[0], w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

fn sdf_segment(px: f64, py: f64, (ax, ay): (f64, f64), (bx, by): (f64, f64)) -> f64 {
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f64::EPSILON { 0.0 } else { (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0) };
    (px - (ax + t * dx)).hypot(py - (ay + t * dy))
}

// =============================================================================
// PIXELS
// =============================================================================

struct Span {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// Canvas pixels covering a scene-space rectangle, clipped to the canvas.
fn pixel_span(canvas: &RgbaImage, view: View, min: (f64, f64), max: (f64, f64)) -> Option<Span> {
    let (x0, y0) = view.to_px(min.0, min.1);
    let (x1, y1) = view.to_px(max.0, max.1);
    let x0 = x0.floor().max(0.0);
    let y0 = y0.floor().max(0.0);
    let x1 = x1.ceil().min(f64::from(canvas.width()));
    let y1 = y1.ceil().min(f64::from(canvas.height()));
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some(Span { x0: to_index(x0), y0: to_index(y0), x1: to_index(x1), y1: to_index(y1) })
}

/// Source-over blend of an opaque color at `alpha` coverage.
fn blend(canvas: &mut RgbaImage, x: u32, y: u32, color: [u8; 3], alpha: f64) {
    if alpha <= 0.0 {
        return;
    }
    let alpha = alpha.min(1.0);
    let pixel = canvas.get_pixel_mut(x, y);
    for (channel, src) in pixel.0.iter_mut().zip(color) {
        *channel = mix(*channel, src, alpha);
    }
    let dst_alpha = f64::from(pixel.0[3]) / 255.0;
    pixel.0[3] = scale_channel(255, alpha + dst_alpha * (1.0 - alpha));
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mix(dst: u8, src: u8, alpha: f64) -> u8 {
    (f64::from(src) * alpha + f64::from(dst) * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_channel(value: u8, factor: f64) -> u8 {
    (f64::from(value) * factor).round().clamp(0.0, 255.0) as u8
}

/// Pixel length from a non-negative float, at least 1.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_px_len(value: f64) -> u32 {
    value.round().clamp(1.0, f64::from(u32::MAX)) as u32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_index(value: f64) -> u32 {
    value.clamp(0.0, f64::from(u32::MAX)) as u32
}

#[allow(clippy::cast_possible_truncation)]
fn to_f32(value: f64) -> f32 {
    value as f32
}

#[allow(clippy::cast_possible_truncation)]
fn round_i64(value: f64) -> i64 {
    value.round() as i64
}

fn opaque([r, g, b]: [u8; 3]) -> Rgba<u8> {
    Rgba([r, g, b, 0xff])
}

/// `#rgb` / `#rrggbb` and a few names. `transparent` and unknowns are `None`.
fn parse_color(raw: &str) -> Option<[u8; 3]> {
    let raw = raw.trim();
    match raw.to_ascii_lowercase().as_str() {
        "black" => return Some([0, 0, 0]),
        "white" => return Some([0xff, 0xff, 0xff]),
        _ => {}
    }
    let hex = raw.strip_prefix('#')?;
    let digit = |i: usize| u8::from_str_radix(hex.get(i..=i)?, 16).ok();
    match hex.len() {
        3 => Some([digit(0)? * 17, digit(1)? * 17, digit(2)? * 17]),
        6 => {
            let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
            Some([byte(0)?, byte(2)?, byte(4)?])
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "raster_test.rs"]
mod tests;
