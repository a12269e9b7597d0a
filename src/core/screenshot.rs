//! Screenshot pipeline.
//!
//! Capture → optional annotation overlay → high-quality resize → JPEG under
//! a byte budget → base64. The budget loop trades fidelity for bounded
//! response size: quality drops in 0.15 steps to a floor of 0.2 until the
//! encoded payload fits.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use glam::Vec2;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use log::{debug, warn};
use serde_json::{json, Value};

use crate::config::BRIDGE_NODE_NAME;
use crate::core::font;
use crate::core::refs::RefMap;
use crate::core::snapshot::node_text;
use crate::engine::{Engine, InstanceId, Projection};
use crate::value::Rect2;

/// Pad around a UI rect when cropping to a node.
const NODE_CROP_PAD: f32 = 8.0;
/// Square crop size centered on a 2D/3D node position.
const NODE_CROP_SIZE: f32 = 256.0;
/// Lowest quality the budget loop will accept.
const QUALITY_FLOOR: f32 = 0.2;
/// Quality decrement per budget iteration.
const QUALITY_STEP: f32 = 0.15;

#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    pub width: u32,
    pub height: u32,
    /// JPEG quality in 0.0..=1.0.
    pub quality: f32,
    /// Budget on the base64-encoded payload length.
    pub max_base64_len: usize,
}

/// Whole-viewport capture. `context` labels the response for the client
/// ("viewport", "snapshot", …).
pub fn capture(
    engine: &dyn Engine,
    opts: CaptureOptions,
    overlay: Option<&[Annotation]>,
    context: &str,
) -> Result<Value, String> {
    let mut image = engine
        .capture_viewport()
        .ok_or_else(|| "Viewport capture unavailable".to_string())?;

    if let Some(annotations) = overlay {
        let overlay_img = render_overlay(image.width(), image.height(), annotations);
        blend_over(&mut image, &overlay_img);
    }

    finish(engine, image, opts, context, None)
}

/// Node-focused crop: a padded rect for UI nodes, a fixed square around the
/// global position for 2D and projected 3D nodes.
pub fn capture_node(
    engine: &dyn Engine,
    id: InstanceId,
    opts: CaptureOptions,
) -> Result<Value, String> {
    let image = engine
        .capture_viewport()
        .ok_or_else(|| "Viewport capture unavailable".to_string())?;

    let (vw, vh) = engine.viewport_size();
    let viewport = Rect2::new(0.0, 0.0, vw as f32, vh as f32);

    let rect = node_crop_rect(engine, id).ok_or_else(|| {
        format!(
            "Cannot compute a screen region for {}",
            engine.class_name(id).unwrap_or("node")
        )
    })?;
    let rect = rect.clamped_to(viewport);
    if rect.size.x < 1.0 || rect.size.y < 1.0 {
        return Err("Node region is outside the viewport".to_string());
    }

    let cropped = image::imageops::crop_imm(
        &image,
        rect.position.x as u32,
        rect.position.y as u32,
        rect.size.x as u32,
        rect.size.y as u32,
    )
    .to_image();

    finish(engine, cropped, opts, "node", Some(rect))
}

fn node_crop_rect(engine: &dyn Engine, id: InstanceId) -> Option<Rect2> {
    if engine.is_class(id, "Control") {
        return engine.global_rect(id).map(|r| r.padded(NODE_CROP_PAD));
    }
    let center = if engine.is_class(id, "Node2D") {
        engine.global_position_2d(id)?
    } else if engine.is_class(id, "Node3D") {
        match engine.project_to_screen(id) {
            Projection::OnScreen(p) => p,
            _ => return None,
        }
    } else {
        return None;
    };
    Some(Rect2 {
        position: center - Vec2::splat(NODE_CROP_SIZE / 2.0),
        size: Vec2::splat(NODE_CROP_SIZE),
    })
}

/// Resize, encode under budget, wrap in the response map.
fn finish(
    engine: &dyn Engine,
    image: RgbaImage,
    opts: CaptureOptions,
    context: &str,
    node_rect: Option<Rect2>,
) -> Result<Value, String> {
    let width = opts.width.max(8);
    let height = opts.height.max(8);
    let resized = if image.width() == width && image.height() == height {
        image
    } else {
        image::imageops::resize(&image, width, height, FilterType::CatmullRom)
    };

    let (encoded, final_quality) = encode_under_budget(&resized, opts.quality, opts.max_base64_len)?;
    let payload = BASE64.encode(&encoded);

    let mut out = json!({
        "image": payload,
        "mime": "image/jpeg",
        "size": [width, height],
        "context": context,
        "frame": engine.frame(),
        "timestamp": engine.wall_time(),
        "quality": final_quality,
    });
    if let Some(rect) = node_rect {
        out["node_rect"] = json!({
            "position": [rect.position.x, rect.position.y],
            "size": [rect.size.x, rect.size.y],
        });
    }
    Ok(out)
}

/// Encode as JPEG, stepping quality down until the base64 form fits the
/// budget. Returns the bytes and the quality that produced them.
fn encode_under_budget(
    image: &RgbaImage,
    quality: f32,
    max_base64_len: usize,
) -> Result<(Vec<u8>, f32), String> {
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut quality = quality.clamp(QUALITY_FLOOR, 1.0);

    loop {
        let mut bytes: Vec<u8> = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut bytes);
        let q = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
        let mut encoder = JpegEncoder::new_with_quality(&mut cursor, q);
        encoder
            .encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| format!("JPEG encoding failed: {}", e))?;

        // Base64 expands 3 bytes to 4 characters.
        let b64_len = bytes.len().div_ceil(3) * 4;
        if b64_len <= max_base64_len {
            debug!(
                "screenshot encoded: {}x{} q={:.2} ({} bytes)",
                rgb.width(),
                rgb.height(),
                quality,
                bytes.len()
            );
            return Ok((bytes, quality));
        }
        if quality <= QUALITY_FLOOR {
            warn!(
                "screenshot exceeds budget even at floor quality ({} > {} base64 chars)",
                b64_len, max_base64_len
            );
            return Ok((bytes, quality));
        }
        quality = (quality - QUALITY_STEP).max(QUALITY_FLOOR);
    }
}

// --- annotations ---------------------------------------------------------

/// One ref label to composite onto the capture.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub node_ref: String,
    pub class: String,
    pub pos: Vec2,
    /// Bounding rect, UI nodes only.
    pub rect: Option<Rect2>,
}

/// Classes that exist to organize children; annotating them is noise unless
/// a script hangs state off them.
const ORGANIZATIONAL: &[&str] = &["Container", "CanvasLayer"];

/// Classes always worth labeling.
const VISUAL_CLASSES: &[&str] = &[
    "Control",
    "Sprite2D",
    "Sprite3D",
    "AnimatedSprite2D",
    "AnimatedSprite3D",
    "CollisionObject2D",
    "CollisionObject3D",
    "Camera2D",
    "Camera3D",
];

/// Walk the tree and collect the annotations for every eligible node.
pub fn collect_annotations(engine: &dyn Engine, refs: &mut RefMap) -> Vec<Annotation> {
    let (vw, vh) = engine.viewport_size();
    let viewport = Rect2::new(0.0, 0.0, vw as f32, vh as f32);

    let mut out = Vec::new();
    let Some(root) = engine.scene_root() else {
        return out;
    };
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let name = match engine.node_name(id) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if name.starts_with('@') || name == BRIDGE_NODE_NAME {
            continue;
        }
        stack.extend(engine.children(id));

        if !engine.is_visible_in_tree(id) {
            continue;
        }
        if !is_eligible(engine, id) {
            continue;
        }

        let (pos, rect) = match annotation_anchor(engine, id) {
            Some(anchor) => anchor,
            None => continue,
        };
        if !viewport.contains(pos) {
            continue;
        }

        out.push(Annotation {
            node_ref: refs.ref_for(engine, id),
            class: engine.class_name(id).unwrap_or("Node").to_string(),
            pos,
            rect,
        });
    }
    out
}

fn is_eligible(engine: &dyn Engine, id: InstanceId) -> bool {
    let has_script_props = engine
        .script_properties(id)
        .iter()
        .any(|p| p.storage);
    // Text or script state always earns a label.
    if has_script_props || node_text(engine, id).is_some() {
        return true;
    }
    if ORGANIZATIONAL.iter().any(|c| engine.is_class(id, c)) {
        return false;
    }
    VISUAL_CLASSES.iter().any(|c| engine.is_class(id, c))
}

fn annotation_anchor(engine: &dyn Engine, id: InstanceId) -> Option<(Vec2, Option<Rect2>)> {
    if engine.is_class(id, "Control") {
        let rect = engine.global_rect(id)?;
        return Some((rect.center(), Some(rect)));
    }
    if engine.is_class(id, "Node2D") {
        return engine.global_position_2d(id).map(|p| (p, None));
    }
    if engine.is_class(id, "Node3D") {
        return match engine.project_to_screen(id) {
            Projection::OnScreen(p) => Some((p, None)),
            _ => None,
        };
    }
    None
}

const OUTLINE: Rgba<u8> = Rgba([255, 214, 64, 230]);
const PILL_FILL: Rgba<u8> = Rgba([16, 16, 20, 200]);
const TEXT: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TEXT_OUTLINE: Rgba<u8> = Rgba([0, 0, 0, 255]);
const DOT: Rgba<u8> = Rgba([255, 80, 80, 255]);
const TEXT_SCALE: u32 = 2;

/// Draw all annotations onto a transparent surface the size of the capture.
pub fn render_overlay(width: u32, height: u32, annotations: &[Annotation]) -> RgbaImage {
    let mut overlay = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    for ann in annotations {
        if let Some(rect) = ann.rect {
            draw_rect_outline(&mut overlay, rect);
        }
        draw_dot(&mut overlay, ann.pos);
        draw_pill_label(&mut overlay, ann.pos, &ann.node_ref);
    }
    overlay
}

fn put_pixel(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rect_outline(img: &mut RgbaImage, rect: Rect2) {
    let x0 = rect.position.x as i64;
    let y0 = rect.position.y as i64;
    let x1 = (rect.position.x + rect.size.x) as i64;
    let y1 = (rect.position.y + rect.size.y) as i64;
    for t in 0..2i64 {
        for x in x0..=x1 {
            put_pixel(img, x, y0 + t, OUTLINE);
            put_pixel(img, x, y1 - t, OUTLINE);
        }
        for y in y0..=y1 {
            put_pixel(img, x0 + t, y, OUTLINE);
            put_pixel(img, x1 - t, y, OUTLINE);
        }
    }
}

fn draw_dot(img: &mut RgbaImage, pos: Vec2) {
    let cx = pos.x as i64;
    let cy = pos.y as i64;
    for dy in -2i64..=2 {
        for dx in -2i64..=2 {
            if dx * dx + dy * dy <= 5 {
                put_pixel(img, cx + dx, cy + dy, DOT);
            }
        }
    }
}

/// Centered pill with the ref in outlined text.
fn draw_pill_label(img: &mut RgbaImage, pos: Vec2, label: &str) {
    let text_w = font::text_width(label) * TEXT_SCALE;
    let text_h = font::GLYPH_HEIGHT * TEXT_SCALE;
    let pad_x = 5i64;
    let pad_y = 3i64;
    let w = text_w as i64 + pad_x * 2;
    let h = text_h as i64 + pad_y * 2;
    let left = pos.x as i64 - w / 2;
    let top = pos.y as i64 - h / 2;

    let radius = h / 2;
    for y in 0..h {
        for x in 0..w {
            // Clip corners into a capsule.
            let inside = if x < radius {
                let dx = radius - x;
                let dy = (y - h / 2).abs();
                dx * dx + dy * dy <= radius * radius
            } else if x >= w - radius {
                let dx = x - (w - radius - 1);
                let dy = (y - h / 2).abs();
                dx * dx + dy * dy <= radius * radius
            } else {
                true
            };
            if inside {
                put_pixel(img, left + x, top + y, PILL_FILL);
            }
        }
    }

    let text_left = left + pad_x;
    let text_top = top + pad_y;
    // Dark halo first for readability, then the text itself.
    for (ox, oy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
        font::for_each_pixel(label, TEXT_SCALE, |x, y| {
            put_pixel(
                img,
                text_left + x as i64 + ox,
                text_top + y as i64 + oy,
                TEXT_OUTLINE,
            );
        });
    }
    font::for_each_pixel(label, TEXT_SCALE, |x, y| {
        put_pixel(img, text_left + x as i64, text_top + y as i64, TEXT);
    });
}

/// Source-over blend of `overlay` onto `base`.
pub fn blend_over(base: &mut RgbaImage, overlay: &RgbaImage) {
    for (x, y, over) in overlay.enumerate_pixels() {
        let alpha = over[3] as u32;
        if alpha == 0 {
            continue;
        }
        let under = base.get_pixel_mut(x, y);
        for c in 0..3 {
            let blended = (over[c] as u32 * alpha + under[c] as u32 * (255 - alpha)) / 255;
            under[c] = blended as u8;
        }
        under[3] = 255;
    }
}
