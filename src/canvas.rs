use std::str::FromStr;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// ============================================================================
// CANVAS GEOMETRY – canonical size and axis-aligned rects in canvas space
// ============================================================================

/// The single fixed size shared by the base texture, every layer surface
/// and the composed surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the point lies on the canvas (y=0 is the top row).
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.width as f32 && y < self.height as f32
    }
}

/// Axis-aligned rectangle in canvas pixels (max is exclusive).
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct CanvasRect {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl CanvasRect {
    pub fn from_min_max(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Rect of a single point grown by `radius` in every direction.
    pub fn around(x: f32, y: f32, radius: f32) -> Self {
        Self::from_min_max(x - radius, y - radius, x + radius, y + radius)
    }

    pub fn width(&self) -> f32 {
        (self.max_x - self.min_x).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.max_y - self.min_y).max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn union(&self, other: CanvasRect) -> CanvasRect {
        CanvasRect::from_min_max(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn expand(&self, by: f32) -> CanvasRect {
        CanvasRect::from_min_max(self.min_x - by, self.min_y - by, self.max_x + by, self.max_y + by)
    }

    /// Inclusive containment test, so a point on the max edge still hits.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn translate(&self, dx: f32, dy: f32) -> CanvasRect {
        CanvasRect::from_min_max(self.min_x + dx, self.min_y + dy, self.max_x + dx, self.max_y + dy)
    }

    /// Clamp a translation so the moved rect stays inside `size`.
    /// A rect already larger than the canvas on an axis cannot move on it.
    pub fn clamp_delta(&self, size: CanvasSize, dx: f32, dy: f32) -> (f32, f32) {
        let clamp_axis = |min: f32, max: f32, limit: f32, d: f32| -> f32 {
            let lo = -min;
            let hi = limit - max;
            if lo > hi { 0.0 } else { d.clamp(lo.min(0.0), hi.max(0.0)) }
        };
        (
            clamp_axis(self.min_x, self.max_x, size.width as f32, dx),
            clamp_axis(self.min_y, self.max_y, size.height as f32, dy),
        )
    }

    /// Integer pixel span clipped to the canvas: `(x0, y0, x1, y1)`, exclusive max.
    pub fn to_pixel_span(&self, size: CanvasSize) -> (u32, u32, u32, u32) {
        let x0 = self.min_x.floor().max(0.0) as u32;
        let y0 = self.min_y.floor().max(0.0) as u32;
        let x1 = (self.max_x.ceil().max(0.0) as u32).min(size.width);
        let y1 = (self.max_y.ceil().max(0.0) as u32).min(size.height);
        (x0.min(x1), y0.min(y1), x1, y1)
    }
}

// ============================================================================
// TILED IMAGE – sparse 64×64 chunk storage (Vec-indexed for speed)
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;

/// A pixel with zero alpha, returned by reference for missing chunks.
static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Sparse tiled image backed by a flat `Vec<Option<Arc<RgbaImage>>>`.
/// Chunk coordinates are mapped to a flat index via `cy * chunks_per_row + cx`.
///
/// Chunks are wrapped in `Arc` for copy-on-write semantics: `clone()` only
/// bumps reference counts, and `put_pixel` uses `Arc::make_mut` to clone only
/// the touched chunk. History snapshots rely on this to stay cheap.
#[derive(Clone)]
pub struct TiledImage {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl std::fmt::Debug for TiledImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("chunks", &self.chunk_count())
            .finish()
    }
}

impl TiledImage {
    // ---- construction -------------------------------------------------------

    /// Create an empty (fully transparent) tiled image.
    ///
    /// Zero-sized requests are kept as zero-sized images so the compositor can
    /// reject them as structural errors instead of silently drawing nothing.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = {
            let total = (width as u64) * (height as u64);
            if total > 256_000_000 {
                tracing::warn!("TiledImage::new: {width}×{height} exceeds 256M pixels, clamped to 1×1");
                (1, 1)
            } else {
                (width, height)
            }
        };
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        let total = (chunks_per_row * chunks_per_col) as usize;
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; total],
        }
    }

    pub fn with_size(size: CanvasSize) -> Self {
        Self::new(size.width, size.height)
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel (returns `&TRANSPARENT_PIXEL` for missing chunks).
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height { return &TRANSPARENT_PIXEL; }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        let idx = self.flat_index(cx, cy);
        self.chunks[idx].as_ref()
            .map(|c| c.get_pixel(lx, ly))
            .unwrap_or(&TRANSPARENT_PIXEL)
    }

    /// Write a pixel (creates the chunk on demand, COW-clones if shared).
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height { return; }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        let idx = self.flat_index(cx, cy);
        let arc = self.chunks[idx]
            .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(arc).put_pixel(lx, ly, pixel);
    }

    /// Blit an RGBA sub-image at a given position using bulk chunk row copies.
    /// Transparent runs never allocate chunks.
    pub fn blit_rgba_at(&mut self, dst_x: i32, dst_y: i32, src_w: u32, src_h: u32, data: &[u8]) {
        debug_assert_eq!(data.len(), src_w as usize * src_h as usize * 4);
        let cs = CHUNK_SIZE;

        for sy in 0..src_h {
            let gy = dst_y + sy as i32;
            if gy < 0 || gy as u32 >= self.height { continue; }
            let gy = gy as u32;

            let src_row_start = sy as usize * src_w as usize * 4;

            // Process contiguous runs of pixels in this row
            let mut sx = 0u32;
            while sx < src_w {
                let gx = dst_x + sx as i32;
                if gx < 0 { sx += 1; continue; }
                let gx = gx as u32;
                if gx >= self.width { break; }

                let (cx, cy) = Self::chunk_coord(gx, gy);
                let (lx, ly) = Self::local(gx, gy);
                let idx = self.flat_index(cx, cy);

                let run = (cs - lx).min(src_w - sx).min(self.width - gx);

                let src_off = src_row_start + sx as usize * 4;
                let byte_len = run as usize * 4;
                let has_content = data[src_off..src_off + byte_len]
                    .chunks_exact(4)
                    .any(|px| px[3] != 0);

                if has_content {
                    let arc = self.chunks[idx]
                        .get_or_insert_with(|| Arc::new(RgbaImage::new(cs, cs)));
                    let chunk = Arc::make_mut(arc);
                    let dst_off = (ly as usize * cs as usize + lx as usize) * 4;
                    let chunk_raw: &mut [u8] = chunk.as_mut();
                    chunk_raw[dst_off..dst_off + byte_len]
                        .copy_from_slice(&data[src_off..src_off + byte_len]);
                }

                sx += run;
            }
        }
    }

    /// Read-only access to a chunk (if it exists).
    pub fn get_chunk(&self, cx: u32, cy: u32) -> Option<&RgbaImage> {
        let idx = self.flat_index(cx, cy);
        self.chunks.get(idx).and_then(|c| c.as_deref())
    }

    /// Iterator over populated chunk coordinates.
    pub fn chunk_keys(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let cpr = self.chunks_per_row.max(1);
        self.chunks.iter().enumerate().filter_map(move |(i, slot)| {
            slot.as_ref().map(|_| ((i as u32) % cpr, (i as u32) / cpr))
        })
    }

    /// Number of populated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_blank(&self) -> bool {
        self.chunk_count() == 0
    }

    // ---- bulk operations ----------------------------------------------------

    /// Drop all chunks (make the image fully transparent).
    pub fn clear(&mut self) {
        for slot in &mut self.chunks {
            *slot = None;
        }
    }

    /// Copy of this image shifted by whole pixels. Content pushed past an
    /// edge is dropped.
    pub fn translated(&self, dx: i32, dy: i32) -> TiledImage {
        let mut out = TiledImage::new(self.width, self.height);
        for (cx, cy) in self.chunk_keys() {
            let Some(chunk) = self.get_chunk(cx, cy) else { continue };
            for (lx, ly, px) in chunk.enumerate_pixels() {
                if px[3] == 0 { continue; }
                let x = (cx * CHUNK_SIZE + lx) as i64 + dx as i64;
                let y = (cy * CHUNK_SIZE + ly) as i64 + dy as i64;
                if x >= 0 && y >= 0 && x < self.width as i64 && y < self.height as i64 {
                    out.put_pixel(x as u32, y as u32, *px);
                }
            }
        }
        out
    }

    /// Tight bounds of all non-transparent pixels, or `None` when blank.
    pub fn content_bounds(&self) -> Option<CanvasRect> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (cx, cy) in self.chunk_keys() {
            let Some(chunk) = self.get_chunk(cx, cy) else { continue };
            for (lx, ly, px) in chunk.enumerate_pixels() {
                if px[3] == 0 { continue; }
                let x = cx * CHUNK_SIZE + lx;
                let y = cy * CHUNK_SIZE + ly;
                if x >= self.width || y >= self.height { continue; }
                bounds = Some(match bounds {
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                    None => (x, y, x, y),
                });
            }
        }
        bounds.map(|(x0, y0, x1, y1)| {
            CanvasRect::from_min_max(x0 as f32, y0 as f32, (x1 + 1) as f32, (y1 + 1) as f32)
        })
    }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    pub fn size(&self) -> CanvasSize {
        CanvasSize::new(self.width, self.height)
    }

    /// Approximate memory usage in bytes.
    /// Chunks shared with another image (e.g. an undo snapshot) only count
    /// their Arc pointer.
    pub fn memory_bytes(&self) -> usize {
        let chunk_byte_size = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;
        self.chunks.iter()
            .filter_map(|c| c.as_ref())
            .map(|arc| {
                if Arc::strong_count(arc) == 1 {
                    chunk_byte_size
                } else {
                    std::mem::size_of::<usize>() * 2
                }
            })
            .sum()
    }

    // ---- indexing helpers ----------------------------------------------------

    #[inline(always)]
    fn flat_index(&self, cx: u32, cy: u32) -> usize {
        (cy * self.chunks_per_row + cx) as usize
    }

    #[inline(always)]
    fn chunk_coord(x: u32, y: u32) -> (u32, u32) { (x / CHUNK_SIZE, y / CHUNK_SIZE) }

    #[inline(always)]
    fn local(x: u32, y: u32) -> (u32, u32) { (x % CHUNK_SIZE, y % CHUNK_SIZE) }
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Additive,
    Reflect,
    Glow,
    ColorBurn,
    ColorDodge,
    Overlay,
    Difference,
    Negation,
    Lighten,
    Darken,
    Xor,
    Overwrite,
    HardLight,
    SoftLight,
    Exclusion,
    Subtract,
    Divide,
    LinearBurn,
    VividLight,
    LinearLight,
    PinLight,
    HardMix,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Additive,
            BlendMode::Overlay,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Lighten,
            BlendMode::Darken,
            BlendMode::ColorBurn,
            BlendMode::ColorDodge,
            BlendMode::Difference,
            BlendMode::Exclusion,
            BlendMode::Negation,
            BlendMode::Reflect,
            BlendMode::Glow,
            BlendMode::Subtract,
            BlendMode::Divide,
            BlendMode::LinearBurn,
            BlendMode::VividLight,
            BlendMode::LinearLight,
            BlendMode::PinLight,
            BlendMode::HardMix,
            BlendMode::Xor,
            BlendMode::Overwrite,
        ]
    }

    /// Stable lowercase identifier, used by settings files and the CLI.
    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Additive => "additive",
            BlendMode::Reflect => "reflect",
            BlendMode::Glow => "glow",
            BlendMode::ColorBurn => "color-burn",
            BlendMode::ColorDodge => "color-dodge",
            BlendMode::Overlay => "overlay",
            BlendMode::Difference => "difference",
            BlendMode::Negation => "negation",
            BlendMode::Lighten => "lighten",
            BlendMode::Darken => "darken",
            BlendMode::Xor => "xor",
            BlendMode::Overwrite => "overwrite",
            BlendMode::HardLight => "hard-light",
            BlendMode::SoftLight => "soft-light",
            BlendMode::Exclusion => "exclusion",
            BlendMode::Subtract => "subtract",
            BlendMode::Divide => "divide",
            BlendMode::LinearBurn => "linear-burn",
            BlendMode::VividLight => "vivid-light",
            BlendMode::LinearLight => "linear-light",
            BlendMode::PinLight => "pin-light",
            BlendMode::HardMix => "hard-mix",
        }
    }

    /// Convert to a stable u8 for binary serialization
    pub fn to_u8(&self) -> u8 {
        match self {
            BlendMode::Normal => 0,
            BlendMode::Multiply => 1,
            BlendMode::Screen => 2,
            BlendMode::Additive => 3,
            BlendMode::Reflect => 4,
            BlendMode::Glow => 5,
            BlendMode::ColorBurn => 6,
            BlendMode::ColorDodge => 7,
            BlendMode::Overlay => 8,
            BlendMode::Difference => 9,
            BlendMode::Negation => 10,
            BlendMode::Lighten => 11,
            BlendMode::Darken => 12,
            BlendMode::Xor => 13,
            BlendMode::Overwrite => 14,
            BlendMode::HardLight => 15,
            BlendMode::SoftLight => 16,
            BlendMode::Exclusion => 17,
            BlendMode::Subtract => 18,
            BlendMode::Divide => 19,
            BlendMode::LinearBurn => 20,
            BlendMode::VividLight => 21,
            BlendMode::LinearLight => 22,
            BlendMode::PinLight => 23,
            BlendMode::HardMix => 24,
        }
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values)
    pub fn from_u8(v: u8) -> Self {
        BlendMode::all()
            .iter()
            .copied()
            .find(|m| m.to_u8() == v)
            .unwrap_or(BlendMode::Normal)
    }
}

impl FromStr for BlendMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        BlendMode::all()
            .iter()
            .copied()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| EngineError::Structural(format!("unknown blend mode '{s}'")))
    }
}

// ============================================================================
// PIXEL BLENDING
// ============================================================================

/// Blend `top` over `base` using `mode`, with the layer `opacity` folded into
/// the top pixel's alpha. Straight (non-premultiplied) alpha in and out.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    // Fast path: fully transparent top pixel: nothing to blend
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }

    // Fast path: Normal blend, full opacity, fully opaque top pixel: just overwrite
    if matches!(mode, BlendMode::Normal) && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);

    let base_r = base[0] as f32 / 255.0;
    let base_g = base[1] as f32 / 255.0;
    let base_b = base[2] as f32 / 255.0;
    let base_a = base[3] as f32 / 255.0;

    let top_r = top[0] as f32 / 255.0;
    let top_g = top[1] as f32 / 255.0;
    let top_b = top[2] as f32 / 255.0;
    let top_a = (top[3] as f32 / 255.0) * opacity;

    match mode {
        BlendMode::Overwrite => {
            return Rgba([
                (top_r * 255.0) as u8,
                (top_g * 255.0) as u8,
                (top_b * 255.0) as u8,
                (top_a * 255.0) as u8,
            ]);
        }
        BlendMode::Xor => {
            let xor_a = base_a * (1.0 - top_a) + top_a * (1.0 - base_a);
            if xor_a == 0.0 {
                return Rgba([0, 0, 0, 0]);
            }
            let xor_r = (base_r * base_a * (1.0 - top_a) + top_r * top_a * (1.0 - base_a)) / xor_a;
            let xor_g = (base_g * base_a * (1.0 - top_a) + top_g * top_a * (1.0 - base_a)) / xor_a;
            let xor_b = (base_b * base_a * (1.0 - top_a) + top_b * top_a * (1.0 - base_a)) / xor_a;
            return Rgba([
                (xor_r * 255.0).clamp(0.0, 255.0) as u8,
                (xor_g * 255.0).clamp(0.0, 255.0) as u8,
                (xor_b * 255.0).clamp(0.0, 255.0) as u8,
                (xor_a * 255.0).clamp(0.0, 255.0) as u8,
            ]);
        }
        _ => {}
    }

    let per_channel = |f: fn(f32, f32) -> f32| (f(base_r, top_r), f(base_g, top_g), f(base_b, top_b));

    let (r, g, b) = match mode {
        BlendMode::Normal => (top_r, top_g, top_b),
        BlendMode::Multiply => per_channel(|b, t| b * t),
        BlendMode::Screen => per_channel(|b, t| 1.0 - (1.0 - b) * (1.0 - t)),
        BlendMode::Additive => per_channel(|b, t| (b + t).min(1.0)),
        BlendMode::Overlay => per_channel(overlay_channel),
        BlendMode::Lighten => per_channel(f32::max),
        BlendMode::Darken => per_channel(f32::min),
        BlendMode::Difference => per_channel(|b, t| (b - t).abs()),
        BlendMode::Negation => per_channel(|b, t| 1.0 - (1.0 - b - t).abs()),
        BlendMode::ColorBurn => per_channel(color_burn_channel),
        BlendMode::ColorDodge => per_channel(color_dodge_channel),
        BlendMode::Reflect => per_channel(reflect_channel),
        BlendMode::Glow => per_channel(|b, t| reflect_channel(t, b)),
        BlendMode::HardLight => per_channel(|b, t| overlay_channel(t, b)),
        BlendMode::SoftLight => per_channel(soft_light_channel),
        BlendMode::Exclusion => per_channel(|b, t| b + t - 2.0 * b * t),
        BlendMode::Subtract => per_channel(|b, t| (b - t).max(0.0)),
        BlendMode::Divide => per_channel(divide_channel),
        BlendMode::LinearBurn => per_channel(|b, t| (b + t - 1.0).max(0.0)),
        BlendMode::VividLight => per_channel(vivid_light_channel),
        BlendMode::LinearLight => per_channel(|b, t| (b + 2.0 * t - 1.0).clamp(0.0, 1.0)),
        BlendMode::PinLight => per_channel(pin_light_channel),
        BlendMode::HardMix => per_channel(|b, t| if b + t >= 1.0 { 1.0 } else { 0.0 }),
        BlendMode::Xor | BlendMode::Overwrite => unreachable!(),
    };

    // A transparent backdrop shows the top colour unmodified.
    let (r, g, b) = if base_a == 0.0 { (top_r, top_g, top_b) } else { (r, g, b) };

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a == 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let out_r = (r * top_a + base_r * base_a * (1.0 - top_a)) / out_a;
    let out_g = (g * top_a + base_g * base_a * (1.0 - top_a)) / out_a;
    let out_b = (b * top_a + base_b * base_a * (1.0 - top_a)) / out_a;

    Rgba([
        (out_r * 255.0).clamp(0.0, 255.0) as u8,
        (out_g * 255.0).clamp(0.0, 255.0) as u8,
        (out_b * 255.0).clamp(0.0, 255.0) as u8,
        (out_a * 255.0).clamp(0.0, 255.0) as u8,
    ])
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn color_burn_channel(base: f32, top: f32) -> f32 {
    if top == 0.0 { 0.0 } else { (1.0 - (1.0 - base) / top).max(0.0) }
}

fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if top >= 1.0 { 1.0 } else { (base / (1.0 - top)).min(1.0) }
}

fn reflect_channel(base: f32, top: f32) -> f32 {
    if top >= 1.0 { 1.0 } else { (base * base / (1.0 - top)).min(1.0) }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

fn divide_channel(base: f32, top: f32) -> f32 {
    if top <= 0.0 { 1.0 } else { (base / top).min(1.0) }
}

fn vivid_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        color_burn_channel(base, 2.0 * top)
    } else {
        color_dodge_channel(base, 2.0 * (top - 0.5))
    }
}

fn pin_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base.min(2.0 * top)
    } else {
        base.max(2.0 * (top - 0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    #[test]
    fn normal_half_opacity_mixes_evenly() {
        let out = blend_pixel(BLUE, RED, BlendMode::Normal, 0.5);
        assert_eq!(out[3], 255);
        assert!((out[0] as i32 - 127).abs() <= 1);
        assert!((out[2] as i32 - 127).abs() <= 1);
        assert_eq!(out[1], 0);
    }

    #[test]
    fn transparent_top_leaves_base_untouched() {
        for mode in BlendMode::all() {
            assert_eq!(blend_pixel(BLUE, Rgba([9, 9, 9, 0]), *mode, 1.0), BLUE, "{mode:?}");
        }
    }

    #[test]
    fn multiply_and_screen_follow_standard_operators() {
        let grey = Rgba([128, 128, 128, 255]);
        let white = Rgba([255, 255, 255, 255]);
        assert!(blend_pixel(white, grey, BlendMode::Multiply, 1.0)[0].abs_diff(128) <= 1);
        let black = Rgba([0, 0, 0, 255]);
        assert!(blend_pixel(black, grey, BlendMode::Screen, 1.0)[0].abs_diff(128) <= 1);
    }

    #[test]
    fn blend_mode_u8_and_name_are_stable() {
        for mode in BlendMode::all() {
            assert_eq!(BlendMode::from_u8(mode.to_u8()), *mode);
            assert_eq!(mode.name().parse::<BlendMode>().unwrap(), *mode);
        }
        assert_eq!("Hard Light".parse::<BlendMode>().unwrap(), BlendMode::HardLight);
        assert!("sparkle".parse::<BlendMode>().is_err());
    }

    #[test]
    fn tiled_image_tracks_content_bounds() {
        let mut img = TiledImage::new(200, 100);
        assert!(img.content_bounds().is_none());
        img.put_pixel(70, 10, RED);
        img.put_pixel(130, 40, RED);
        let b = img.content_bounds().unwrap();
        assert_eq!(b, CanvasRect::from_min_max(70.0, 10.0, 131.0, 41.0));
        assert_eq!(img.chunk_count(), 2);
    }

    #[test]
    fn translated_drops_pixels_pushed_off_canvas() {
        let mut img = TiledImage::new(10, 10);
        img.put_pixel(1, 1, RED);
        img.put_pixel(9, 9, RED);
        let moved = img.translated(2, 3);
        assert_eq!(*moved.get_pixel(3, 4), RED);
        assert_eq!(moved.content_bounds().unwrap(), CanvasRect::from_min_max(3.0, 4.0, 4.0, 5.0));
    }

    #[test]
    fn clamp_delta_keeps_rect_on_canvas() {
        let size = CanvasSize::new(100, 100);
        let r = CanvasRect::from_min_max(10.0, 10.0, 50.0, 50.0);
        assert_eq!(r.clamp_delta(size, -30.0, 80.0), (-10.0, 50.0));
        assert_eq!(r.clamp_delta(size, 5.0, -5.0), (5.0, -5.0));
    }

    #[test]
    fn blend_mode_survives_bincode() {
        let bytes = bincode::serialize(&BlendMode::Overlay).unwrap();
        let back: BlendMode = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, BlendMode::Overlay);
    }
}
