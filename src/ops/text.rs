use std::sync::{Arc, OnceLock};

use ab_glyph::{point, Font, FontArc, GlyphId, ScaleFont};

use crate::canvas::{CanvasRect, CanvasSize, TiledImage};
use crate::coords::CanvasPoint;

/// Family tried first when a text layer carries no font of its own.
const DEFAULT_FAMILY: &str = "Arial";
/// Advance used per character when no font could be found at all.
const FALLBACK_ADVANCE_EM: f32 = 0.6;
/// Line height used when no font could be found at all.
const FALLBACK_LINE_EM: f32 = 1.2;

/// A font parsed once and kept next to its source bytes, so projects can
/// embed the exact font they were authored with.
#[derive(Clone)]
pub struct TextFont {
    bytes: Arc<Vec<u8>>,
    font: FontArc,
}

impl std::fmt::Debug for TextFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextFont").field("bytes", &self.bytes.len()).finish()
    }
}

impl TextFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ab_glyph::InvalidFont> {
        let font = FontArc::try_from_vec(bytes.clone())?;
        Ok(Self { bytes: Arc::new(bytes), font })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Text placed on the garment. `position` is the top-left corner of the
/// layout box in canvas space; layout runs downward from there.
#[derive(Clone, Debug)]
pub struct TextContent {
    pub text: String,
    pub position: CanvasPoint,
    pub font_size: f32,
    pub color: [u8; 4],
    pub font: Option<TextFont>,
}

impl Default for TextContent {
    fn default() -> Self {
        Self {
            text: String::new(),
            position: CanvasPoint::default(),
            font_size: 32.0,
            color: [0, 0, 0, 255],
            font: None,
        }
    }
}

/// A positioned glyph: id plus pen position relative to the layout origin.
struct LaidOutGlyph {
    id: GlyphId,
    x: f32,
    baseline: f32,
}

impl TextContent {
    /// Size of the layout box, shared by rendering and hit-testing.
    pub fn layout_size(&self) -> (f32, f32) {
        let lines: Vec<&str> = self.text.split('\n').collect();
        match self.resolved_font() {
            Some(font) => {
                let scaled = font.as_scaled(self.font_size);
                let width = lines
                    .iter()
                    .map(|line| line_width(font, line, self.font_size))
                    .fold(0.0f32, f32::max);
                (width, scaled.height() * lines.len() as f32)
            }
            None => {
                let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
                (
                    longest as f32 * self.font_size * FALLBACK_ADVANCE_EM,
                    lines.len() as f32 * self.font_size * FALLBACK_LINE_EM,
                )
            }
        }
    }

    /// The attached font, else the system default.
    fn resolved_font(&self) -> Option<&FontArc> {
        match &self.font {
            Some(tf) => Some(&tf.font),
            None => default_font(),
        }
    }

    /// Rendered bounds in canvas space.
    pub fn bounds(&self) -> CanvasRect {
        let (w, h) = self.layout_size();
        CanvasRect::from_min_max(self.position.x, self.position.y, self.position.x + w, self.position.y + h)
    }

    /// Rasterize into a canvas-sized surface. With no usable font anywhere,
    /// each visible character is drawn as a solid block in the same layout
    /// box that hit-testing uses.
    pub fn rasterize(&self, size: CanvasSize) -> TiledImage {
        let mut out = TiledImage::with_size(size);
        if self.text.is_empty() {
            return out;
        }
        let Some(font) = self.resolved_font() else {
            tracing::debug!("no font available for '{}', drawing block glyphs", self.text);
            self.rasterize_blocks(&mut out);
            return out;
        };

        let glyphs = layout(font, &self.text, self.font_size);
        let [r, g, b, a] = self.color;
        for lg in glyphs {
            let glyph = lg.id.with_scale_and_position(
                self.font_size,
                point(self.position.x + lg.x, self.position.y + lg.baseline),
            );
            let Some(outlined) = font.outline_glyph(glyph) else { continue };
            let px_bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let x = px_bounds.min.x as i32 + gx as i32;
                let y = px_bounds.min.y as i32 + gy as i32;
                if x < 0 || y < 0 { return; }
                let alpha = (a as f32 * coverage.clamp(0.0, 1.0)).round() as u8;
                if alpha == 0 { return; }
                let existing = out.get_pixel(x as u32, y as u32)[3];
                if alpha > existing {
                    out.put_pixel(x as u32, y as u32, image::Rgba([r, g, b, alpha]));
                }
            });
        }
        out
    }

    fn rasterize_blocks(&self, out: &mut TiledImage) {
        let advance = self.font_size * FALLBACK_ADVANCE_EM;
        let line_height = self.font_size * FALLBACK_LINE_EM;
        let (w, h) = (out.width() as f32, out.height() as f32);
        for (line_idx, line) in self.text.split('\n').enumerate() {
            let top = self.position.y + line_idx as f32 * line_height + self.font_size * 0.1;
            for (col, ch) in line.chars().enumerate() {
                if ch.is_whitespace() {
                    continue;
                }
                let left = self.position.x + col as f32 * advance;
                let x0 = (left + advance * 0.1).max(0.0) as u32;
                let x1 = (left + advance * 0.9).min(w) as u32;
                let y0 = top.max(0.0) as u32;
                let y1 = (top + self.font_size).min(h) as u32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        out.put_pixel(x, y, image::Rgba(self.color));
                    }
                }
            }
        }
    }
}

/// System sans-serif font, looked up once per process.
pub fn default_font() -> Option<&'static FontArc> {
    static DEFAULT: OnceLock<Option<FontArc>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| {
            let found = load_system_font(DEFAULT_FAMILY, 400, false);
            if found.is_none() {
                tracing::warn!("no system font found, text layers fall back to block glyphs");
            }
            found
        })
        .as_ref()
}

/// Load a font by family name, CSS-style weight and style from the system,
/// falling back to the generic sans-serif family.
pub fn load_system_font(family: &str, weight: u16, italic: bool) -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    use font_kit::properties::{Properties, Style, Weight};
    use font_kit::source::SystemSource;

    let mut props = Properties::new();
    props.weight = Weight(weight as f32);
    if italic {
        props.style = Style::Italic;
    }

    let handle = SystemSource::new()
        .select_best_match(&[FamilyName::Title(family.to_string()), FamilyName::SansSerif], &props)
        .ok()?;
    let font = handle.load().ok()?;
    let bytes: Vec<u8> = (*font.copy_font_data()?).clone();
    FontArc::try_from_vec(bytes).ok()
}

fn line_width(font: &FontArc, line: &str, font_size: f32) -> f32 {
    let scaled = font.as_scaled(font_size);
    let mut cursor_x = 0.0f32;
    let mut last: Option<GlyphId> = None;
    for ch in line.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = last {
            cursor_x += scaled.kern(prev, id);
        }
        cursor_x += scaled.h_advance(id);
        last = Some(id);
    }
    cursor_x
}

/// Left-aligned multi-line layout with kerning.
fn layout(font: &FontArc, text: &str, font_size: f32) -> Vec<LaidOutGlyph> {
    let scaled = font.as_scaled(font_size);
    let ascent = scaled.ascent();
    let line_height = scaled.height();
    let mut glyphs = Vec::new();

    for (line_idx, line) in text.split('\n').enumerate() {
        let baseline = ascent + line_idx as f32 * line_height;
        let mut cursor_x = 0.0f32;
        let mut last: Option<GlyphId> = None;
        for ch in line.chars() {
            let id = font.glyph_id(ch);
            if let Some(prev) = last {
                cursor_x += scaled.kern(prev, id);
            }
            glyphs.push(LaidOutGlyph { id, x: cursor_x, baseline });
            cursor_x += scaled.h_advance(id);
            last = Some(id);
        }
    }
    glyphs
}
