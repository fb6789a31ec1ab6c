//! Layer compositor.
//!
//! Every run allocates a fresh output, draws the base texture, then blends
//! each visible layer in composite order. Nothing from a previous run is
//! drawn over, so two runs over the same registry give identical bytes.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{blend_pixel, BlendMode, CanvasSize, TiledImage, CHUNK_SIZE};
use crate::components::layers::{LayerId, LayerRegistry};
use crate::error::{EngineError, EngineResult};

/// Default per-channel threshold for "near white" in placeholder detection.
pub const DEFAULT_WHITE_TOLERANCE: u8 = 250;

/// The model's original texture. There is intentionally no "blank" state:
/// a failed or placeholder acquisition leaves the texture `Unset`.
#[derive(Clone, Debug, Default)]
pub enum BaseTexture {
    #[default]
    Unset,
    Valid(Arc<RgbaImage>),
}

impl BaseTexture {
    /// Validate and resample an acquired texture. Placeholders and empty
    /// images yield `Unset`.
    pub fn from_acquired(image: RgbaImage, size: CanvasSize, white_tolerance: u8) -> Self {
        if image.width() == 0 || image.height() == 0 {
            tracing::warn!("base texture acquisition returned an empty image");
            return BaseTexture::Unset;
        }
        if is_placeholder_surface(&image, white_tolerance) {
            tracing::warn!(
                "base texture {}×{} looks like a placeholder, leaving base unset",
                image.width(),
                image.height()
            );
            return BaseTexture::Unset;
        }
        let image = if image.width() != size.width || image.height() != size.height {
            tracing::info!(
                "resampling base texture {}×{} → {}×{}",
                image.width(),
                image.height(),
                size.width,
                size.height
            );
            imageops::resize(&image, size.width, size.height, FilterType::Triangle)
        } else {
            image
        };
        BaseTexture::Valid(Arc::new(image))
    }

    pub fn is_set(&self) -> bool {
        matches!(self, BaseTexture::Valid(_))
    }

    pub fn image(&self) -> Option<&Arc<RgbaImage>> {
        match self {
            BaseTexture::Valid(img) => Some(img),
            BaseTexture::Unset => None,
        }
    }
}

/// True when `img` looks like a blank stand-in: every sample near-white,
/// or every sample fully transparent. Samples are the centre and the
/// midpoints of the four quadrants, so a mostly-white design with any
/// coloured sample point is still valid.
pub fn is_placeholder_surface(img: &RgbaImage, white_tolerance: u8) -> bool {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return true;
    }
    let samples = [
        (w / 2, h / 2),
        (w / 4, h / 4),
        (3 * w / 4, h / 4),
        (w / 4, 3 * h / 4),
        (3 * w / 4, 3 * h / 4),
    ];
    let pixels: Vec<&Rgba<u8>> = samples
        .iter()
        .map(|&(x, y)| img.get_pixel(x.min(w - 1), y.min(h - 1)))
        .collect();

    let all_white = pixels.iter().all(|p| p.0.iter().all(|&c| c >= white_tolerance));
    let all_clear = pixels.iter().all(|p| p[3] == 0);
    all_white || all_clear
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositeReport {
    /// No valid base texture was available for this run.
    pub degraded_base: bool,
    pub layers_drawn: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeStatus {
    Composed(CompositeReport),
    /// The canvas size is not known yet; a retry is queued.
    Deferred,
}

pub struct Compositor {
    target: Option<CanvasSize>,
    composed: Option<Arc<RgbaImage>>,
    /// The base the last successful run started from.
    last_base: Option<Arc<RgbaImage>>,
    retry_pending: bool,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Compositor {
    pub fn new(target: Option<CanvasSize>) -> Self {
        Self {
            target,
            composed: None,
            last_base: None,
            retry_pending: false,
        }
    }

    pub fn target_size(&self) -> Option<CanvasSize> {
        self.target
    }

    /// Set the canonical size. Returns `true` when a deferred run is
    /// waiting and the owner should composite again.
    pub fn set_target_size(&mut self, size: CanvasSize) -> bool {
        if self.target != Some(size) {
            // previous output has the wrong size now
            self.composed = None;
            self.last_base = None;
        }
        self.target = Some(size);
        std::mem::take(&mut self.retry_pending)
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    /// The latest composed surface, if any run has succeeded.
    pub fn composed(&self) -> Option<&Arc<RgbaImage>> {
        self.composed.as_ref()
    }

    /// Forget all output, e.g. when the model is unloaded.
    pub fn reset(&mut self) {
        self.composed = None;
        self.last_base = None;
        self.retry_pending = false;
    }

    /// Rebuild the composed surface from `base` and every visible layer.
    pub fn composite(&mut self, registry: &LayerRegistry, base: &BaseTexture) -> EngineResult<CompositeStatus> {
        let Some(size) = self.target else {
            tracing::debug!("composite requested before canvas size is known, deferring");
            self.retry_pending = true;
            return Ok(CompositeStatus::Deferred);
        };
        if size.is_empty() {
            return Err(EngineError::Structural(format!(
                "canvas size {}×{} is empty",
                size.width, size.height
            )));
        }
        if registry.size() != size {
            return Err(EngineError::Structural(format!(
                "layer registry is {}×{}, canvas is {}×{}",
                registry.size().width,
                registry.size().height,
                size.width,
                size.height
            )));
        }

        let (start, degraded_base) = match base {
            BaseTexture::Valid(img) => (Some(Arc::clone(img)), false),
            BaseTexture::Unset => {
                if self.last_base.is_some() {
                    tracing::warn!("base texture unset, carrying forward the previous base");
                }
                (self.last_base.clone(), true)
            }
        };

        let mut out = match &start {
            Some(img) if img.dimensions() == (size.width, size.height) => img.as_ref().clone(),
            Some(img) => imageops::resize(img.as_ref(), size.width, size.height, FilterType::Triangle),
            None => RgbaImage::new(size.width, size.height),
        };

        let mut drawn = 0usize;
        for id in registry.ids_in_composite_order() {
            drawn += draw_layer(&mut out, registry, id, 1.0, BlendMode::Normal, size)?;
        }

        tracing::debug!("composited {drawn} layer(s), degraded_base={degraded_base}");
        self.composed = Some(Arc::new(out));
        self.last_base = start;
        Ok(CompositeStatus::Composed(CompositeReport { degraded_base, layers_drawn: drawn }))
    }
}

/// Draw one layer (recursing into groups) and return how many leaf layers
/// were blended. `parent_opacity` and `parent_mode` come from enclosing
/// groups; a child keeps its own mode unless that mode is `Normal`.
fn draw_layer(
    out: &mut RgbaImage,
    registry: &LayerRegistry,
    id: LayerId,
    parent_opacity: f32,
    parent_mode: BlendMode,
    size: CanvasSize,
) -> EngineResult<usize> {
    let Some(layer) = registry.get(id) else { return Ok(0) };
    if !layer.visible {
        return Ok(0);
    }
    let opacity = parent_opacity * layer.opacity();
    let mode = if layer.blend_mode == BlendMode::Normal { parent_mode } else { layer.blend_mode };

    if layer.is_group() {
        let mut drawn = 0;
        for child in registry.children_in_order(id) {
            drawn += draw_layer(out, registry, child, opacity, mode, size)?;
        }
        return Ok(drawn);
    }

    let Some(raster) = layer.raster(size) else { return Ok(0) };
    if raster.width() == 0 || raster.height() == 0 {
        return Err(EngineError::Structural(format!("layer '{}' has a zero-sized surface", layer.name)));
    }
    if raster.size() != size {
        return Err(EngineError::Structural(format!(
            "layer '{}' surface is {}×{}, canvas is {}×{}",
            layer.name,
            raster.width(),
            raster.height(),
            size.width,
            size.height
        )));
    }
    blend_tiled_onto(out, &raster, mode, opacity);
    Ok(1)
}

/// Blend every populated chunk of `layer` onto `out`, one output row per
/// rayon task. Empty chunks are skipped entirely.
pub fn blend_tiled_onto(out: &mut RgbaImage, layer: &TiledImage, mode: BlendMode, opacity: f32) {
    if opacity <= 0.0 || layer.is_blank() {
        return;
    }
    let width = out.width();
    let stride = width as usize * 4;
    let chunks_x = width.div_ceil(CHUNK_SIZE);
    let raw: &mut [u8] = out.as_mut();

    raw.par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let y = y as u32;
        let cy = y / CHUNK_SIZE;
        let ly = y % CHUNK_SIZE;
        for cx in 0..chunks_x {
            let Some(chunk) = layer.get_chunk(cx, cy) else { continue };
            let x0 = cx * CHUNK_SIZE;
            let run = CHUNK_SIZE.min(width - x0);
            for lx in 0..run {
                let top = *chunk.get_pixel(lx, ly);
                if top[3] == 0 {
                    continue;
                }
                let idx = (x0 + lx) as usize * 4;
                let base = Rgba([row[idx], row[idx + 1], row[idx + 2], row[idx + 3]]);
                let blended = blend_pixel(base, top, mode, opacity);
                row[idx..idx + 4].copy_from_slice(&blended.0);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mostly_white_design_is_not_a_placeholder() {
        let mut img = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
        assert!(is_placeholder_surface(&img, DEFAULT_WHITE_TOLERANCE));
        img.put_pixel(25, 25, Rgba([200, 30, 30, 255]));
        assert!(!is_placeholder_surface(&img, DEFAULT_WHITE_TOLERANCE));
        assert!(is_placeholder_surface(&RgbaImage::new(10, 10), DEFAULT_WHITE_TOLERANCE));
    }

    #[test]
    fn acquired_texture_is_resampled_to_canvas() {
        let src = RgbaImage::from_pixel(32, 16, Rgba([0, 0, 255, 255]));
        let base = BaseTexture::from_acquired(src, CanvasSize::new(64, 64), DEFAULT_WHITE_TOLERANCE);
        assert_eq!(base.image().unwrap().dimensions(), (64, 64));
        let blank = RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 255]));
        assert!(!BaseTexture::from_acquired(blank, CanvasSize::new(64, 64), DEFAULT_WHITE_TOLERANCE).is_set());
    }

    #[test]
    fn compositing_before_size_is_known_defers() {
        let registry = LayerRegistry::new(CanvasSize::new(8, 8));
        let mut compositor = Compositor::new(None);
        assert_eq!(compositor.composite(&registry, &BaseTexture::Unset).unwrap(), CompositeStatus::Deferred);
        assert!(compositor.composed().is_none());
        assert!(compositor.set_target_size(CanvasSize::new(8, 8)));
        assert!(!compositor.set_target_size(CanvasSize::new(8, 8)));
    }

    #[test]
    fn size_mismatch_is_structural_and_keeps_previous_output() {
        let registry = LayerRegistry::new(CanvasSize::new(8, 8));
        let mut compositor = Compositor::new(Some(CanvasSize::new(8, 8)));
        compositor.composite(&registry, &BaseTexture::Unset).unwrap();
        let before = Arc::clone(compositor.composed().unwrap());

        let other = LayerRegistry::new(CanvasSize::new(0, 8));
        assert!(matches!(compositor.composite(&other, &BaseTexture::Unset), Err(EngineError::Structural(_))));
        assert!(Arc::ptr_eq(compositor.composed().unwrap(), &before));
    }

    #[test]
    fn chunk_blend_matches_pixel_blend() {
        let mut out = RgbaImage::from_pixel(130, 70, Rgba([0, 0, 255, 255]));
        let mut layer = TiledImage::new(130, 70);
        layer.put_pixel(129, 69, Rgba([255, 0, 0, 255]));
        layer.put_pixel(3, 3, Rgba([255, 0, 0, 255]));
        blend_tiled_onto(&mut out, &layer, BlendMode::Normal, 0.5);
        let expected = blend_pixel(Rgba([0, 0, 255, 255]), Rgba([255, 0, 0, 255]), BlendMode::Normal, 0.5);
        assert_eq!(*out.get_pixel(129, 69), expected);
        assert_eq!(*out.get_pixel(3, 3), expected);
        assert_eq!(*out.get_pixel(4, 3), Rgba([0, 0, 255, 255]));
    }
}
