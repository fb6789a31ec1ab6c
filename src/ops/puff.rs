use image::{Luma, GrayImage, Rgba};
use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasRect, CanvasSize, TiledImage};

/// Raised "puff print" area. The mask alpha marks where the ink sits;
/// the colour tints it in the composed texture. Height and softness are
/// carried for the displacement consumer and only shape the height map.
#[derive(Clone, Debug)]
pub struct PuffContent {
    pub height: f32,
    /// 0.0 = crisp edge, 1.0 = height falls off with mask alpha.
    pub softness: f32,
    pub color: [u8; 4],
    pub mask: Option<TiledImage>,
}

/// Puff parameters without the mask, as stored in project files.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PuffParams {
    pub height: f32,
    pub softness: f32,
    pub color: [u8; 4],
}

impl Default for PuffContent {
    fn default() -> Self {
        Self {
            height: 1.0,
            softness: 0.5,
            color: [255, 255, 255, 255],
            mask: None,
        }
    }
}

impl PuffContent {
    pub fn params(&self) -> PuffParams {
        PuffParams { height: self.height, softness: self.softness, color: self.color }
    }

    pub fn from_params(params: PuffParams, mask: Option<TiledImage>) -> Self {
        Self { height: params.height, softness: params.softness, color: params.color, mask }
    }

    /// The mask surface, allocated on first use.
    pub fn mask_mut(&mut self, size: CanvasSize) -> &mut TiledImage {
        self.mask.get_or_insert_with(|| TiledImage::with_size(size))
    }

    pub fn bounds(&self) -> Option<CanvasRect> {
        self.mask.as_ref().and_then(|m| m.content_bounds())
    }

    /// The mask tinted with the puff colour.
    pub fn rasterize(&self, size: CanvasSize) -> TiledImage {
        let mut out = TiledImage::with_size(size);
        let Some(mask) = &self.mask else { return out };
        let [r, g, b, a] = self.color;
        let Some(bounds) = mask.content_bounds() else { return out };
        let (x0, y0, x1, y1) = bounds.to_pixel_span(size);
        for y in y0..y1 {
            for x in x0..x1 {
                let m = mask.get_pixel(x, y)[3];
                if m == 0 { continue; }
                let alpha = (m as u16 * a as u16 / 255) as u8;
                out.put_pixel(x, y, Rgba([r, g, b, alpha]));
            }
        }
        out
    }

    /// Greyscale height map for the displacement consumer.
    pub fn height_map(&self, size: CanvasSize) -> GrayImage {
        let mut out = GrayImage::new(size.width, size.height);
        let Some(mask) = &self.mask else { return out };
        let peak = (self.height.clamp(0.0, 1.0) * 255.0) as f32;
        let soft = self.softness.clamp(0.0, 1.0);
        for (x, y, px) in out.enumerate_pixels_mut() {
            let m = mask.get_pixel(x, y)[3] as f32 / 255.0;
            if m == 0.0 { continue; }
            // soft edges follow the mask, hard edges jump to full height
            let level = soft * m + (1.0 - soft);
            *px = Luma([(peak * level).round() as u8]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tint_follows_mask_alpha() {
        let size = CanvasSize::new(16, 16);
        let mut puff = PuffContent { color: [200, 0, 0, 255], ..Default::default() };
        assert!(puff.bounds().is_none());
        puff.mask_mut(size).put_pixel(3, 4, Rgba([0, 0, 0, 128]));
        let out = puff.rasterize(size);
        assert_eq!(out.get_pixel(3, 4).0, [200, 0, 0, 128]);
        assert_eq!(puff.bounds().unwrap(), CanvasRect::from_min_max(3.0, 4.0, 4.0, 5.0));
    }

    #[test]
    fn hard_puff_has_flat_height() {
        let size = CanvasSize::new(8, 8);
        let mut puff = PuffContent { height: 1.0, softness: 0.0, ..Default::default() };
        puff.mask_mut(size).put_pixel(1, 1, Rgba([0, 0, 0, 10]));
        assert_eq!(puff.height_map(size).get_pixel(1, 1)[0], 255);
        assert_eq!(puff.height_map(size).get_pixel(2, 2)[0], 0);
    }
}
