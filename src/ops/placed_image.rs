use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::canvas::{CanvasRect, CanvasSize, TiledImage};
use crate::coords::CanvasPoint;

/// An imported picture (logo, patch artwork) placed on the garment.
/// Source pixels are shared so duplicating the layer or snapshotting
/// history never copies them.
#[derive(Clone, Debug)]
pub struct PlacedImage {
    pub image: Arc<RgbaImage>,
    /// Top-left corner in canvas space.
    pub position: CanvasPoint,
    /// Displayed width and height in canvas pixels.
    pub display_size: (f32, f32),
}

impl Default for PlacedImage {
    fn default() -> Self {
        Self {
            image: Arc::new(RgbaImage::new(0, 0)),
            position: CanvasPoint::default(),
            display_size: (0.0, 0.0),
        }
    }
}

impl PlacedImage {
    /// Place `image` at its natural size.
    pub fn new(image: RgbaImage, position: CanvasPoint) -> Self {
        let display_size = (image.width() as f32, image.height() as f32);
        Self { image: Arc::new(image), position, display_size }
    }

    pub fn bounds(&self) -> CanvasRect {
        CanvasRect::from_min_max(
            self.position.x,
            self.position.y,
            self.position.x + self.display_size.0.max(0.0),
            self.position.y + self.display_size.1.max(0.0),
        )
    }

    pub fn rasterize(&self, size: CanvasSize) -> TiledImage {
        let mut out = TiledImage::with_size(size);
        let w = self.display_size.0.round().max(0.0) as u32;
        let h = self.display_size.1.round().max(0.0) as u32;
        if w == 0 || h == 0 || self.image.width() == 0 || self.image.height() == 0 {
            return out;
        }

        let x = self.position.x.round() as i32;
        let y = self.position.y.round() as i32;
        if self.image.width() == w && self.image.height() == h {
            out.blit_rgba_at(x, y, w, h, self.image.as_raw());
        } else {
            let scaled = imageops::resize(self.image.as_ref(), w, h, FilterType::Triangle);
            out.blit_rgba_at(x, y, w, h, scaled.as_raw());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn image_is_scaled_to_display_size() {
        let src = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let mut placed = PlacedImage::new(src, CanvasPoint::new(5.0, 6.0));
        placed.display_size = (8.0, 8.0);
        let out = placed.rasterize(CanvasSize::new(32, 32));
        assert_eq!(out.content_bounds().unwrap(), placed.bounds());
        assert_eq!(out.get_pixel(9, 9).0, [10, 20, 30, 255]);
    }

    #[test]
    fn negative_position_is_clipped() {
        let src = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        let placed = PlacedImage::new(src, CanvasPoint::new(-5.0, -5.0));
        let out = placed.rasterize(CanvasSize::new(20, 20));
        assert_eq!(out.content_bounds().unwrap(), CanvasRect::from_min_max(0.0, 0.0, 5.0, 5.0));
    }
}
