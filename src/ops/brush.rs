use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasRect, TiledImage};
use crate::coords::CanvasPoint;

/// Round brush parameters carried by every brush tool event.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrushSettings {
    /// Radius in canvas pixels.
    pub radius: f32,
    /// 0.0 = fully soft edge, 1.0 = hard edge.
    pub hardness: f32,
    pub color: [u8; 4],
    /// Dab spacing as a fraction of the radius.
    pub spacing: f32,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self {
            radius: 8.0,
            hardness: 0.8,
            color: [0, 0, 0, 255],
            spacing: 0.25,
        }
    }
}

/// The recorded geometry of one stroke: enough to hit-test it and to
/// re-render it at an offset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokeData {
    pub points: Vec<CanvasPoint>,
    pub brush: BrushSettings,
    pub bounds: CanvasRect,
}

impl StrokeData {
    pub fn new(brush: BrushSettings) -> Self {
        Self {
            points: Vec::new(),
            brush,
            bounds: CanvasRect::default(),
        }
    }

    /// Append a point and stamp the segment from the previous point.
    pub fn push_point(&mut self, surface: &mut TiledImage, point: CanvasPoint) {
        let dab = CanvasRect::around(point.x, point.y, self.brush.radius);
        match self.points.last().copied() {
            Some(prev) => {
                stamp_segment(surface, prev, point, &self.brush);
                self.bounds = self.bounds.union(dab);
            }
            None => {
                stamp_dab(surface, point, &self.brush);
                self.bounds = dab;
            }
        }
        self.points.push(point);
    }

    /// Shift the recorded stroke and redraw it from scratch into `surface`.
    pub fn translate_and_rerender(&mut self, surface: &mut TiledImage, dx: f32, dy: f32) {
        for p in &mut self.points {
            *p = p.offset(dx, dy);
        }
        self.bounds = self.bounds.translate(dx, dy);
        self.rerender(surface);
    }

    pub fn rerender(&self, surface: &mut TiledImage) {
        surface.clear();
        let mut prev: Option<CanvasPoint> = None;
        for &p in &self.points {
            match prev {
                Some(a) => stamp_segment(surface, a, p, &self.brush),
                None => stamp_dab(surface, p, &self.brush),
            }
            prev = Some(p);
        }
    }
}

/// Stamp one round dab. Uses max-alpha stamping so overlapping dabs of the
/// same stroke never stack opacity.
pub fn stamp_dab(surface: &mut TiledImage, center: CanvasPoint, brush: &BrushSettings) {
    let size = surface.size();
    let r = brush.radius.max(0.5);
    let (x0, y0, x1, y1) = CanvasRect::around(center.x, center.y, r + 1.0).to_pixel_span(size);
    let hard = brush.hardness.clamp(0.0, 1.0);
    let [cr, cg, cb, ca] = brush.color;

    for y in y0..y1 {
        for x in x0..x1 {
            let dx = x as f32 + 0.5 - center.x;
            let dy = y as f32 + 0.5 - center.y;
            let d = (dx * dx + dy * dy).sqrt() / r;
            if d > 1.0 { continue; }
            let coverage = if d <= hard || hard >= 1.0 {
                1.0
            } else {
                1.0 - (d - hard) / (1.0 - hard)
            };
            let a = (ca as f32 * coverage).round() as u8;
            if a == 0 { continue; }
            let existing = surface.get_pixel(x, y);
            if a > existing[3] {
                surface.put_pixel(x, y, Rgba([cr, cg, cb, a]));
            }
        }
    }
}

/// Stamp dabs along a segment at the brush spacing.
pub fn stamp_segment(surface: &mut TiledImage, from: CanvasPoint, to: CanvasPoint, brush: &BrushSettings) {
    let step = (brush.radius * brush.spacing).max(0.5);
    let dist = from.distance(to);
    let steps = (dist / step).ceil().max(1.0) as u32;
    for i in 1..=steps {
        let t = i as f32 / steps as f32;
        let p = CanvasPoint::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t);
        stamp_dab(surface, p, brush);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stroke_bounds_cover_every_dab() {
        let mut surface = TiledImage::new(100, 100);
        let brush = BrushSettings { radius: 4.0, ..Default::default() };
        let mut stroke = StrokeData::new(brush);
        stroke.push_point(&mut surface, CanvasPoint::new(20.0, 20.0));
        stroke.push_point(&mut surface, CanvasPoint::new(60.0, 30.0));
        assert_eq!(stroke.bounds, CanvasRect::from_min_max(16.0, 16.0, 64.0, 34.0));
        let painted = surface.content_bounds().unwrap();
        assert!(painted.min_x >= stroke.bounds.min_x && painted.max_x <= stroke.bounds.max_x);
        assert_eq!(surface.get_pixel(40, 25)[3], 255);
    }

    #[test]
    fn rerender_after_translate_moves_pixels() {
        let mut surface = TiledImage::new(100, 100);
        let mut stroke = StrokeData::new(BrushSettings { radius: 3.0, hardness: 1.0, ..Default::default() });
        stroke.push_point(&mut surface, CanvasPoint::new(10.0, 10.0));
        stroke.translate_and_rerender(&mut surface, 30.0, 0.0);
        assert_eq!(surface.get_pixel(10, 10)[3], 0);
        assert_eq!(surface.get_pixel(40, 10)[3], 255);
    }

    #[test]
    fn overlapping_dabs_do_not_stack_alpha() {
        let mut surface = TiledImage::new(50, 50);
        let brush = BrushSettings { radius: 5.0, hardness: 1.0, color: [255, 0, 0, 100], spacing: 0.1 };
        let mut stroke = StrokeData::new(brush);
        stroke.push_point(&mut surface, CanvasPoint::new(20.0, 20.0));
        stroke.push_point(&mut surface, CanvasPoint::new(22.0, 20.0));
        assert_eq!(surface.get_pixel(21, 20)[3], 100);
    }
}
