//! The one coordinate transform in the engine.
//!
//! Input arrives either as canvas pixels or as texture UVs from a 3D
//! raycast (`v` grows upward, OpenGL convention). Every layer stores its
//! on-canvas geometry in canvas space: pixels, y=0 at the top row. Every
//! content kind converts through this pair of functions and nothing else,
//! so the y-flip is applied exactly once in each direction.

use crate::canvas::CanvasSize;

/// A point in canonical canvas space (pixels, y=0 at the top).
#[derive(Clone, Copy, Debug, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct CanvasPoint {
    pub x: f32,
    pub y: f32,
}

impl CanvasPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn distance(self, other: CanvasPoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// A texture coordinate with `v` growing upward.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct UvPoint {
    pub u: f32,
    pub v: f32,
}

impl UvPoint {
    pub const fn new(u: f32, v: f32) -> Self {
        Self { u, v }
    }
}

/// UV → canvas pixels.
pub fn to_canvas_space(uv: UvPoint, size: CanvasSize) -> CanvasPoint {
    CanvasPoint::new(uv.u * size.width as f32, (1.0 - uv.v) * size.height as f32)
}

/// Canvas pixels → UV. Exact inverse of [`to_canvas_space`].
pub fn from_canvas_space(p: CanvasPoint, size: CanvasSize) -> UvPoint {
    let w = size.width.max(1) as f32;
    let h = size.height.max(1) as f32;
    UvPoint::new(p.x / w, 1.0 - p.y / h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_left_of_canvas_is_top_of_texture() {
        let size = CanvasSize::new(200, 100);
        assert_eq!(to_canvas_space(UvPoint::new(0.0, 1.0), size), CanvasPoint::new(0.0, 0.0));
        assert_eq!(to_canvas_space(UvPoint::new(1.0, 0.0), size), CanvasPoint::new(200.0, 100.0));
        assert_eq!(from_canvas_space(CanvasPoint::new(50.0, 25.0), size), UvPoint::new(0.25, 0.75));
    }
}
