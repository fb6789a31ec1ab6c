use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasRect, CanvasSize, TiledImage};
use crate::coords::CanvasPoint;

/// Available shape primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Ellipse,
    Rectangle,
    RoundedRect,
    Triangle,
    Hexagon,
    Diamond,
    Star5,
    Cross,
    Heart,
}

/// How a shape is painted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeFillMode {
    Outline,
    Filled,
    /// Interior in the secondary colour, outline in the primary colour.
    Both,
}

/// A vector shape placed on the garment, rasterized at composite time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapeContent {
    /// Centre in canvas coords
    pub center: CanvasPoint,
    pub half_width: f32,
    pub half_height: f32,
    /// Rotation in radians
    pub rotation: f32,
    pub kind: ShapeKind,
    pub fill_mode: ShapeFillMode,
    pub outline_width: f32,
    pub primary_color: [u8; 4],
    pub secondary_color: [u8; 4],
    pub anti_alias: bool,
    pub corner_radius: f32,
}

impl Default for ShapeContent {
    fn default() -> Self {
        Self {
            center: CanvasPoint::default(),
            half_width: 32.0,
            half_height: 32.0,
            rotation: 0.0,
            kind: ShapeKind::Rectangle,
            fill_mode: ShapeFillMode::Filled,
            outline_width: 2.0,
            primary_color: [0, 0, 0, 255],
            secondary_color: [255, 255, 255, 255],
            anti_alias: true,
            corner_radius: 8.0,
        }
    }
}

impl ShapeContent {
    /// Axis-aligned bounds of the rotated shape, including the outline.
    /// Rasterization and hit-testing both use this rect.
    pub fn bounds(&self) -> CanvasRect {
        let cos_r = self.rotation.cos();
        let sin_r = self.rotation.sin();
        let corners = [
            (-self.half_width, -self.half_height),
            (self.half_width, -self.half_height),
            (self.half_width, self.half_height),
            (-self.half_width, self.half_height),
        ];
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for (lx, ly) in corners {
            let rx = lx * cos_r - ly * sin_r + self.center.x;
            let ry = lx * sin_r + ly * cos_r + self.center.y;
            min_x = min_x.min(rx);
            min_y = min_y.min(ry);
            max_x = max_x.max(rx);
            max_y = max_y.max(ry);
        }
        let pad = match self.fill_mode {
            ShapeFillMode::Filled => 0.0,
            ShapeFillMode::Outline | ShapeFillMode::Both => self.outline_width * 0.5,
        };
        CanvasRect::from_min_max(min_x, min_y, max_x, max_y).expand(pad)
    }

    /// Rasterize into a canvas-sized surface.
    pub fn rasterize(&self, size: CanvasSize) -> TiledImage {
        let mut out = TiledImage::with_size(size);
        // One pixel of slack for anti-aliasing
        let (x0, y0, x1, y1) = self.bounds().expand(1.0).to_pixel_span(size);
        let buf_w = x1 - x0;
        let buf_h = y1 - y0;
        if buf_w == 0 || buf_h == 0 {
            return out;
        }

        let row_bytes = buf_w as usize * 4;
        let mut buf = vec![0u8; row_bytes * buf_h as usize];

        // inverse rotation = transpose for rotation matrices
        let inv_cos = self.rotation.cos();
        let inv_sin = -self.rotation.sin();
        let outline_half = self.outline_width * 0.5;

        buf.par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(row, row_buf)| {
                let py_canvas = (y0 + row as u32) as f32 + 0.5;
                for col in 0..buf_w as usize {
                    let px_canvas = (x0 + col as u32) as f32 + 0.5;

                    let dx = px_canvas - self.center.x;
                    let dy = py_canvas - self.center.y;
                    let lx = dx * inv_cos - dy * inv_sin;
                    let ly = dx * inv_sin + dy * inv_cos;

                    let d = shape_sdf(self.kind, lx, ly, self.half_width, self.half_height, self.corner_radius);
                    let (color, coverage) = self.shade(d, outline_half);

                    if coverage > 0.001 {
                        let idx = col * 4;
                        let a = (color[3] as f32 * coverage).round().min(255.0) as u8;
                        row_buf[idx] = color[0];
                        row_buf[idx + 1] = color[1];
                        row_buf[idx + 2] = color[2];
                        row_buf[idx + 3] = a;
                    }
                }
            });

        out.blit_rgba_at(x0 as i32, y0 as i32, buf_w, buf_h, &buf);
        out
    }

    fn coverage(&self, d: f32) -> f32 {
        if self.anti_alias {
            smoothstep(0.5, -0.5, d)
        } else if d < 0.0 {
            1.0
        } else {
            0.0
        }
    }

    fn shade(&self, d: f32, outline_half: f32) -> ([u8; 4], f32) {
        let primary = self.primary_color;
        let secondary = self.secondary_color;
        match self.fill_mode {
            ShapeFillMode::Filled => (primary, self.coverage(d)),
            ShapeFillMode::Outline => (primary, self.coverage(d.abs() - outline_half)),
            ShapeFillMode::Both => {
                let fill_cov = self.coverage(d);
                let outline_cov = self.coverage(d.abs() - outline_half);
                if outline_cov > 0.001 {
                    // Outline on top
                    let oa = outline_cov;
                    let fa = fill_cov * (1.0 - oa);
                    let total_a = oa + fa;
                    let mix = |i: usize| ((primary[i] as f32 * oa + secondary[i] as f32 * fa) / total_a) as u8;
                    ([mix(0), mix(1), mix(2), mix(3)], total_a)
                } else {
                    (secondary, fill_cov)
                }
            }
        }
    }
}

// ============================================================================
// SDF functions: return signed distance (negative = inside)
// ============================================================================

/// SDF for a box centred at origin with half-extents (hx, hy).
#[inline]
fn sdf_box(px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    let dx = px.abs() - hx;
    let dy = py.abs() - hy;
    let outside = (dx.max(0.0) * dx.max(0.0) + dy.max(0.0) * dy.max(0.0)).sqrt();
    let inside = dx.max(dy).min(0.0);
    outside + inside
}

#[inline]
fn sdf_rounded_box(px: f32, py: f32, hx: f32, hy: f32, r: f32) -> f32 {
    let r = r.min(hx).min(hy);
    sdf_box(px, py, hx - r, hy - r) - r
}

/// SDF for an ellipse (approximation).
#[inline]
fn sdf_ellipse(px: f32, py: f32, rx: f32, ry: f32) -> f32 {
    let nx = px / rx;
    let ny = py / ry;
    let len = (nx * nx + ny * ny).sqrt();
    if len < 1e-8 {
        return -rx.min(ry);
    }
    let scale = (rx * rx * ny * ny + ry * ry * nx * nx).sqrt() / (rx * ry * len);
    (len - 1.0) / scale
}

/// SDF for a regular polygon with `n` sides, circumscribed radius `r`.
fn sdf_polygon(px: f32, py: f32, r: f32, n: u32) -> f32 {
    let angle = std::f32::consts::TAU / n as f32;
    let half = angle * 0.5;
    let theta = py.atan2(px) + std::f32::consts::FRAC_PI_2;
    let theta = ((theta % angle) + angle) % angle - half;
    let len = (px * px + py * py).sqrt();
    len * theta.cos() - r * half.cos()
}

/// SDF for a star with `n` points, outer radius `ro`, inner radius `ri`.
fn sdf_star(px: f32, py: f32, ro: f32, ri: f32, n: u32) -> f32 {
    let angle = std::f32::consts::PI / n as f32;
    let theta = py.atan2(px) + std::f32::consts::FRAC_PI_2;
    let theta = ((theta % (2.0 * angle)) + 2.0 * angle) % (2.0 * angle);

    let len = (px * px + py * py).sqrt();
    let (ax, ay) = (ro, 0.0);
    let (bx, by) = (ri * angle.cos(), ri * angle.sin());

    let qx = len * (theta - angle).cos();
    let qy = len * (theta - angle).sin();

    let ex = bx - ax;
    let ey = by - ay;
    let fx = qx - ax;
    let fy = qy - ay;
    let t = ((fx * ex + fy * ey) / (ex * ex + ey * ey)).clamp(0.0, 1.0);
    let cx = ax + ex * t - qx;
    let cy = ay + ey * t - qy;
    let dist = (cx * cx + cy * cy).sqrt();
    let cross = ex * fy - ey * fx;
    if cross < 0.0 { -dist } else { dist }
}

#[inline]
fn sdf_diamond(px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    let d = px.abs() / hx + py.abs() / hy - 1.0;
    let scale = 1.0 / (1.0 / (hx * hx) + 1.0 / (hy * hy)).sqrt();
    d * scale
}

fn sdf_cross(px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    let arm_ratio = 0.33;
    sdf_box(px, py, hx, hy * arm_ratio).min(sdf_box(px, py, hx * arm_ratio, hy))
}

/// Heart from the implicit curve (x²+y²-1)³ - x²y³ = 0, bumps on top.
/// Uniform scaling so the heart never clips its box.
fn sdf_heart(px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    const EXTENT_X: f32 = 1.0;
    const EXTENT_Y: f32 = 1.20;
    const CENTRE_Y: f32 = 0.20;

    let scale = (hx / EXTENT_X).min(hy / EXTENT_Y);
    let nx = px.abs() / scale;
    let ny = -py / scale + CENTRE_Y;

    let r2 = nx * nx + ny * ny;
    let a = r2 - 1.0;
    let f = a * a * a - nx * nx * ny * ny * ny;

    if f < 0.0 {
        let a2 = a * a;
        let df_dx = 6.0 * nx * a2 - 2.0 * nx * ny * ny * ny;
        let df_dy = 6.0 * ny * a2 - 3.0 * nx * nx * ny * ny;
        let grad_len = (df_dx * df_dx + df_dy * df_dy).sqrt();
        if grad_len > 1e-10 { (f / grad_len) * scale } else { -0.01 * scale }
    } else {
        // Outside: sample the parametric boundary for the closest point
        let mut min_d2: f32 = f32::MAX;
        let steps: u32 = 80;
        for i in 0..=steps {
            let t = std::f32::consts::PI * i as f32 / steps as f32;
            let bx = t.sin().powi(3);
            let by = (13.0 * t.cos() - 5.0 * (2.0 * t).cos() - 2.0 * (3.0 * t).cos() - (4.0 * t).cos()) / 16.0;
            let ddx = nx - bx;
            let ddy = ny - by;
            min_d2 = min_d2.min(ddx * ddx + ddy * ddy);
        }
        min_d2.sqrt() * scale
    }
}

/// Signed distance for a shape kind at local coordinates (centred at origin).
pub fn shape_sdf(kind: ShapeKind, px: f32, py: f32, hx: f32, hy: f32, corner_radius: f32) -> f32 {
    match kind {
        ShapeKind::Rectangle => sdf_box(px, py, hx, hy),
        ShapeKind::Ellipse => sdf_ellipse(px, py, hx, hy),
        ShapeKind::RoundedRect => sdf_rounded_box(px, py, hx, hy, corner_radius),
        ShapeKind::Triangle => sdf_polygon(px, py, hx.min(hy), 3),
        ShapeKind::Hexagon => sdf_polygon(px, py, hx.min(hy), 6),
        ShapeKind::Diamond => sdf_diamond(px, py, hx, hy),
        ShapeKind::Star5 => sdf_star(px, py, hx.min(hy), hx.min(hy) * 0.4, 5),
        ShapeKind::Cross => sdf_cross(px, py, hx, hy),
        ShapeKind::Heart => sdf_heart(px, py, hx, hy),
    }
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
