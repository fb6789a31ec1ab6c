//! Property-based tests for canvas-space placement and compositing.
//!
//! 1. UV → canvas → UV is the identity (within a pixel).
//! 2. Every content kind placed from a UV hit reports its anchor at the
//!    same canvas point, so converting back lands within one pixel.
//! 3. Compositing the same registry twice gives identical surfaces.

use garmentfe::coords::{from_canvas_space, to_canvas_space};
use garmentfe::ops::brush::{BrushSettings, StrokeData};
use garmentfe::ops::placed_image::PlacedImage;
use garmentfe::ops::shapes::ShapeContent;
use garmentfe::ops::text::TextContent;
use garmentfe::{
    BaseTexture, BlendMode, CanvasPoint, CanvasSize, CompositeStatus, Compositor, LayerContent, LayerRegistry,
    TiledImage, UvPoint,
};
use image::{Rgba, RgbaImage};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

fn canvas() -> impl Strategy<Value = CanvasSize> {
    (16u32..=512, 16u32..=512).prop_map(|(w, h)| CanvasSize::new(w, h))
}

fn uv() -> impl Strategy<Value = UvPoint> {
    (0.0f32..=1.0, 0.0f32..=1.0).prop_map(|(u, v)| UvPoint::new(u, v))
}

fn uv_distance_px(a: UvPoint, b: UvPoint, size: CanvasSize) -> f32 {
    let dx = (a.u - b.u) * size.width as f32;
    let dy = (a.v - b.v) * size.height as f32;
    (dx * dx + dy * dy).sqrt()
}

/// The canvas-space point each content kind is anchored at.
fn anchor(content: &LayerContent) -> CanvasPoint {
    match content {
        LayerContent::Paint { stroke: Some(stroke), .. } => {
            let b = stroke.bounds;
            CanvasPoint::new((b.min_x + b.max_x) * 0.5, (b.min_y + b.max_y) * 0.5)
        }
        LayerContent::Text(t) => t.position,
        LayerContent::Shape(s) => s.center,
        LayerContent::Image(img) => img.position,
        other => panic!("no anchor for {:?}", other.kind()),
    }
}

fn place_all(point: CanvasPoint, size: CanvasSize) -> Vec<LayerContent> {
    let mut surface = TiledImage::with_size(size);
    let mut stroke = StrokeData::new(BrushSettings::default());
    stroke.push_point(&mut surface, point);
    vec![
        LayerContent::Paint { surface, stroke: Some(stroke) },
        LayerContent::Text(TextContent { text: "A".into(), position: point, ..Default::default() }),
        LayerContent::Shape(ShapeContent { center: point, ..Default::default() }),
        LayerContent::Image(PlacedImage::new(RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255])), point)),
    ]
}

// ═════════════════════════════════════════════════════════════════════════
// 1. UV round-trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn uv_round_trip_is_within_a_pixel(size in canvas(), p in uv()) {
        let back = from_canvas_space(to_canvas_space(p, size), size);
        prop_assert!(uv_distance_px(p, back, size) <= 1.0, "{:?} came back as {:?}", p, back);
    }

    #[test]
    fn canvas_y_grows_downward(size in canvas(), u in 0.0f32..=1.0, v1 in 0.0f32..=1.0, v2 in 0.0f32..=1.0) {
        prop_assume!(v1 > v2);
        let high = to_canvas_space(UvPoint::new(u, v1), size);
        let low = to_canvas_space(UvPoint::new(u, v2), size);
        prop_assert!(high.y <= low.y);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Every content kind is anchored where it was placed
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn placed_content_round_trips(size in canvas(), p in uv()) {
        let point = to_canvas_space(p, size);
        for content in place_all(point, size) {
            let back = from_canvas_space(anchor(&content), size);
            prop_assert!(
                uv_distance_px(p, back, size) <= 1.0,
                "{:?} anchored at {:?} for uv {:?}", content.kind(), anchor(&content), p
            );
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Compositing idempotence
// ═════════════════════════════════════════════════════════════════════════

fn square_strategy() -> impl Strategy<Value = (f32, f32, f32, [u8; 4], f32, u8)> {
    (
        0.0f32..64.0,
        0.0f32..64.0,
        1.0f32..20.0,
        any::<[u8; 4]>(),
        0.0f32..=1.0,
        0u8..25,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn compositing_is_idempotent(squares in proptest::collection::vec(square_strategy(), 0..6), base_px in any::<[u8; 4]>()) {
        let size = CanvasSize::new(64, 64);
        let mut registry = LayerRegistry::new(size);
        for (i, (x, y, half, color, opacity, mode)) in squares.into_iter().enumerate() {
            let content = LayerContent::Shape(ShapeContent {
                center: CanvasPoint::new(x, y),
                half_width: half,
                half_height: half,
                primary_color: color,
                ..Default::default()
            });
            let id = registry.create_layer_with_content(format!("s{i}"), content, Some(BlendMode::from_u8(mode)));
            if let Some(layer) = registry.get_mut(id) {
                layer.set_opacity(opacity);
            }
        }
        let base = BaseTexture::Valid(std::sync::Arc::new(RgbaImage::from_pixel(64, 64, Rgba(base_px))));

        let mut compositor = Compositor::new(Some(size));
        let first = compositor.composite(&registry, &base).unwrap();
        prop_assert!(matches!(first, CompositeStatus::Composed(_)));
        let a = compositor.composed().unwrap().clone();
        compositor.composite(&registry, &base).unwrap();
        let b = compositor.composed().unwrap().clone();
        prop_assert_eq!(a.as_ref(), b.as_ref());
    }
}
