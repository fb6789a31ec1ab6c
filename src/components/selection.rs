use image::{Rgba, RgbaImage};

use crate::canvas::CanvasRect;
use crate::components::layers::{LayerContent, LayerId, LayerRegistry};
use crate::coords::CanvasPoint;

/// Dash and gap length of the selection border, in pixels.
const DASH: u32 = 4;

/// Tracks the single selected layer and maps canvas points to layers.
#[derive(Debug)]
pub struct SelectionTracker {
    selected: Option<LayerId>,
    feedback: Option<LayerId>,
    hit_tolerance: f32,
    border_color: [u8; 4],
}

impl Default for SelectionTracker {
    fn default() -> Self {
        Self::new(2.0, [0, 160, 255, 255])
    }
}

impl SelectionTracker {
    pub fn new(hit_tolerance: f32, border_color: [u8; 4]) -> Self {
        Self {
            selected: None,
            feedback: None,
            hit_tolerance: hit_tolerance.max(0.0),
            border_color,
        }
    }

    pub fn selected(&self) -> Option<LayerId> {
        self.selected
    }

    /// Topmost visible layer whose content covers `point`.
    pub fn hit_test(&self, registry: &LayerRegistry, point: CanvasPoint) -> Option<LayerId> {
        if !registry.size().contains(point.x, point.y) {
            tracing::warn!("hit_test: ({}, {}) is outside the canvas", point.x, point.y);
            return None;
        }
        registry
            .ids_in_composite_order()
            .into_iter()
            .rev()
            .find_map(|id| self.hit_layer(registry, id, point))
    }

    fn hit_layer(&self, registry: &LayerRegistry, id: LayerId, point: CanvasPoint) -> Option<LayerId> {
        let layer = registry.get(id)?;
        if !layer.visible {
            return None;
        }
        if layer.is_group() {
            return registry
                .children_in_order(id)
                .into_iter()
                .rev()
                .find_map(|child| self.hit_layer(registry, child, point));
        }
        let bounds = self.hit_bounds(registry, id)?;
        bounds.contains(point.x, point.y).then_some(id)
    }

    /// Bounds used for hit-testing. Stroke bounds get the rounding tolerance.
    fn hit_bounds(&self, registry: &LayerRegistry, id: LayerId) -> Option<CanvasRect> {
        let layer = registry.get(id)?;
        match layer.stroke() {
            Some(stroke) if !stroke.points.is_empty() => Some(stroke.bounds.expand(self.hit_tolerance)),
            _ => layer.content_bounds(),
        }
    }

    /// Select an existing layer. Unknown ids leave the selection as it was.
    pub fn select(&mut self, registry: &LayerRegistry, id: LayerId) -> bool {
        if !registry.contains(id) {
            tracing::warn!("select: unknown layer {id}");
            return false;
        }
        self.selected = Some(id);
        true
    }

    pub fn clear(&mut self) {
        self.selected = None;
        self.feedback = None;
    }

    pub fn has_feedback(&self) -> bool {
        self.feedback.is_some()
    }

    /// Ask for a border around `id` on every frame from now on.
    pub fn request_visual_feedback(&mut self, id: LayerId) {
        self.feedback = Some(id);
    }

    /// Drop stale pointers after layers were removed or history restored.
    pub fn forget_missing(&mut self, registry: &LayerRegistry) {
        if self.selected.is_some_and(|id| !registry.contains(id)) {
            self.selected = None;
        }
        if self.feedback.is_some_and(|id| !registry.contains(id)) {
            self.feedback = None;
        }
    }

    /// Draw the dashed selection border onto a copy of the composed frame.
    /// Layer surfaces are never touched. Returns `None` when there is
    /// nothing to outline.
    pub fn draw_feedback(&self, frame: &RgbaImage, registry: &LayerRegistry) -> Option<RgbaImage> {
        let id = self.feedback?;
        let layer = registry.get(id)?;
        let bounds = if layer.is_group() {
            registry
                .children_in_order(id)
                .into_iter()
                .filter_map(|c| registry.get(c).and_then(|l| l.content_bounds()))
                .reduce(|a, b| a.union(b))?
        } else {
            layer.content_bounds()?
        };

        let mut out = frame.clone();
        draw_dashed_rect(&mut out, bounds, self.border_color);
        Some(out)
    }

    /// Translate the selected layer's content by `(dx, dy)`, clamped so the
    /// content stays on the canvas. Returns `false` when nothing moved.
    pub fn move_selected(&self, registry: &mut LayerRegistry, dx: f32, dy: f32) -> bool {
        let Some(id) = self.selected else { return false };
        let size = registry.size();
        let Some(layer) = registry.get(id) else {
            tracing::warn!("move_selected: selected layer {id} no longer exists");
            return false;
        };
        if layer.locked.blocks_move() {
            tracing::debug!("move_selected: '{}' is position-locked", layer.name);
            return false;
        }
        let Some(bounds) = layer.content_bounds() else { return false };
        let (dx, dy) = bounds.clamp_delta(size, dx, dy);
        if dx == 0.0 && dy == 0.0 {
            return false;
        }

        let Some(layer) = registry.get_mut(id) else { return false };
        match &mut layer.content {
            LayerContent::Paint { surface, stroke: Some(stroke) } if !stroke.points.is_empty() => {
                stroke.translate_and_rerender(surface, dx, dy);
            }
            LayerContent::Paint { surface, .. } => {
                *surface = surface.translated(dx.round() as i32, dy.round() as i32);
            }
            LayerContent::Text(text) => text.position = text.position.offset(dx, dy),
            LayerContent::Shape(shape) => shape.center = shape.center.offset(dx, dy),
            LayerContent::Image(image) => image.position = image.position.offset(dx, dy),
            LayerContent::Puff(puff) => {
                if let Some(mask) = puff.mask.as_mut() {
                    *mask = mask.translated(dx.round() as i32, dy.round() as i32);
                }
            }
            LayerContent::Group(_) => return false,
        }
        true
    }

    /// Delete the selected layer and clear the selection. Returns the ids
    /// removed from the registry.
    pub fn delete_selected(&mut self, registry: &mut LayerRegistry) -> Vec<LayerId> {
        let Some(id) = self.selected else { return Vec::new() };
        let removed = registry.delete_layer(id);
        self.clear();
        removed
    }
}

fn draw_dashed_rect(img: &mut RgbaImage, rect: CanvasRect, color: [u8; 4]) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || rect.is_empty() {
        return;
    }
    let x0 = rect.min_x.floor().clamp(0.0, (w - 1) as f32) as u32;
    let y0 = rect.min_y.floor().clamp(0.0, (h - 1) as f32) as u32;
    let x1 = (rect.max_x.ceil() - 1.0).clamp(0.0, (w - 1) as f32) as u32;
    let y1 = (rect.max_y.ceil() - 1.0).clamp(0.0, (h - 1) as f32) as u32;
    let on = |i: u32| (i / DASH) % 2 == 0;
    let px = Rgba(color);

    for x in x0..=x1 {
        if on(x - x0) {
            img.put_pixel(x, y0, px);
            img.put_pixel(x, y1, px);
        }
    }
    for y in y0..=y1 {
        if on(y - y0) {
            img.put_pixel(x0, y, px);
            img.put_pixel(x1, y, px);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{CanvasSize, TiledImage};
    use crate::components::layers::{LayerKind, LayerUpdate};
    use crate::ops::brush::{BrushSettings, StrokeData};

    fn stroke_layer(reg: &mut LayerRegistry, bounds: CanvasRect) -> LayerId {
        let mut stroke = StrokeData::new(BrushSettings::default());
        stroke.points.push(CanvasPoint::new(bounds.min_x, bounds.min_y));
        stroke.bounds = bounds;
        let surface = TiledImage::with_size(reg.size());
        reg.create_layer_with_content("stroke", LayerContent::Paint { surface, stroke: Some(stroke) }, None)
    }

    #[test]
    fn hit_test_uses_stroke_bounds_with_tolerance() {
        let mut reg = LayerRegistry::new(CanvasSize::new(100, 100));
        let id = stroke_layer(&mut reg, CanvasRect::from_min_max(10.0, 10.0, 50.0, 50.0));
        let sel = SelectionTracker::default();
        assert_eq!(sel.hit_test(&reg, CanvasPoint::new(30.0, 30.0)), Some(id));
        assert_eq!(sel.hit_test(&reg, CanvasPoint::new(51.5, 30.0)), Some(id));
        assert_eq!(sel.hit_test(&reg, CanvasPoint::new(53.0, 30.0)), None);
        assert_eq!(sel.hit_test(&reg, CanvasPoint::new(500.0, 500.0)), None);
    }

    #[test]
    fn topmost_visible_layer_wins() {
        let mut reg = LayerRegistry::new(CanvasSize::new(100, 100));
        let bottom = stroke_layer(&mut reg, CanvasRect::from_min_max(0.0, 0.0, 60.0, 60.0));
        let top = stroke_layer(&mut reg, CanvasRect::from_min_max(20.0, 20.0, 40.0, 40.0));
        let sel = SelectionTracker::default();
        assert_eq!(sel.hit_test(&reg, CanvasPoint::new(30.0, 30.0)), Some(top));
        reg.update_layer(top, LayerUpdate { visible: Some(false), ..Default::default() });
        assert_eq!(sel.hit_test(&reg, CanvasPoint::new(30.0, 30.0)), Some(bottom));
    }

    #[test]
    fn move_is_clamped_to_canvas() {
        let mut reg = LayerRegistry::new(CanvasSize::new(100, 100));
        let text = reg.create_layer(LayerKind::Text, "t", None);
        if let Some(LayerContent::Text(t)) = reg.get_mut(text).map(|l| &mut l.content) {
            t.text = "AB".into();
            t.font_size = 10.0;
            t.position = CanvasPoint::new(10.0, 10.0);
        }
        let mut sel = SelectionTracker::default();
        assert!(sel.select(&reg, text));
        assert!(sel.move_selected(&mut reg, -50.0, 0.0));
        assert_eq!(reg.get(text).unwrap().content_bounds().unwrap().min_x, 0.0);
        assert!(!sel.move_selected(&mut reg, -5.0, 0.0));
    }

    #[test]
    fn feedback_is_drawn_on_a_copy() {
        let mut reg = LayerRegistry::new(CanvasSize::new(20, 20));
        let id = stroke_layer(&mut reg, CanvasRect::from_min_max(2.0, 2.0, 10.0, 10.0));
        let mut sel = SelectionTracker::default();
        sel.request_visual_feedback(id);
        let frame = RgbaImage::new(20, 20);
        let with_border = sel.draw_feedback(&frame, &reg).unwrap();
        assert_eq!(with_border.get_pixel(2, 2).0, [0, 160, 255, 255]);
        assert_eq!(frame.get_pixel(2, 2).0, [0, 0, 0, 0]);
    }
}
