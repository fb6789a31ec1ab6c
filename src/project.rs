use std::path::PathBuf;
use std::time::Instant;

use image::{GrayImage, RgbaImage};

use crate::bridge::{FrameThrottle, NullSink, PushOutcome, TextureSink, TextureSource, TextureSync};
use crate::canvas::{BlendMode, CanvasSize, TiledImage};
use crate::components::history::{CheckpointId, HistoryManager, SnapshotState};
use crate::components::layers::{LayerContent, LayerId, LayerKind, LayerRegistry};
use crate::components::selection::SelectionTracker;
use crate::compositor::{BaseTexture, CompositeReport, CompositeStatus, Compositor};
use crate::coords::{self, CanvasPoint, UvPoint};
use crate::error::{EngineError, EngineResult};
use crate::ops::brush::{self, BrushSettings, StrokeData};
use crate::ops::puff::PuffContent;
use crate::settings::EngineSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolKind {
    /// Paints one new paint layer per gesture.
    Brush,
    /// Paints the mask of one new puff layer per gesture.
    Puff,
    /// Hit-tests on pointer-down and selects the topmost layer.
    Select,
    /// Drags the selected layer.
    Move,
}

/// A discrete input event, already in canvas space.
#[derive(Clone, Copy, Debug)]
pub struct ToolEvent {
    pub phase: PointerPhase,
    pub point: CanvasPoint,
    pub tool: ToolKind,
    pub brush: BrushSettings,
    pub time: Instant,
}

/// One pointer-down → pointer-up drawing gesture, bound to one layer.
#[derive(Debug)]
struct StrokeSession {
    layer: LayerId,
    previous_active: Option<LayerId>,
    tool: ToolKind,
    brush: BrushSettings,
    last_point: CanvasPoint,
}

/// The open garment design: owns one of each engine component and routes
/// edits through composite → overlay → bridge → history.
pub struct Project<S: TextureSink = NullSink> {
    /// Display name (derived from path or "Untitled")
    pub name: String,
    /// `None` for unsaved designs.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    settings: EngineSettings,
    registry: LayerRegistry,
    compositor: Compositor,
    base: BaseTexture,
    history: HistoryManager,
    selection: SelectionTracker,
    sync: TextureSync<S>,
    throttle: FrameThrottle,
    session: Option<StrokeSession>,
    drag_anchor: Option<CanvasPoint>,
    drag_moved: bool,
    last_report: Option<CompositeReport>,
    stroke_counter: usize,
}

impl<S: TextureSink> Project<S> {
    /// A blank design. With an empty canvas size the compositor defers
    /// until [`Project::set_canvas_size`] is called.
    pub fn new(settings: EngineSettings, sink: S) -> Self {
        let size = settings.canvas_size();
        let target = (!size.is_empty()).then_some(size);
        let mut project = Self {
            name: "Untitled".to_string(),
            path: None,
            is_dirty: false,
            registry: LayerRegistry::new(size),
            compositor: Compositor::new(target),
            base: BaseTexture::Unset,
            history: HistoryManager::new(settings.max_history, settings.history_debounce()),
            selection: SelectionTracker::new(settings.hit_tolerance_px, settings.selection_border_color),
            sync: TextureSync::new(sink),
            throttle: FrameThrottle::new(settings.max_updates_per_sec),
            session: None,
            drag_anchor: None,
            drag_moved: false,
            last_report: None,
            stroke_counter: 0,
            settings,
        };
        let now = Instant::now();
        if let Err(e) = project.refresh(now, true) {
            tracing::warn!("initial composite failed: {e}");
        }
        project.reset_history(now);
        project
    }

    // ---- accessors ---------------------------------------------------------

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn canvas_size(&self) -> CanvasSize {
        self.registry.size()
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn selection(&self) -> &SelectionTracker {
        &self.selection
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn base_texture(&self) -> &BaseTexture {
        &self.base
    }

    pub fn last_report(&self) -> Option<CompositeReport> {
        self.last_report
    }

    pub fn sink(&self) -> &S {
        self.sync.sink()
    }

    pub fn sink_mut(&mut self) -> &mut S {
        self.sync.sink_mut()
    }

    /// Layer drawn into by the in-progress gesture, if any.
    pub fn active_stroke_layer(&self) -> Option<LayerId> {
        self.session.as_ref().map(|s| s.layer)
    }

    /// The composed surface without the selection overlay.
    pub fn composed(&self) -> Option<&RgbaImage> {
        self.compositor.composed().map(|c| c.as_ref())
    }

    /// The frame handed to the 3D scene: composed surface plus the
    /// ephemeral selection border.
    pub fn frame(&self) -> Option<RgbaImage> {
        let composed = self.compositor.composed()?;
        Some(
            self.selection
                .draw_feedback(composed, &self.registry)
                .unwrap_or_else(|| composed.as_ref().clone()),
        )
    }

    // ---- canvas & base texture -----------------------------------------------

    /// Provide the canonical size once it is known. A different size is only
    /// accepted while the design has no layers; the current size is a no-op
    /// unless a deferred composite is waiting.
    pub fn set_canvas_size(&mut self, size: CanvasSize, now: Instant) -> EngineResult<()> {
        if size.is_empty() {
            return Err(EngineError::Structural(format!("canvas size {}×{} is empty", size.width, size.height)));
        }
        let resized = self.registry.size() != size;
        if resized && !self.registry.is_empty() {
            return Err(EngineError::Structural("cannot resize a canvas that already has layers".into()));
        }
        let retry_pending = self.compositor.set_target_size(size);
        if resized {
            self.registry = LayerRegistry::new(size);
            self.settings.canvas_width = size.width;
            self.settings.canvas_height = size.height;
        } else if !retry_pending {
            return Ok(());
        }
        tracing::info!("canvas size set to {}×{}, recompositing", size.width, size.height);
        self.refresh(now, true)?;
        Ok(())
    }

    /// Read the model's base texture. Failure or a placeholder leaves the
    /// base unset and returns `false`; the compositor then carries the last
    /// valid base forward and reports a degraded frame.
    pub fn acquire_base_texture(&mut self, source: &impl TextureSource, now: Instant) -> bool {
        let base = match source.base_color_texture() {
            Ok(img) => BaseTexture::from_acquired(img, self.canvas_size(), self.settings.placeholder_white_tolerance),
            Err(e) => {
                tracing::warn!("base texture acquisition failed: {e}");
                BaseTexture::Unset
            }
        };
        if !base.is_set() {
            if self.base.is_set() {
                self.base = BaseTexture::Unset;
                if let Err(e) = self.refresh(now, true) {
                    tracing::warn!("composite after losing the base texture failed: {e}");
                }
            }
            return false;
        }
        self.base = base;
        tracing::info!("base texture acquired");
        if let Err(e) = self.refresh(now, true) {
            tracing::warn!("composite after base acquisition failed: {e}");
        }
        let state = self.capture_state();
        self.history.snapshot_immediate("Load base texture", state, now);
        true
    }

    /// Replace the base texture explicitly (model change, CLI override).
    pub fn set_base_texture(&mut self, base: BaseTexture, now: Instant) -> EngineResult<()> {
        self.base = base;
        self.refresh(now, true)?;
        let state = self.capture_state();
        self.history.snapshot_immediate("Replace base texture", state, now);
        Ok(())
    }

    // ---- compositing -----------------------------------------------------------

    /// Recomposite and hand the frame to the bridge. While a stroke is in
    /// progress non-forced pushes are throttled.
    pub fn refresh(&mut self, now: Instant, force: bool) -> EngineResult<Option<PushOutcome>> {
        if !force && self.session.is_some() && !self.throttle.allow(now) {
            return Ok(Some(PushOutcome::Skipped));
        }
        if force {
            self.throttle.force(now);
        }
        match self.compositor.composite(&self.registry, &self.base)? {
            CompositeStatus::Deferred => return Ok(None),
            CompositeStatus::Composed(report) => self.last_report = Some(report),
        }
        let Some(frame) = self.frame() else { return Ok(None) };
        Ok(Some(self.sync.push(&frame)))
    }

    fn capture_state(&self) -> SnapshotState {
        SnapshotState {
            registry: self.registry.snapshot_state(),
            base: self.base.clone(),
            composed: self.compositor.composed().cloned(),
        }
    }

    /// Restart history from the current state.
    fn reset_history(&mut self, now: Instant) {
        self.history.clear();
        let state = self.capture_state();
        self.history.snapshot_immediate("Open", state, now);
    }

    /// Apply a registry edit, recomposite, push and record it in history.
    /// If compositing rejects the result the registry is rolled back.
    pub fn edit<R>(&mut self, label: &str, now: Instant, f: impl FnOnce(&mut LayerRegistry) -> R) -> EngineResult<R> {
        let before = self.registry.snapshot_state();
        let out = f(&mut self.registry);
        self.selection.forget_missing(&self.registry);
        if let Err(e) = self.refresh(now, true) {
            tracing::warn!("'{label}' rejected: {e}");
            self.registry.restore_state(&before);
            self.selection.forget_missing(&self.registry);
            return Err(e);
        }
        let state = self.capture_state();
        self.history.snapshot(label, state, now);
        self.is_dirty = true;
        Ok(out)
    }

    pub fn add_layer(&mut self, kind: LayerKind, name: &str, blend_mode: Option<BlendMode>, now: Instant) -> EngineResult<LayerId> {
        self.edit("Add layer", now, |reg| reg.create_layer(kind, name, blend_mode))
    }

    pub fn add_content_layer(&mut self, name: &str, content: LayerContent, now: Instant) -> EngineResult<LayerId> {
        self.edit("Add layer", now, |reg| reg.create_layer_with_content(name, content, None))
    }

    // ---- tool input --------------------------------------------------------------

    /// Convert a UV-space event (3D raycast) and handle it.
    pub fn handle_uv_event(
        &mut self,
        phase: PointerPhase,
        uv: UvPoint,
        tool: ToolKind,
        brush: BrushSettings,
        time: Instant,
    ) -> EngineResult<Option<LayerId>> {
        let point = coords::to_canvas_space(uv, self.canvas_size());
        self.handle_tool_event(ToolEvent { phase, point, tool, brush, time })
    }

    /// Route one tool event. Returns the layer the event acted on.
    pub fn handle_tool_event(&mut self, ev: ToolEvent) -> EngineResult<Option<LayerId>> {
        match ev.tool {
            ToolKind::Brush | ToolKind::Puff => self.handle_draw(ev),
            ToolKind::Select => {
                if ev.phase != PointerPhase::Down {
                    return Ok(self.selection.selected());
                }
                Ok(self.select_at(ev.point, ev.time))
            }
            ToolKind::Move => self.handle_move(ev),
        }
    }

    fn handle_draw(&mut self, ev: ToolEvent) -> EngineResult<Option<LayerId>> {
        match ev.phase {
            PointerPhase::Down => {
                if self.session.is_some() {
                    tracing::warn!("pointer-down during an open stroke, finishing it first");
                    self.end_stroke(ev.time)?;
                }
                let layer = self.begin_stroke(&ev);
                self.extend_stroke(ev.point);
                self.refresh(ev.time, false)?;
                Ok(Some(layer))
            }
            PointerPhase::Move => {
                let Some(layer) = self.active_stroke_layer() else { return Ok(None) };
                self.extend_stroke(ev.point);
                self.refresh(ev.time, false)?;
                Ok(Some(layer))
            }
            PointerPhase::Up => {
                let Some(layer) = self.active_stroke_layer() else { return Ok(None) };
                self.extend_stroke(ev.point);
                self.end_stroke(ev.time)?;
                Ok(Some(layer))
            }
        }
    }

    fn begin_stroke(&mut self, ev: &ToolEvent) -> LayerId {
        self.stroke_counter += 1;
        let size = self.canvas_size();
        let (name, content) = match ev.tool {
            ToolKind::Puff => (
                format!("Puff {}", self.stroke_counter),
                LayerContent::Puff(PuffContent {
                    color: ev.brush.color,
                    mask: Some(TiledImage::with_size(size)),
                    ..Default::default()
                }),
            ),
            _ => (
                format!("Stroke {}", self.stroke_counter),
                LayerContent::Paint {
                    surface: TiledImage::with_size(size),
                    stroke: Some(StrokeData::new(ev.brush)),
                },
            ),
        };
        let previous_active = self.registry.active_layer();
        let layer = self.registry.create_layer_with_content(name, content, None);
        self.registry.set_active_layer(layer);
        self.throttle.reset();
        tracing::debug!("stroke session started on {layer}");
        self.session = Some(StrokeSession {
            layer,
            previous_active,
            tool: ev.tool,
            brush: ev.brush,
            last_point: ev.point,
        });
        layer
    }

    fn extend_stroke(&mut self, point: CanvasPoint) {
        let Some(session) = self.session.as_mut() else { return };
        let size = self.registry.size();
        let Some(layer) = self.registry.get_mut(session.layer) else { return };
        match &mut layer.content {
            LayerContent::Paint { surface, stroke: Some(stroke) } => stroke.push_point(surface, point),
            LayerContent::Puff(puff) if session.tool == ToolKind::Puff => {
                let mask = puff.mask_mut(size);
                if session.last_point == point {
                    brush::stamp_dab(mask, point, &session.brush);
                } else {
                    brush::stamp_segment(mask, session.last_point, point, &session.brush);
                }
            }
            _ => {}
        }
        session.last_point = point;
    }

    fn end_stroke(&mut self, now: Instant) -> EngineResult<()> {
        let Some(session) = self.session.take() else { return Ok(()) };
        tracing::debug!("stroke session on {} finished", session.layer);
        // the last frame of a stroke is never throttled
        self.refresh(now, true)?;
        if session.tool == ToolKind::Puff {
            self.push_height_map();
        }
        let state = self.capture_state();
        self.history.snapshot_immediate("Brush stroke", state, now);
        self.is_dirty = true;
        Ok(())
    }

    /// Highest puff level at every pixel over all visible puff layers.
    /// `None` when nothing visible is a puff.
    pub fn puff_height_map(&self) -> Option<GrayImage> {
        let size = self.canvas_size();
        let mut combined: Option<GrayImage> = None;
        let mut pending = self.registry.ids_in_composite_order();
        while let Some(id) = pending.pop() {
            let Some(layer) = self.registry.get(id) else { continue };
            if !layer.visible {
                continue;
            }
            match &layer.content {
                LayerContent::Group(_) => pending.extend(self.registry.children_in_order(id)),
                LayerContent::Puff(puff) => {
                    let map = puff.height_map(size);
                    if let Some(acc) = combined.as_mut() {
                        for (a, b) in acc.pixels_mut().zip(map.pixels()) {
                            a[0] = a[0].max(b[0]);
                        }
                    } else {
                        combined = Some(map);
                    }
                }
                _ => {}
            }
        }
        combined
    }

    fn push_height_map(&mut self) {
        let Some(map) = self.puff_height_map() else { return };
        if let Err(e) = self.sync.sink_mut().apply_height_map(&map) {
            tracing::warn!("height map push failed: {e}");
        }
    }

    /// Cancel the in-progress gesture: its layer is removed and the
    /// previous active layer restored. Returns `false` with no open stroke.
    pub fn abort_stroke(&mut self, now: Instant) -> EngineResult<bool> {
        let Some(session) = self.session.take() else { return Ok(false) };
        tracing::info!("stroke on {} aborted", session.layer);
        self.registry.delete_layer(session.layer);
        if let Some(prev) = session.previous_active.filter(|p| self.registry.contains(*p)) {
            self.registry.set_active_layer(prev);
        }
        self.selection.forget_missing(&self.registry);
        self.refresh(now, true)?;
        Ok(true)
    }

    fn handle_move(&mut self, ev: ToolEvent) -> EngineResult<Option<LayerId>> {
        let selected = self.selection.selected();
        match ev.phase {
            PointerPhase::Down => {
                self.drag_anchor = selected.map(|_| ev.point);
                self.drag_moved = false;
            }
            PointerPhase::Move | PointerPhase::Up => {
                let Some(anchor) = self.drag_anchor else { return Ok(selected) };
                let (dx, dy) = (ev.point.x - anchor.x, ev.point.y - anchor.y);
                if self.selection.move_selected(&mut self.registry, dx, dy) {
                    self.drag_anchor = Some(ev.point);
                    self.drag_moved = true;
                    self.is_dirty = true;
                    self.refresh(ev.time, true)?;
                }
                if ev.phase == PointerPhase::Up {
                    self.drag_anchor = None;
                    if std::mem::take(&mut self.drag_moved) {
                        let state = self.capture_state();
                        self.history.snapshot_immediate("Move layer", state, ev.time);
                    }
                }
            }
        }
        Ok(selected)
    }

    // ---- selection ---------------------------------------------------------------

    /// Hit-test and select the topmost layer at `point`, or clear the selection.
    pub fn select_at(&mut self, point: CanvasPoint, now: Instant) -> Option<LayerId> {
        match self.selection.hit_test(&self.registry, point) {
            Some(id) => {
                self.selection.select(&self.registry, id);
                self.selection.request_visual_feedback(id);
            }
            None => self.selection.clear(),
        }
        // overlay changed; push a fresh frame
        if let Err(e) = self.refresh(now, true) {
            tracing::warn!("refresh after selection failed: {e}");
        }
        self.selection.selected()
    }

    pub fn move_selected(&mut self, dx: f32, dy: f32, now: Instant) -> EngineResult<bool> {
        if !self.selection.move_selected(&mut self.registry, dx, dy) {
            return Ok(false);
        }
        self.refresh(now, true)?;
        let state = self.capture_state();
        self.history.snapshot("Move layer", state, now);
        self.is_dirty = true;
        Ok(true)
    }

    pub fn delete_selected(&mut self, now: Instant) -> EngineResult<Vec<LayerId>> {
        let Some(id) = self.selection.selected() else { return Ok(Vec::new()) };
        if let Some(layer) = self.registry.get(id) {
            if layer.locked.blocks_pixels() {
                return Err(EngineError::Locked(layer.name.clone()));
            }
        }
        let feedback = self.selection.has_feedback();
        let result = self.edit("Delete layer", now, |reg| reg.delete_layer(id));
        if result.is_err() {
            // rolled back: the layer is still there, keep it selected
            self.selection.select(&self.registry, id);
            if feedback {
                self.selection.request_visual_feedback(id);
            }
        }
        result
    }

    // ---- history -----------------------------------------------------------------

    fn restore(&mut self, state: SnapshotState, now: Instant) -> EngineResult<()> {
        self.session = None;
        self.registry.restore_state(&state.registry);
        self.base = state.base;
        self.selection.forget_missing(&self.registry);
        self.refresh(now, true)?;
        self.is_dirty = true;
        Ok(())
    }

    /// Step back one entry, then recomposite and push.
    pub fn undo(&mut self, now: Instant) -> EngineResult<bool> {
        let Some(state) = self.history.undo().map(|s| s.state().clone()) else { return Ok(false) };
        self.restore(state, now)?;
        Ok(true)
    }

    pub fn redo(&mut self, now: Instant) -> EngineResult<bool> {
        let Some(state) = self.history.redo().map(|s| s.state().clone()) else { return Ok(false) };
        self.restore(state, now)?;
        Ok(true)
    }

    pub fn checkpoint(&mut self, name: &str, now: Instant) -> CheckpointId {
        let state = self.capture_state();
        self.history.checkpoint(name, state, now)
    }

    /// Restore a named checkpoint (registry and base texture), recomposite,
    /// and record the jump so it can itself be undone.
    pub fn load_checkpoint(&mut self, id: CheckpointId, now: Instant) -> EngineResult<()> {
        let snap = self.history.checkpoint_snapshot(id)?;
        let label = format!("Load checkpoint '{}'", snap.label());
        let mut state = snap.state().clone();
        if !state.base.is_set() {
            // checkpoint taken before the base was acquired: keep the current one
            state.base = self.base.clone();
        }
        self.restore(state, now)?;
        let state = self.capture_state();
        self.history.snapshot_immediate(label, state, now);
        Ok(())
    }

    /// Record the current state before the model goes away.
    pub fn prepare_unload(&mut self, now: Instant) {
        if self.session.is_some() {
            if let Err(e) = self.end_stroke(now) {
                tracing::warn!("finishing stroke before unload failed: {e}");
            }
        }
        let state = self.capture_state();
        self.history.snapshot_immediate("Before unload", state, now);
        tracing::info!("project '{}' ready to unload", self.name);
    }

    // ---- persistence hooks -----------------------------------------------------------

    /// Swap in a registry and base rebuilt from a project file. History
    /// restarts from the loaded state.
    pub(crate) fn install_loaded(&mut self, registry: LayerRegistry, base: BaseTexture, now: Instant) -> EngineResult<()> {
        if registry.size() != self.canvas_size() {
            return Err(EngineError::Structural("loaded layers do not match the canvas size".into()));
        }
        self.registry = registry;
        self.base = base;
        self.selection.clear();
        self.session = None;
        self.compositor.reset();
        self.refresh(now, true)?;
        self.reset_history(now);
        self.is_dirty = false;
        Ok(())
    }
}
