use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::canvas::{BlendMode, CanvasRect, CanvasSize, TiledImage};
use crate::error::{EngineError, EngineResult};
use crate::ops::brush::StrokeData;
use crate::ops::placed_image::PlacedImage;
use crate::ops::puff::PuffContent;
use crate::ops::shapes::ShapeContent;
use crate::ops::text::TextContent;

// ============================================================================
// IDENTIFIERS & KINDS
// ============================================================================

/// Stable layer identifier, assigned at creation and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    pub fn from_u128(v: u128) -> Self {
        Self(Uuid::from_u128(v))
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Paint,
    Text,
    Shape,
    Image,
    Puff,
    Group,
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Paint => "paint",
            LayerKind::Text => "text",
            LayerKind::Shape => "shape",
            LayerKind::Image => "image",
            LayerKind::Puff => "puff",
            LayerKind::Group => "group",
        }
    }

    pub fn to_u8(&self) -> u8 {
        match self {
            LayerKind::Paint => 0,
            LayerKind::Text => 1,
            LayerKind::Shape => 2,
            LayerKind::Image => 3,
            LayerKind::Puff => 4,
            LayerKind::Group => 5,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => LayerKind::Paint,
            1 => LayerKind::Text,
            2 => LayerKind::Shape,
            3 => LayerKind::Image,
            4 => LayerKind::Puff,
            5 => LayerKind::Group,
            _ => return None,
        })
    }
}

impl FromStr for LayerKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paint" => Ok(LayerKind::Paint),
            "text" => Ok(LayerKind::Text),
            "shape" => Ok(LayerKind::Shape),
            "image" => Ok(LayerKind::Image),
            "puff" => Ok(LayerKind::Puff),
            "group" => Ok(LayerKind::Group),
            _ => Err(EngineError::UnknownLayerKind(s.to_string())),
        }
    }
}

/// Advisory edit locks. The editing paths in `Project` and the selection
/// tracker consult these; the registry itself never refuses metadata edits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockFlags {
    pub position: bool,
    pub pixels: bool,
    pub transparency: bool,
    pub all: bool,
}

impl LockFlags {
    pub fn blocks_move(&self) -> bool {
        self.all || self.position
    }

    pub fn blocks_pixels(&self) -> bool {
        self.all || self.pixels
    }

    pub fn to_bits(&self) -> u8 {
        (self.position as u8) | (self.pixels as u8) << 1 | (self.transparency as u8) << 2 | (self.all as u8) << 3
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            position: bits & 1 != 0,
            pixels: bits & 2 != 0,
            transparency: bits & 4 != 0,
            all: bits & 8 != 0,
        }
    }
}

// ============================================================================
// CONTENT
// ============================================================================

/// Kind-specific payload of a layer.
#[derive(Clone, Debug)]
pub enum LayerContent {
    Paint {
        surface: TiledImage,
        /// Recorded geometry of the stroke that produced the surface.
        /// `None` for imported rasters.
        stroke: Option<StrokeData>,
    },
    Text(TextContent),
    Shape(ShapeContent),
    Image(PlacedImage),
    Puff(PuffContent),
    Group(Vec<LayerId>),
}

impl LayerContent {
    pub fn default_for(kind: LayerKind, size: CanvasSize) -> Self {
        match kind {
            LayerKind::Paint => LayerContent::Paint { surface: TiledImage::with_size(size), stroke: None },
            LayerKind::Text => LayerContent::Text(TextContent::default()),
            LayerKind::Shape => LayerContent::Shape(ShapeContent::default()),
            LayerKind::Image => LayerContent::Image(PlacedImage::default()),
            LayerKind::Puff => LayerContent::Puff(PuffContent::default()),
            LayerKind::Group => LayerContent::Group(Vec::new()),
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            LayerContent::Paint { .. } => LayerKind::Paint,
            LayerContent::Text(_) => LayerKind::Text,
            LayerContent::Shape(_) => LayerKind::Shape,
            LayerContent::Image(_) => LayerKind::Image,
            LayerContent::Puff(_) => LayerKind::Puff,
            LayerContent::Group(_) => LayerKind::Group,
        }
    }
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Clone, Debug)]
pub struct Layer {
    id: LayerId,
    kind: LayerKind,
    pub name: String,
    /// Composite rank among siblings; higher draws later.
    pub order: i64,
    /// Registry-wide insertion sequence, breaks `order` ties.
    seq: u64,
    parent: Option<LayerId>,
    pub visible: bool,
    opacity: f32,
    pub blend_mode: BlendMode,
    pub locked: LockFlags,
    pub content: LayerContent,
}

impl Layer {
    /// Rebuild a layer with a known id, e.g. when loading a project file.
    /// Metadata starts at the defaults; the sequence number is assigned
    /// by [`LayerRegistry::insert_restored`].
    pub fn restored(id: LayerId, name: String, parent: Option<LayerId>, order: i64, content: LayerContent) -> Self {
        Self {
            id,
            kind: content.kind(),
            name,
            order,
            seq: 0,
            parent,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            locked: LockFlags::default(),
            content,
        }
    }

    pub fn id(&self) -> LayerId { self.id }

    pub fn kind(&self) -> LayerKind { self.kind }

    pub fn seq(&self) -> u64 { self.seq }

    pub fn parent(&self) -> Option<LayerId> { self.parent }

    pub fn opacity(&self) -> f32 { self.opacity }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_finite() { opacity.clamp(0.0, 1.0) } else { 1.0 };
    }

    /// Sort key giving the total composite order among siblings.
    pub fn sort_key(&self) -> (i64, u64) {
        (self.order, self.seq)
    }

    pub fn is_group(&self) -> bool {
        self.kind == LayerKind::Group
    }

    /// The recorded stroke for paint layers drawn by a stroke session.
    pub fn stroke(&self) -> Option<&StrokeData> {
        match &self.content {
            LayerContent::Paint { stroke, .. } => stroke.as_ref(),
            _ => None,
        }
    }

    /// Canvas-space bounds of what this layer draws, computed from the
    /// same geometry the compositor rasterizes. Groups have no own bounds.
    pub fn content_bounds(&self) -> Option<CanvasRect> {
        match &self.content {
            LayerContent::Paint { stroke: Some(stroke), .. } if !stroke.points.is_empty() => Some(stroke.bounds),
            LayerContent::Paint { surface, .. } => surface.content_bounds(),
            LayerContent::Text(text) => Some(text.bounds()),
            LayerContent::Shape(shape) => Some(shape.bounds()),
            LayerContent::Image(image) => Some(image.bounds()),
            LayerContent::Puff(puff) => puff.bounds(),
            LayerContent::Group(_) => None,
        }
    }

    /// The pixels this layer contributes. Paint surfaces are borrowed,
    /// vector content is rasterized on the fly. `None` for groups.
    pub fn raster(&self, size: CanvasSize) -> Option<Cow<'_, TiledImage>> {
        match &self.content {
            LayerContent::Paint { surface, .. } => Some(Cow::Borrowed(surface)),
            LayerContent::Text(text) => Some(Cow::Owned(text.rasterize(size))),
            LayerContent::Shape(shape) => Some(Cow::Owned(shape.rasterize(size))),
            LayerContent::Image(image) => Some(Cow::Owned(image.rasterize(size))),
            LayerContent::Puff(puff) => Some(Cow::Owned(puff.rasterize(size))),
            LayerContent::Group(_) => None,
        }
    }

    /// Rough owned-memory estimate for history accounting.
    pub fn memory_bytes(&self) -> usize {
        let content = match &self.content {
            LayerContent::Paint { surface, stroke } => {
                surface.memory_bytes()
                    + stroke.as_ref().map_or(0, |s| s.points.len() * std::mem::size_of::<crate::coords::CanvasPoint>())
            }
            LayerContent::Puff(puff) => puff.mask.as_ref().map_or(0, TiledImage::memory_bytes),
            LayerContent::Text(text) => text.text.len(),
            LayerContent::Group(children) => children.len() * std::mem::size_of::<LayerId>(),
            // placed pixels are shared behind an Arc
            LayerContent::Image(_) | LayerContent::Shape(_) => 0,
        };
        content + self.name.len() + std::mem::size_of::<Layer>()
    }
}

/// Shallow metadata merge for [`LayerRegistry::update_layer`]. There is
/// no `kind` field: a layer's kind never changes.
#[derive(Clone, Debug, Default)]
pub struct LayerUpdate {
    pub name: Option<String>,
    pub opacity: Option<f32>,
    pub visible: Option<bool>,
    pub blend_mode: Option<BlendMode>,
    pub locked: Option<LockFlags>,
    pub order: Option<i64>,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Everything the registry owns, as captured by history snapshots.
/// Tiled surfaces share chunks with the live registry until written.
#[derive(Clone, Debug)]
pub struct RegistryState {
    layers: HashMap<LayerId, Layer>,
    active: Option<LayerId>,
    next_seq: u64,
}

impl RegistryState {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers.values().map(Layer::memory_bytes).sum()
    }
}

/// Owns every layer of the open design and the active-layer pointer.
pub struct LayerRegistry {
    size: CanvasSize,
    layers: HashMap<LayerId, Layer>,
    active: Option<LayerId>,
    next_seq: u64,
}

impl LayerRegistry {
    pub fn new(size: CanvasSize) -> Self {
        Self {
            size,
            layers: HashMap::new(),
            active: None,
            next_seq: 0,
        }
    }

    pub fn size(&self) -> CanvasSize {
        self.size
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.layers.contains_key(&id)
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(&id)
    }

    pub fn active_layer(&self) -> Option<LayerId> {
        self.active
    }

    // ---- creation -----------------------------------------------------------

    /// Create an empty layer of `kind` on top of the root stack.
    pub fn create_layer(&mut self, kind: LayerKind, name: impl Into<String>, blend_mode: Option<BlendMode>) -> LayerId {
        let content = LayerContent::default_for(kind, self.size);
        self.insert(None, name.into(), content, blend_mode)
    }

    /// Create a root layer with explicit content; the kind follows the content.
    pub fn create_layer_with_content(
        &mut self,
        name: impl Into<String>,
        content: LayerContent,
        blend_mode: Option<BlendMode>,
    ) -> LayerId {
        self.insert(None, name.into(), content, blend_mode)
    }

    /// Create a layer on top of `group`'s children. `None` when `group`
    /// is missing or not a group.
    pub fn create_layer_in_group(
        &mut self,
        group: LayerId,
        name: impl Into<String>,
        content: LayerContent,
        blend_mode: Option<BlendMode>,
    ) -> Option<LayerId> {
        if !self.layers.get(&group).is_some_and(Layer::is_group) {
            tracing::warn!("create_layer_in_group: {group} is not a group");
            return None;
        }
        let id = self.insert(Some(group), name.into(), content, blend_mode);
        if let Some(LayerContent::Group(children)) = self.layers.get_mut(&group).map(|g| &mut g.content) {
            children.push(id);
        }
        Some(id)
    }

    fn insert(&mut self, parent: Option<LayerId>, name: String, content: LayerContent, blend_mode: Option<BlendMode>) -> LayerId {
        let id = LayerId::new();
        let order = self.top_order(parent) + 1;
        let seq = self.bump_seq();
        let layer = Layer {
            id,
            kind: content.kind(),
            name,
            order,
            seq,
            parent,
            visible: true,
            opacity: 1.0,
            blend_mode: blend_mode.unwrap_or_default(),
            locked: LockFlags::default(),
            content,
        };
        tracing::debug!("created {} layer '{}' ({id})", layer.kind.name(), layer.name);
        self.layers.insert(id, layer);
        id
    }

    /// Insert a fully-formed layer, e.g. one rebuilt from a project file.
    /// Returns `false` if the id is already taken.
    pub fn insert_restored(&mut self, mut layer: Layer) -> bool {
        if self.layers.contains_key(&layer.id) {
            return false;
        }
        layer.seq = self.bump_seq();
        self.layers.insert(layer.id, layer);
        true
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn top_order(&self, parent: Option<LayerId>) -> i64 {
        self.layers
            .values()
            .filter(|l| l.parent == parent)
            .map(|l| l.order)
            .max()
            .unwrap_or(-1)
    }

    // ---- mutation -----------------------------------------------------------

    pub fn set_active_layer(&mut self, id: LayerId) -> bool {
        if !self.layers.contains_key(&id) {
            tracing::warn!("set_active_layer: unknown layer {id}");
            return false;
        }
        self.active = Some(id);
        true
    }

    pub fn update_layer(&mut self, id: LayerId, update: LayerUpdate) -> bool {
        let Some(layer) = self.layers.get_mut(&id) else {
            tracing::warn!("update_layer: unknown layer {id}");
            return false;
        };
        if let Some(name) = update.name {
            layer.name = name;
        }
        if let Some(opacity) = update.opacity {
            layer.set_opacity(opacity);
        }
        if let Some(visible) = update.visible {
            layer.visible = visible;
        }
        if let Some(mode) = update.blend_mode {
            layer.blend_mode = mode;
        }
        if let Some(locked) = update.locked {
            layer.locked = locked;
        }
        if let Some(order) = update.order {
            layer.order = order;
        }
        true
    }

    /// Mutable content access for editing paths. Refuses pixel-locked layers.
    pub fn content_mut(&mut self, id: LayerId) -> EngineResult<&mut LayerContent> {
        let layer = self.layers.get_mut(&id).ok_or_else(|| EngineError::LayerNotFound(id.to_string()))?;
        if layer.locked.blocks_pixels() {
            return Err(EngineError::Locked(layer.name.clone()));
        }
        Ok(&mut layer.content)
    }

    /// Remove a layer. Groups take their children with them. Returns every
    /// removed id (empty when `id` was unknown).
    pub fn delete_layer(&mut self, id: LayerId) -> Vec<LayerId> {
        let Some(parent) = self.layers.get(&id).map(|l| l.parent) else {
            tracing::warn!("delete_layer: unknown layer {id}");
            return Vec::new();
        };
        if let Some(LayerContent::Group(children)) = parent.and_then(|p| self.layers.get_mut(&p)).map(|g| &mut g.content) {
            children.retain(|c| *c != id);
        }

        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(layer) = self.layers.remove(&next) {
                if let LayerContent::Group(children) = layer.content {
                    pending.extend(children);
                }
                removed.push(next);
            }
        }
        if self.active.is_some_and(|a| removed.contains(&a)) {
            self.active = None;
        }
        tracing::debug!("deleted {} layer(s) starting at {id}", removed.len());
        removed
    }

    /// Swap composite order with the sibling just above. `false` at the top.
    pub fn move_layer_up(&mut self, id: LayerId) -> bool {
        self.move_layer(id, true)
    }

    /// Swap composite order with the sibling just below. `false` at the bottom.
    pub fn move_layer_down(&mut self, id: LayerId) -> bool {
        self.move_layer(id, false)
    }

    fn move_layer(&mut self, id: LayerId, up: bool) -> bool {
        let Some(parent) = self.layers.get(&id).map(|l| l.parent) else {
            tracing::warn!("move_layer: unknown layer {id}");
            return false;
        };
        let mut siblings = self.sorted_siblings(parent);
        let Some(pos) = siblings.iter().position(|s| *s == id) else { return false };
        let target = if up {
            if pos + 1 >= siblings.len() { return false; }
            pos + 1
        } else {
            if pos == 0 { return false; }
            pos - 1
        };
        siblings.swap(pos, target);
        self.renumber(&siblings);
        true
    }

    /// Deep copy placed directly above the source. Groups copy their children.
    pub fn duplicate_layer(&mut self, id: LayerId) -> Option<LayerId> {
        let Some(source) = self.layers.get(&id) else {
            tracing::warn!("duplicate_layer: unknown layer {id}");
            return None;
        };
        let parent = source.parent;

        // Dense ranks first, so "directly above" is well defined under ties.
        let siblings = self.sorted_siblings(parent);
        self.renumber(&siblings);
        let source_order = self.layers.get(&id)?.order;
        for sib in &siblings {
            if let Some(l) = self.layers.get_mut(sib) {
                if l.order > source_order {
                    l.order += 1;
                }
            }
        }

        let copy = self.deep_copy(id, parent)?;
        if let Some(l) = self.layers.get_mut(&copy) {
            l.order = source_order + 1;
            l.name = format!("{} copy", l.name);
        }
        if let Some(LayerContent::Group(children)) = parent.and_then(|p| self.layers.get_mut(&p)).map(|g| &mut g.content) {
            children.push(copy);
        }
        Some(copy)
    }

    fn deep_copy(&mut self, id: LayerId, parent: Option<LayerId>) -> Option<LayerId> {
        let mut layer = self.layers.get(&id)?.clone();
        let new_id = LayerId::new();
        layer.id = new_id;
        layer.parent = parent;
        layer.seq = self.bump_seq();
        if let LayerContent::Group(children) = &layer.content {
            let children = children.clone();
            let mut copies = Vec::with_capacity(children.len());
            for child in children {
                if let Some(c) = self.deep_copy(child, Some(new_id)) {
                    copies.push(c);
                }
            }
            layer.content = LayerContent::Group(copies);
        }
        self.layers.insert(new_id, layer);
        Some(new_id)
    }

    /// Reparent `id` into `group`, on top of its children.
    pub fn add_to_group(&mut self, id: LayerId, group: LayerId) -> bool {
        if id == group || !self.layers.contains_key(&id) || !self.layers.get(&group).is_some_and(Layer::is_group) {
            tracing::warn!("add_to_group: cannot move {id} into {group}");
            return false;
        }
        // refuse cycles: `group` must not live inside `id`
        let mut cursor = Some(group);
        while let Some(c) = cursor {
            if c == id {
                tracing::warn!("add_to_group: {group} is nested inside {id}");
                return false;
            }
            cursor = self.layers.get(&c).and_then(|l| l.parent);
        }

        let old_parent = self.layers.get(&id).and_then(|l| l.parent);
        if let Some(LayerContent::Group(children)) = old_parent.and_then(|p| self.layers.get_mut(&p)).map(|g| &mut g.content) {
            children.retain(|c| *c != id);
        }
        let order = self.top_order(Some(group)) + 1;
        if let Some(layer) = self.layers.get_mut(&id) {
            layer.parent = Some(group);
            layer.order = order;
        }
        if let Some(LayerContent::Group(children)) = self.layers.get_mut(&group).map(|g| &mut g.content) {
            children.push(id);
        }
        true
    }

    fn renumber(&mut self, ordered: &[LayerId]) {
        for (rank, sib) in ordered.iter().enumerate() {
            if let Some(l) = self.layers.get_mut(sib) {
                l.order = rank as i64;
            }
        }
    }

    // ---- ordering -------------------------------------------------------------

    fn sorted_siblings(&self, parent: Option<LayerId>) -> Vec<LayerId> {
        let mut siblings: Vec<&Layer> = self.layers.values().filter(|l| l.parent == parent).collect();
        siblings.sort_by_key(|l| l.sort_key());
        siblings.into_iter().map(|l| l.id).collect()
    }

    /// Root-level layers, bottom first.
    pub fn ids_in_composite_order(&self) -> Vec<LayerId> {
        self.sorted_siblings(None)
    }

    /// A group's children, bottom first. Empty for non-groups.
    pub fn children_in_order(&self, group: LayerId) -> Vec<LayerId> {
        match self.layers.get(&group).map(|g| &g.content) {
            Some(LayerContent::Group(children)) => {
                let mut kids: Vec<&Layer> = children.iter().filter_map(|c| self.layers.get(c)).collect();
                kids.sort_by_key(|l| l.sort_key());
                kids.into_iter().map(|l| l.id).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Every layer, topmost first, each group before its own children.
    pub fn walk_top_down(&self) -> Vec<LayerId> {
        let mut out = Vec::with_capacity(self.layers.len());
        for id in self.ids_in_composite_order().into_iter().rev() {
            self.walk_into(id, &mut out);
        }
        out
    }

    fn walk_into(&self, id: LayerId, out: &mut Vec<LayerId>) {
        out.push(id);
        for child in self.children_in_order(id).into_iter().rev() {
            self.walk_into(child, out);
        }
    }

    // ---- history ---------------------------------------------------------------

    pub fn snapshot_state(&self) -> RegistryState {
        RegistryState {
            layers: self.layers.clone(),
            active: self.active,
            next_seq: self.next_seq,
        }
    }

    pub fn restore_state(&mut self, state: &RegistryState) {
        self.layers = state.layers.clone();
        self.active = state.active;
        self.next_seq = state.next_seq;
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers.values().map(Layer::memory_bytes).sum()
    }
}
