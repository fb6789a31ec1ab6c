use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;

use crate::components::layers::RegistryState;
use crate::compositor::BaseTexture;
use crate::error::{EngineError, EngineResult};

pub type CheckpointId = u64;

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Everything needed to rebuild the visual state: the registry (surfaces
/// share chunks copy-on-write with the live registry), the base texture
/// reference, and the composed frame at capture time.
#[derive(Clone, Debug)]
pub struct SnapshotState {
    pub registry: RegistryState,
    pub base: BaseTexture,
    pub composed: Option<Arc<RgbaImage>>,
}

/// An immutable entry in the undo stack.
#[derive(Clone, Debug)]
pub struct HistorySnapshot {
    label: String,
    state: SnapshotState,
    taken_at: Instant,
    /// Debounced entries may be replaced by the next debounced entry.
    coalescable: bool,
}

impl HistorySnapshot {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> &SnapshotState {
        &self.state
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    /// Bytes owned by this snapshot alone. Chunks and frames still shared
    /// with the live state or a neighbouring snapshot only count a pointer.
    fn memory_bytes(&self) -> usize {
        let composed = self.state.composed.as_ref().map_or(0, |img| {
            if Arc::strong_count(img) == 1 {
                img.as_raw().len()
            } else {
                std::mem::size_of::<usize>() * 2
            }
        });
        self.state.registry.memory_bytes() + composed + self.label.len()
    }
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

/// Linear undo history with a cursor, debounced capture, FIFO eviction and
/// named checkpoints kept outside the eviction window.
pub struct HistoryManager {
    entries: VecDeque<HistorySnapshot>,
    /// Index of the entry matching the current state.
    cursor: usize,
    max_depth: usize,
    debounce: Duration,
    checkpoints: Vec<(CheckpointId, HistorySnapshot)>,
    next_checkpoint: CheckpointId,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50, Duration::from_millis(300))
    }
}

impl HistoryManager {
    pub fn new(max_depth: usize, debounce: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            max_depth: max_depth.max(1),
            debounce,
            checkpoints: Vec::new(),
            next_checkpoint: 1,
        }
    }

    /// Record a mutation. A debounced entry arriving within the debounce
    /// window of the previous debounced entry replaces it, so a burst of
    /// edits undoes as one step.
    pub fn snapshot(&mut self, label: impl Into<String>, state: SnapshotState, now: Instant) {
        let coalesce = self.cursor + 1 == self.entries.len()
            && self.entries.back().is_some_and(|top| {
                top.coalescable && now.saturating_duration_since(top.taken_at) < self.debounce
            });
        let snap = HistorySnapshot { label: label.into(), state, taken_at: now, coalescable: true };
        if coalesce {
            tracing::debug!("history: coalescing '{}' into previous entry", snap.label);
            if let Some(top) = self.entries.back_mut() {
                *top = snap;
            }
        } else {
            self.push(snap);
        }
    }

    /// Record without debouncing (stroke end, checkpoint load, pre-unload).
    pub fn snapshot_immediate(&mut self, label: impl Into<String>, state: SnapshotState, now: Instant) {
        self.push(HistorySnapshot { label: label.into(), state, taken_at: now, coalescable: false });
    }

    fn push(&mut self, snap: HistorySnapshot) {
        // A new action discards the redo tail
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        tracing::debug!("history: push '{}'", snap.label);
        self.entries.push_back(snap);
        self.cursor = self.entries.len() - 1;
        self.prune();
    }

    /// Drop the oldest entries past the depth limit. Their Arc-held
    /// surfaces are released with them.
    fn prune(&mut self) {
        while self.entries.len() > self.max_depth {
            if let Some(evicted) = self.entries.pop_front() {
                tracing::debug!("history: evicting '{}'", evicted.label);
            }
            self.cursor = self.cursor.saturating_sub(1);
        }
    }

    /// Step back; returns the snapshot to restore.
    pub fn undo(&mut self) -> Option<&HistorySnapshot> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor)
    }

    /// Step forward; returns the snapshot to restore.
    pub fn redo(&mut self) -> Option<&HistorySnapshot> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0 && !self.entries.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn current(&self) -> Option<&HistorySnapshot> {
        self.entries.get(self.cursor)
    }

    /// Labels of the undoable entries, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.entries
            .iter()
            .take(self.cursor + 1)
            .skip(1)
            .rev()
            .map(|s| s.label.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.entries.iter().map(HistorySnapshot::memory_bytes).sum::<usize>()
            + self.checkpoints.iter().map(|(_, s)| s.memory_bytes()).sum::<usize>()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
        self.checkpoints.clear();
    }

    // ---- checkpoints ----------------------------------------------------------

    pub fn checkpoint(&mut self, name: impl Into<String>, state: SnapshotState, now: Instant) -> CheckpointId {
        let id = self.next_checkpoint;
        self.next_checkpoint += 1;
        let snap = HistorySnapshot { label: name.into(), state, taken_at: now, coalescable: false };
        tracing::info!("checkpoint {id} '{}' saved", snap.label);
        self.checkpoints.push((id, snap));
        id
    }

    pub fn checkpoint_snapshot(&self, id: CheckpointId) -> EngineResult<&HistorySnapshot> {
        self.checkpoints
            .iter()
            .find(|(cid, _)| *cid == id)
            .map(|(_, s)| s)
            .ok_or(EngineError::CheckpointNotFound(id))
    }

    /// `(id, name)` of every checkpoint, oldest first.
    pub fn checkpoints(&self) -> Vec<(CheckpointId, String)> {
        self.checkpoints.iter().map(|(id, s)| (*id, s.label.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasSize;
    use crate::components::layers::{LayerKind, LayerRegistry};

    fn state(reg: &LayerRegistry) -> SnapshotState {
        SnapshotState { registry: reg.snapshot_state(), base: BaseTexture::Unset, composed: None }
    }

    #[test]
    fn burst_inside_window_is_one_entry() {
        let mut reg = LayerRegistry::new(CanvasSize::new(8, 8));
        let mut history = HistoryManager::new(10, Duration::from_millis(300));
        let t0 = Instant::now();
        history.snapshot_immediate("Initial", state(&reg), t0);
        for i in 0..5u64 {
            reg.create_layer(LayerKind::Paint, "p", None);
            history.snapshot("Add layer", state(&reg), t0 + Duration::from_millis(10 * i));
        }
        assert_eq!(history.len(), 2);
        assert_eq!(history.current().unwrap().state().registry.layer_count(), 5);

        history.snapshot("Later", state(&reg), t0 + Duration::from_secs(2));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn push_after_undo_drops_redo_tail() {
        let reg = LayerRegistry::new(CanvasSize::new(8, 8));
        let mut history = HistoryManager::new(10, Duration::ZERO);
        let t0 = Instant::now();
        history.snapshot_immediate("a", state(&reg), t0);
        history.snapshot_immediate("b", state(&reg), t0);
        history.snapshot_immediate("c", state(&reg), t0);
        assert_eq!(history.undo().unwrap().label(), "b");
        assert!(history.can_redo());
        history.snapshot_immediate("d", state(&reg), t0);
        assert!(!history.can_redo());
        assert_eq!(history.undo_history(), vec!["d".to_string(), "b".to_string()]);
    }

    #[test]
    fn oldest_entries_are_evicted_first() {
        let reg = LayerRegistry::new(CanvasSize::new(8, 8));
        let mut history = HistoryManager::new(3, Duration::ZERO);
        let t0 = Instant::now();
        for label in ["1", "2", "3", "4", "5"] {
            history.snapshot_immediate(label, state(&reg), t0);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.undo().unwrap().label(), "4");
        assert_eq!(history.undo().unwrap().label(), "3");
        assert!(history.undo().is_none());
    }

    #[test]
    fn evicted_frames_are_released() {
        let reg = LayerRegistry::new(CanvasSize::new(8, 8));
        let mut history = HistoryManager::new(1, Duration::ZERO);
        let frame = Arc::new(RgbaImage::new(8, 8));
        let t0 = Instant::now();
        history.snapshot_immediate(
            "old",
            SnapshotState { registry: reg.snapshot_state(), base: BaseTexture::Unset, composed: Some(Arc::clone(&frame)) },
            t0,
        );
        assert_eq!(Arc::strong_count(&frame), 2);
        history.snapshot_immediate("new", state(&reg), t0);
        assert_eq!(Arc::strong_count(&frame), 1);
    }

    #[test]
    fn unknown_checkpoint_is_an_error() {
        let reg = LayerRegistry::new(CanvasSize::new(8, 8));
        let mut history = HistoryManager::default();
        let id = history.checkpoint("before logo", state(&reg), Instant::now());
        assert_eq!(history.checkpoint_snapshot(id).unwrap().label(), "before logo");
        assert!(matches!(history.checkpoint_snapshot(id + 7), Err(EngineError::CheckpointNotFound(_))));
    }
}
