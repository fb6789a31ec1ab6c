mod common;

use std::time::{Duration, Instant};

use common::*;
use garmentfe::{EngineError, EngineSettings, NullSink, Project, StaticSource};

#[test]
fn undo_restores_exact_pixels_and_redo_reapplies() {
    let t0 = Instant::now();
    let mut project = recording_project(64, 64);
    project.acquire_base_texture(&StaticSource(Some(solid(64, 64, BLUE))), t0);
    let before = project.composed().unwrap().clone();

    add_square(&mut project, "A", (32.0, 32.0), 12.0, RED, apart(t0, 1));
    let after = project.composed().unwrap().clone();
    assert_ne!(before, after);

    assert!(project.undo(apart(t0, 2)).unwrap());
    assert_eq!(project.composed().unwrap(), &before);
    assert_eq!(project.registry().layer_count(), 0);

    assert!(project.redo(apart(t0, 3)).unwrap());
    assert_eq!(project.composed().unwrap(), &after);
    assert!(!project.redo(apart(t0, 4)).unwrap());
}

#[test]
fn rapid_edits_coalesce_into_one_step() {
    let t0 = Instant::now();
    let mut project = recording_project(32, 32);
    let base_len = project.history().len();

    add_square(&mut project, "A", (8.0, 8.0), 4.0, RED, t0);
    add_square(&mut project, "B", (16.0, 16.0), 4.0, GREEN, t0 + Duration::from_millis(100));
    add_square(&mut project, "C", (24.0, 24.0), 4.0, BLUE, t0 + Duration::from_millis(200));
    assert_eq!(project.history().len(), base_len + 1);

    add_square(&mut project, "D", (4.0, 4.0), 2.0, RED, apart(t0, 5));
    assert_eq!(project.history().len(), base_len + 2);

    project.undo(apart(t0, 6)).unwrap();
    assert_eq!(project.registry().layer_count(), 3);
    project.undo(apart(t0, 7)).unwrap();
    assert_eq!(project.registry().layer_count(), 0);
}

#[test]
fn oldest_entries_are_evicted_past_the_limit() {
    let t0 = Instant::now();
    let settings = EngineSettings { max_history: 3, ..settings(16, 16) };
    let mut project = Project::new(settings, NullSink);
    for i in 0..5u64 {
        add_square(&mut project, &format!("L{i}"), (8.0, 8.0), 2.0, RED, apart(t0, i + 1));
    }
    assert_eq!(project.history().len(), 3);
    assert_eq!(project.history().undo_history().len(), 2);

    assert!(project.undo(apart(t0, 10)).unwrap());
    assert!(project.undo(apart(t0, 11)).unwrap());
    assert!(!project.undo(apart(t0, 12)).unwrap());
    // the oldest surviving state has three layers
    assert_eq!(project.registry().layer_count(), 3);
}

#[test]
fn new_edit_after_undo_discards_redo() {
    let t0 = Instant::now();
    let mut project = recording_project(16, 16);
    add_square(&mut project, "A", (8.0, 8.0), 2.0, RED, apart(t0, 1));
    project.undo(apart(t0, 2)).unwrap();
    assert!(project.history().can_redo());
    add_square(&mut project, "B", (8.0, 8.0), 2.0, GREEN, apart(t0, 3));
    assert!(!project.history().can_redo());
}

#[test]
fn checkpoints_survive_and_can_be_restored() {
    let t0 = Instant::now();
    let settings = EngineSettings { max_history: 2, ..settings(32, 32) };
    let mut project = Project::new(settings, NullSink);
    add_square(&mut project, "A", (8.0, 8.0), 4.0, RED, apart(t0, 1));
    let saved = project.checkpoint("one layer", apart(t0, 2));
    let saved_pixels = project.composed().unwrap().clone();

    for i in 0..4u64 {
        add_square(&mut project, "more", (20.0, 20.0), 4.0, GREEN, apart(t0, 3 + i));
    }
    assert_eq!(project.registry().layer_count(), 5);

    project.load_checkpoint(saved, apart(t0, 10)).unwrap();
    assert_eq!(project.registry().layer_count(), 1);
    assert_eq!(project.composed().unwrap(), &saved_pixels);

    // the jump itself is undoable
    project.undo(apart(t0, 11)).unwrap();
    assert_eq!(project.registry().layer_count(), 5);

    assert!(matches!(
        project.load_checkpoint(999, apart(t0, 12)),
        Err(EngineError::CheckpointNotFound(999))
    ));
    assert_eq!(project.history().checkpoints(), vec![(saved, "one layer".to_string())]);
}

#[test]
fn history_memory_is_reported() {
    let t0 = Instant::now();
    let mut project = recording_project(64, 64);
    add_square(&mut project, "A", (32.0, 32.0), 12.0, RED, apart(t0, 1));
    assert!(project.history().memory_usage() > 0);
}
