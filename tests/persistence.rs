mod common;

use std::time::Instant;

use common::*;
use garmentfe::io::{export_png, load_image, load_project, save_project, ProjectFileError};
use garmentfe::ops::placed_image::PlacedImage;
use garmentfe::ops::puff::PuffContent;
use garmentfe::ops::text::TextContent;
use garmentfe::{
    BlendMode, CanvasPoint, EngineSettings, LayerContent, LayerKind, LayerUpdate, LockFlags, NullSink, StaticSource,
    TiledImage,
};

#[test]
fn save_and_load_reproduce_the_composite() {
    let t0 = Instant::now();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hoodie.gfe");

    let mut project = recording_project(96, 64);
    project.acquire_base_texture(&StaticSource(Some(solid(96, 64, BLUE))), t0);
    let square = add_square(&mut project, "square", (20.0, 20.0), 10.0, RED, t0);
    let text = project
        .add_content_layer(
            "label",
            LayerContent::Text(TextContent {
                text: "GFE".into(),
                position: CanvasPoint::new(40.0, 10.0),
                font_size: 12.0,
                color: GREEN,
                font: None,
            }),
            t0,
        )
        .unwrap();
    let logo = project
        .add_content_layer(
            "logo",
            LayerContent::Image(PlacedImage::new(solid(8, 8, [250, 200, 0, 255]), CanvasPoint::new(70.0, 40.0))),
            t0,
        )
        .unwrap();
    let mut mask = TiledImage::new(96, 64);
    mask.put_pixel(5, 60, image::Rgba([0, 0, 0, 255]));
    project
        .add_content_layer("puff", LayerContent::Puff(PuffContent { mask: Some(mask), ..Default::default() }), t0)
        .unwrap();
    project
        .edit("Tweak", t0, |reg| {
            reg.update_layer(
                square,
                LayerUpdate {
                    opacity: Some(0.75),
                    blend_mode: Some(BlendMode::Multiply),
                    locked: Some(LockFlags { position: true, ..Default::default() }),
                    ..Default::default()
                },
            );
            reg.update_layer(text, LayerUpdate { visible: Some(false), ..Default::default() });
            reg.set_active_layer(logo)
        })
        .unwrap();

    save_project(&project, &path).unwrap();
    let loaded = load_project(&path, EngineSettings::default(), NullSink).unwrap();

    assert_eq!(loaded.canvas_size(), project.canvas_size());
    assert_eq!(loaded.registry().layer_count(), 4);
    assert_eq!(loaded.registry().active_layer(), Some(logo));
    assert_eq!(loaded.registry().ids_in_composite_order(), project.registry().ids_in_composite_order());
    assert_eq!(loaded.composed(), project.composed());
    assert!(!loaded.is_dirty);
    assert!(!loaded.history().can_undo());

    let sq = loaded.registry().get(square).unwrap();
    assert_eq!(sq.opacity(), 0.75);
    assert_eq!(sq.blend_mode, BlendMode::Multiply);
    assert!(sq.locked.blocks_move());
    assert!(!loaded.registry().get(text).unwrap().visible);
    assert_eq!(loaded.base_texture().image().unwrap().as_ref(), &solid(96, 64, BLUE));
}

#[test]
fn groups_round_trip_and_delete_cascades() {
    let t0 = Instant::now();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grouped.gfe");

    let mut project = recording_project(40, 40);
    let group = project.add_layer(LayerKind::Group, "sleeve", None, t0).unwrap();
    let child = project
        .edit("Add to group", t0, |reg| reg.create_layer_in_group(group, "stripe", square((20.0, 20.0), 5.0, RED), None))
        .unwrap()
        .unwrap();
    project
        .edit("Fade", t0, |reg| reg.update_layer(group, LayerUpdate { opacity: Some(0.5), ..Default::default() }))
        .unwrap();
    let faded = pixel(&project, 20, 20);
    assert!(close(faded, [255, 0, 0, 127], 2));

    save_project(&project, &path).unwrap();
    let mut loaded = load_project(&path, EngineSettings::default(), NullSink).unwrap();
    assert_eq!(loaded.registry().children_in_order(group), vec![child]);
    assert_eq!(loaded.registry().get(child).unwrap().parent(), Some(group));
    assert_eq!(pixel(&loaded, 20, 20), faded);

    let removed = loaded.edit("Delete group", t0, |reg| reg.delete_layer(group)).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(loaded.registry().is_empty());
}

#[test]
fn truncated_file_is_rejected_without_a_project() {
    let t0 = Instant::now();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.gfe");

    let mut project = recording_project(32, 32);
    add_square(&mut project, "A", (16.0, 16.0), 4.0, RED, t0);
    save_project(&project, &path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(load_project(&path, EngineSettings::default(), NullSink).is_err());

    std::fs::write(&path, b"not a project").unwrap();
    assert!(load_project(&path, EngineSettings::default(), NullSink).is_err());

    let missing = load_project(&dir.path().join("nope.gfe"), EngineSettings::default(), NullSink);
    assert!(matches!(missing, Err(ProjectFileError::Io(_))));
}

#[test]
fn exported_png_matches_the_composite() {
    let t0 = Instant::now();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.png");

    let mut project = recording_project(48, 48);
    project.acquire_base_texture(&StaticSource(Some(solid(48, 48, BLUE))), t0);
    add_square(&mut project, "A", (24.0, 24.0), 6.0, RED, t0);
    export_png(&project, &path).unwrap();

    let written = load_image(&path).unwrap();
    assert_eq!(&written, project.composed().unwrap());
}
